//! Issue tracker capability.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Comment, ExternalRecord, HistoryEntry, RecordQuery, RecordUpdate};

/// Pull-only access to the issue tracker.
///
/// Decorators (logging, caching, staging) implement this trait by wrapping
/// another `Arc<dyn Tracker>`, so a chain of them is itself a `Tracker`.
#[async_trait]
pub trait Tracker: Send + Sync {
    fn name(&self) -> &str;

    /// Records matching the query, in tracker order.
    async fn search(&self, query: &RecordQuery) -> Result<Vec<ExternalRecord>>;

    /// Point fetch. `Ok(None)` when the record does not exist.
    async fn get(&self, id: u64) -> Result<Option<ExternalRecord>>;

    /// Comments of `record`, oldest first. The record's revision may be used
    /// as a cache tag.
    async fn comments(&self, record: &ExternalRecord) -> Result<Vec<Comment>>;

    /// History entries of `record`, oldest first.
    async fn history(&self, record: &ExternalRecord) -> Result<Vec<HistoryEntry>>;

    async fn update(&self, id: u64, update: &RecordUpdate) -> Result<()>;
}
