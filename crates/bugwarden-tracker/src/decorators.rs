//! Tracker decorators. Each wraps another `Arc<dyn Tracker>` and is itself a
//! `Tracker`, so they stack in any order.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bugwarden_core::error::Result;
use bugwarden_core::traits::Tracker;
use bugwarden_core::types::{Comment, ExternalRecord, HistoryEntry, RecordQuery, RecordUpdate};
use bugwarden_store::CacheStore;

// ─── Logging ──────────────────────────────────────────────

/// Logs every call with its duration and outcome.
pub struct LoggingTracker {
    inner: Arc<dyn Tracker>,
}

impl LoggingTracker {
    pub fn new(inner: Arc<dyn Tracker>) -> Self {
        Self { inner }
    }
}

fn log_outcome<T>(op: &str, started: Instant, result: &Result<T>, size: impl Fn(&T) -> String) {
    match result {
        Ok(v) => tracing::debug!("🐞 {op} → {} in {:?}", size(v), started.elapsed()),
        Err(e) => tracing::warn!("🐞 {op} failed after {:?}: {e}", started.elapsed()),
    }
}

#[async_trait]
impl Tracker for LoggingTracker {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn search(&self, query: &RecordQuery) -> Result<Vec<ExternalRecord>> {
        let started = Instant::now();
        let result = self.inner.search(query).await;
        log_outcome("search", started, &result, |r| format!("{} records", r.len()));
        result
    }

    async fn get(&self, id: u64) -> Result<Option<ExternalRecord>> {
        let started = Instant::now();
        let result = self.inner.get(id).await;
        log_outcome(&format!("get {id}"), started, &result, |r| match r {
            Some(_) => "found".to_string(),
            None => "not found".to_string(),
        });
        result
    }

    async fn comments(&self, record: &ExternalRecord) -> Result<Vec<Comment>> {
        let started = Instant::now();
        let result = self.inner.comments(record).await;
        log_outcome(&format!("comments {}", record.id), started, &result, |c| {
            format!("{} comments", c.len())
        });
        result
    }

    async fn history(&self, record: &ExternalRecord) -> Result<Vec<HistoryEntry>> {
        let started = Instant::now();
        let result = self.inner.history(record).await;
        log_outcome(&format!("history {}", record.id), started, &result, |h| {
            format!("{} entries", h.len())
        });
        result
    }

    async fn update(&self, id: u64, update: &RecordUpdate) -> Result<()> {
        let started = Instant::now();
        let result = self.inner.update(id, update).await;
        match &result {
            Ok(()) => tracing::info!("🐞 Updated bug {id} in {:?}", started.elapsed()),
            Err(e) => tracing::warn!("🐞 Update of bug {id} failed: {e}"),
        }
        result
    }
}

// ─── Staging ──────────────────────────────────────────────

/// Reads hit production; writes go to a staging tracker, or are logged and
/// dropped when there is none.
pub struct StagingTracker {
    production: Arc<dyn Tracker>,
    staging: Option<Arc<dyn Tracker>>,
}

impl StagingTracker {
    pub fn new(production: Arc<dyn Tracker>, staging: Option<Arc<dyn Tracker>>) -> Self {
        Self { production, staging }
    }
}

#[async_trait]
impl Tracker for StagingTracker {
    fn name(&self) -> &str {
        "staging"
    }

    async fn search(&self, query: &RecordQuery) -> Result<Vec<ExternalRecord>> {
        self.production.search(query).await
    }

    async fn get(&self, id: u64) -> Result<Option<ExternalRecord>> {
        self.production.get(id).await
    }

    async fn comments(&self, record: &ExternalRecord) -> Result<Vec<Comment>> {
        self.production.comments(record).await
    }

    async fn history(&self, record: &ExternalRecord) -> Result<Vec<HistoryEntry>> {
        self.production.history(record).await
    }

    async fn update(&self, id: u64, update: &RecordUpdate) -> Result<()> {
        match &self.staging {
            Some(staging) => {
                tracing::info!("🧪 Redirecting update of bug {id} to {}", staging.name());
                staging.update(id, update).await
            }
            None => {
                tracing::info!(
                    "🧪 Dropping update of bug {id}: {}",
                    serde_json::to_string(update).unwrap_or_default()
                );
                Ok(())
            }
        }
    }
}

// ─── Caching ──────────────────────────────────────────────

/// Serves comments and history from the revision-addressed cache. A record
/// whose revision moved on is refetched and the entry replaced.
pub struct CachingTracker {
    inner: Arc<dyn Tracker>,
    cache: Arc<CacheStore>,
}

impl CachingTracker {
    pub fn new(inner: Arc<dyn Tracker>, cache: Arc<CacheStore>) -> Self {
        Self { inner, cache }
    }

    fn store<T: serde::Serialize>(&self, key: &str, revision: &str, value: &T) {
        if let Err(e) = self.cache.set_json(key, revision, value) {
            tracing::warn!("⚠️ Cache write failed for '{key}': {e}");
        }
    }
}

#[async_trait]
impl Tracker for CachingTracker {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn search(&self, query: &RecordQuery) -> Result<Vec<ExternalRecord>> {
        self.inner.search(query).await
    }

    async fn get(&self, id: u64) -> Result<Option<ExternalRecord>> {
        self.inner.get(id).await
    }

    async fn comments(&self, record: &ExternalRecord) -> Result<Vec<Comment>> {
        let key = format!("bug-{}-comments", record.id);
        let revision = record.revision();
        if let Some(hit) = self.cache.get_json(&key, &revision) {
            return Ok(hit);
        }
        let comments = self.inner.comments(record).await?;
        self.store(&key, &revision, &comments);
        Ok(comments)
    }

    async fn history(&self, record: &ExternalRecord) -> Result<Vec<HistoryEntry>> {
        let key = format!("bug-{}-history", record.id);
        let revision = record.revision();
        if let Some(hit) = self.cache.get_json(&key, &revision) {
            return Ok(hit);
        }
        let history = self.inner.history(record).await?;
        self.store(&key, &revision, &history);
        Ok(history)
    }

    async fn update(&self, id: u64, update: &RecordUpdate) -> Result<()> {
        self.inner.update(id, update).await
    }
}
