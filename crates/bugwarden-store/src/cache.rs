//! Revision-addressed cache backed by redb.
//!
//! # Layout
//!
//! One table per cache key, two rows per table:
//! ```text
//! <key> ── "revision" → raw bytes of the revision tag
//!       └─ "data"     → raw payload bytes
//! ```
//!
//! A missing table or a revision that differs from the requested one is a
//! miss. `set` rewrites both rows in a single write transaction, so a reader
//! never sees a revision paired with another revision's payload.

use std::path::Path;

use bugwarden_core::error::{BugwardenError, Result};
use redb::{Database, TableDefinition, TableError};
use serde::Serialize;
use serde::de::DeserializeOwned;

const REVISION: &str = "revision";
const DATA: &str = "data";

fn table(key: &str) -> TableDefinition<'_, &'static str, &'static [u8]> {
    TableDefinition::new(key)
}

fn cache_err(e: impl std::fmt::Display) -> BugwardenError {
    BugwardenError::Cache(e.to_string())
}

/// Shared cache handle. Open once at startup and hand an `Arc` to every
/// workflow.
pub struct CacheStore {
    db: Database,
}

impl CacheStore {
    /// Open or create the cache database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(cache_err)?;
        tracing::debug!("🗄️ Cache opened at {}", path.display());
        Ok(Self { db })
    }

    /// Release the database file.
    pub fn close(self) {
        drop(self.db);
        tracing::debug!("🗄️ Cache closed");
    }

    /// Payload stored under `key`, only if it was stored with `revision`.
    ///
    /// Storage errors are logged and reported as a miss; callers fall back
    /// to the source of truth either way.
    pub fn get(&self, key: &str, revision: &str) -> Option<Vec<u8>> {
        match self.lookup(key, revision) {
            Ok(hit) => {
                tracing::debug!(
                    "🗄️ cache {} for '{key}'",
                    if hit.is_some() { "hit" } else { "miss" }
                );
                hit
            }
            Err(e) => {
                tracing::warn!("⚠️ Cache read failed for '{key}': {e}");
                None
            }
        }
    }

    fn lookup(&self, key: &str, revision: &str) -> Result<Option<Vec<u8>>> {
        let rt = self.db.begin_read().map_err(cache_err)?;
        let table = match rt.open_table(table(key)) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(cache_err(e)),
        };

        let fresh = match table.get(REVISION).map_err(cache_err)? {
            Some(stored) => stored.value() == revision.as_bytes(),
            None => false,
        };
        if !fresh {
            return Ok(None);
        }
        Ok(table
            .get(DATA)
            .map_err(cache_err)?
            .map(|data| data.value().to_vec()))
    }

    /// Overwrite revision and payload of `key` atomically.
    pub fn set(&self, key: &str, revision: &str, payload: &[u8]) -> Result<()> {
        let wt = self.db.begin_write().map_err(cache_err)?;
        {
            let mut t = wt.open_table(table(key)).map_err(cache_err)?;
            t.insert(REVISION, revision.as_bytes()).map_err(cache_err)?;
            t.insert(DATA, payload).map_err(cache_err)?;
        }
        wt.commit().map_err(cache_err)?;
        Ok(())
    }

    /// Typed lookup. A payload that fails to decode counts as a miss.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str, revision: &str) -> Option<T> {
        let bytes = self.get(key, revision)?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("⚠️ Discarding undecodable cache entry '{key}': {e}");
                None
            }
        }
    }

    pub fn set_json<T: Serialize>(&self, key: &str, revision: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.set(key, revision, &bytes)
    }
}
