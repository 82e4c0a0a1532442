//! Explicit processed-set: each record is handled at most once.
//!
//! Unlike the watermarks, an id only enters the set after its side effects
//! succeeded, so a failed item is retried on the next run.

use std::collections::BTreeSet;

use async_trait::async_trait;
use bugwarden_core::error::Result;
use bugwarden_core::traits::Tracker;
use bugwarden_core::types::{ExternalRecord, RecordQuery};
use chrono::{DateTime, Utc};

use super::{Change, ChangeDetector, Detection};

pub struct ProcessedSet;

impl ProcessedSet {
    /// Processed ids; unset or undecodable means none.
    pub fn decode(cursor: &str) -> BTreeSet<u64> {
        if cursor.is_empty() {
            return BTreeSet::new();
        }
        serde_json::from_str(cursor).unwrap_or_else(|e| {
            tracing::warn!("⚠️ Undecodable processed set, starting empty: {e}");
            BTreeSet::new()
        })
    }

    fn encode(set: &BTreeSet<u64>) -> Result<String> {
        Ok(serde_json::to_string(set)?)
    }
}

#[async_trait]
impl ChangeDetector for ProcessedSet {
    fn kind(&self) -> &'static str {
        "processed_set"
    }

    fn cursor_name(&self) -> &'static str {
        "processed"
    }

    fn query(&self, base: &RecordQuery, _cursor: &str, _now: DateTime<Utc>) -> RecordQuery {
        base.clone()
    }

    async fn detect(
        &self,
        cursor: &str,
        candidates: Vec<ExternalRecord>,
        _tracker: &dyn Tracker,
        _now: DateTime<Utc>,
    ) -> Result<Detection> {
        let processed = Self::decode(cursor);
        let changes = candidates
            .into_iter()
            .filter(|r| !processed.contains(&r.id))
            .map(Change::new)
            .collect();
        Ok(Detection {
            changes,
            next: Self::encode(&processed)?,
        })
    }

    fn settle(&self, cursor: &str, _detection: &Detection, succeeded: &[u64]) -> Result<String> {
        let mut processed = Self::decode(cursor);
        processed.extend(succeeded.iter().copied());
        Self::encode(&processed)
    }
}
