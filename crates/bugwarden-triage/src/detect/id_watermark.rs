//! ID watermark: every record with an id above the highest one processed.

use async_trait::async_trait;
use bugwarden_core::error::Result;
use bugwarden_core::traits::Tracker;
use bugwarden_core::types::{ExternalRecord, RecordQuery};
use chrono::{DateTime, TimeDelta, Utc};

use super::{Change, ChangeDetector, Detection};

pub struct IdWatermark {
    /// First-run window, in place of a full historical backfill.
    bootstrap: TimeDelta,
}

impl IdWatermark {
    pub fn new(bootstrap_hours: i64) -> Self {
        Self {
            bootstrap: TimeDelta::try_hours(bootstrap_hours.max(0)).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Stored watermark; unset or undecodable means 0.
    pub fn decode(cursor: &str) -> u64 {
        if cursor.is_empty() {
            return 0;
        }
        cursor.trim().parse().unwrap_or_else(|e| {
            tracing::warn!("⚠️ Undecodable id watermark '{cursor}', starting over: {e}");
            0
        })
    }
}

#[async_trait]
impl ChangeDetector for IdWatermark {
    fn kind(&self) -> &'static str {
        "id_watermark"
    }

    fn cursor_name(&self) -> &'static str {
        "last_id"
    }

    fn query(&self, base: &RecordQuery, cursor: &str, now: DateTime<Utc>) -> RecordQuery {
        let mut query = base.clone();
        match Self::decode(cursor) {
            0 => {
                query.created_since = Some(
                    now.checked_sub_signed(self.bootstrap)
                        .unwrap_or(DateTime::<Utc>::MIN_UTC),
                )
            }
            last => query.id_after = Some(last),
        }
        query
    }

    async fn detect(
        &self,
        cursor: &str,
        candidates: Vec<ExternalRecord>,
        _tracker: &dyn Tracker,
        _now: DateTime<Utc>,
    ) -> Result<Detection> {
        let last = Self::decode(cursor);
        let next = candidates.iter().map(|r| r.id).fold(last, u64::max);

        let mut changes: Vec<Change> = candidates
            .into_iter()
            .filter(|r| r.id > last)
            .map(Change::new)
            .collect();
        changes.sort_by_key(|c| c.record.id);

        Ok(Detection {
            changes,
            next: next.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::testing::{at, record};
    use bugwarden_tracker::MemoryTracker;

    async fn run(cursor: &str, ids: &[u64]) -> Detection {
        let candidates = ids.iter().map(|&id| record(id, at(0))).collect();
        IdWatermark::new(24)
            .detect(cursor, candidates, &MemoryTracker::new(), at(0))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_watermark_is_monotonic() {
        let first = run("4", &[5, 9, 3]).await;
        assert_eq!(first.next, "9");
        let ids: Vec<u64> = first.changes.iter().map(|c| c.record.id).collect();
        assert_eq!(ids, vec![5, 9]);

        let second = run(&first.next, &[]).await;
        assert_eq!(second.next, "9");
        assert!(second.changes.is_empty());
    }

    #[tokio::test]
    async fn test_never_regresses() {
        let d = run("12", &[7]).await;
        assert_eq!(d.next, "12");
        assert!(d.changes.is_empty());
    }

    #[test]
    fn test_bootstrap_window_on_first_run() {
        let detector = IdWatermark::new(24);
        let q = detector.query(&RecordQuery::default(), "", at(0));
        assert_eq!(q.created_since, Some(at(-24 * 60)));
        assert_eq!(q.id_after, None);

        let q = detector.query(&RecordQuery::default(), "41", at(0));
        assert_eq!(q.id_after, Some(41));
        assert_eq!(q.created_since, None);
    }

    #[test]
    fn test_oversized_bootstrap_window() {
        let detector = IdWatermark::new(i64::MAX);
        let q = detector.query(&RecordQuery::default(), "", at(0));
        assert_eq!(q.created_since, Some(DateTime::<Utc>::MIN_UTC));
    }

    #[test]
    fn test_garbage_cursor_is_zero() {
        assert_eq!(IdWatermark::decode("abc"), 0);
        assert_eq!(IdWatermark::decode(""), 0);
        assert_eq!(IdWatermark::decode("17"), 17);
    }
}
