//! Timestamp watermark with self-transition filtering.
//!
//! The boundary is exclusive: a record whose last change equals the cursor
//! defined that cursor and was handled last run. Changes made by the
//! record's own assignee never count.

use async_trait::async_trait;
use bugwarden_core::error::Result;
use bugwarden_core::traits::Tracker;
use bugwarden_core::types::{ExternalRecord, HistoryEntry, RecordQuery, Transition};
use chrono::{DateTime, TimeDelta, Utc};

use super::{Change, ChangeDetector, Detection};

pub struct TimestampWatermark {
    /// Fields whose changes count; empty means every field.
    fields: Vec<String>,
    lookback: TimeDelta,
}

impl TimestampWatermark {
    pub fn new(fields: Vec<String>, lookback_days: i64) -> Self {
        Self {
            fields,
            lookback: TimeDelta::try_days(lookback_days.max(0)).unwrap_or(TimeDelta::MAX),
        }
    }

    fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.lookback)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Stored watermark, or `now - lookback` when unset or undecodable.
    pub fn decode(&self, cursor: &str, now: DateTime<Utc>) -> DateTime<Utc> {
        if cursor.is_empty() {
            return self.window_start(now);
        }
        match DateTime::parse_from_rfc3339(cursor.trim()) {
            Ok(t) => t.with_timezone(&Utc),
            Err(e) => {
                tracing::warn!("⚠️ Undecodable timestamp watermark '{cursor}', using lookback: {e}");
                self.window_start(now)
            }
        }
    }

    /// Transitions after `since` made by someone other than the assignee.
    fn external_transitions(
        &self,
        record: &ExternalRecord,
        history: &[HistoryEntry],
        since: DateTime<Utc>,
    ) -> Vec<Transition> {
        history
            .iter()
            .filter(|entry| entry.when > since && entry.who != record.assignee)
            .flat_map(|entry| {
                entry
                    .changes
                    .iter()
                    .filter(move |c| self.fields.is_empty() || self.fields.contains(&c.field))
                    .map(move |c| Transition {
                        at: entry.when,
                        from: c.removed.clone(),
                        to: c.added.clone(),
                    })
            })
            .collect()
    }
}

#[async_trait]
impl ChangeDetector for TimestampWatermark {
    fn kind(&self) -> &'static str {
        "timestamp_watermark"
    }

    fn cursor_name(&self) -> &'static str {
        "last_change"
    }

    fn query(&self, base: &RecordQuery, cursor: &str, now: DateTime<Utc>) -> RecordQuery {
        let mut query = base.clone();
        query.changed_since = Some(self.decode(cursor, now));
        query
    }

    async fn detect(
        &self,
        cursor: &str,
        candidates: Vec<ExternalRecord>,
        tracker: &dyn Tracker,
        now: DateTime<Utc>,
    ) -> Result<Detection> {
        let since = self.decode(cursor, now);
        // Every fetched candidate moves the watermark, actionable or not.
        let next = candidates
            .iter()
            .map(|r| r.last_change_time)
            .fold(since, |a, b| a.max(b));

        let mut changes = Vec::new();
        for record in candidates {
            if record.last_change_time <= since {
                continue;
            }
            let history = tracker.history(&record).await?;
            let transitions = self.external_transitions(&record, &history, since);
            if transitions.is_empty() {
                tracing::debug!("🔍 Bug {} changed only by its assignee", record.id);
                continue;
            }
            changes.push(Change {
                record,
                transitions,
            });
        }

        Ok(Detection {
            changes,
            next: next.to_rfc3339(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::testing::{at, change, record};
    use bugwarden_tracker::MemoryTracker;

    fn detector() -> TimestampWatermark {
        TimestampWatermark::new(vec!["status".into()], 7)
    }

    #[tokio::test]
    async fn test_boundary_is_exclusive() {
        let tracker = MemoryTracker::new();
        tracker.set_history(1, vec![change(at(0), "qa@example.com", "status", "NEW", "ASSIGNED")]);

        let cursor = at(0).to_rfc3339();
        let d = detector()
            .detect(&cursor, vec![record(1, at(0))], &tracker, at(30))
            .await
            .unwrap();
        assert!(d.changes.is_empty());
        assert_eq!(d.next, cursor);
        assert_eq!(tracker.history_calls(), 0);
    }

    #[tokio::test]
    async fn test_self_transitions_ignored() {
        let tracker = MemoryTracker::new();
        tracker.set_history(
            1,
            vec![change(at(5), "owner@example.com", "status", "NEW", "ASSIGNED")],
        );
        tracker.set_history(
            2,
            vec![
                change(at(-5), "qa@example.com", "status", "NEW", "UNCONFIRMED"),
                change(at(6), "qa@example.com", "status", "ASSIGNED", "RESOLVED"),
            ],
        );

        let d = detector()
            .detect(
                &at(0).to_rfc3339(),
                vec![record(1, at(5)), record(2, at(6))],
                &tracker,
                at(30),
            )
            .await
            .unwrap();

        assert_eq!(d.changes.len(), 1);
        assert_eq!(d.changes[0].record.id, 2);
        assert_eq!(
            d.changes[0].transitions,
            vec![Transition {
                at: at(6),
                from: "ASSIGNED".into(),
                to: "RESOLVED".into(),
            }]
        );
        // Record 1 produced nothing but still moved the watermark past 5.
        assert_eq!(d.next, at(6).to_rfc3339());
    }

    #[tokio::test]
    async fn test_unwatched_fields_ignored() {
        let tracker = MemoryTracker::new();
        tracker.set_history(1, vec![change(at(5), "qa@example.com", "priority", "--", "P1")]);
        let d = detector()
            .detect(&at(0).to_rfc3339(), vec![record(1, at(5))], &tracker, at(30))
            .await
            .unwrap();
        assert!(d.changes.is_empty());
        assert_eq!(d.next, at(5).to_rfc3339());
    }

    #[test]
    fn test_default_cursor_is_lookback() {
        let q = detector().query(&RecordQuery::default(), "", at(0));
        assert_eq!(q.changed_since, Some(at(-7 * 24 * 60)));
        let q = detector().query(&RecordQuery::default(), "not a time", at(0));
        assert_eq!(q.changed_since, Some(at(-7 * 24 * 60)));
    }

    #[test]
    fn test_oversized_lookback_starts_at_the_beginning() {
        let detector = TimestampWatermark::new(Vec::new(), 1_000_000_000_000);
        assert_eq!(detector.decode("", at(0)), DateTime::<Utc>::MIN_UTC);
    }

    #[tokio::test]
    async fn test_history_failure_propagates() {
        struct Down;

        #[async_trait]
        impl Tracker for Down {
            fn name(&self) -> &str {
                "down"
            }
            async fn search(&self, _q: &RecordQuery) -> Result<Vec<ExternalRecord>> {
                Ok(Vec::new())
            }
            async fn get(&self, _id: u64) -> Result<Option<ExternalRecord>> {
                Ok(None)
            }
            async fn comments(
                &self,
                _r: &ExternalRecord,
            ) -> Result<Vec<bugwarden_core::types::Comment>> {
                Ok(Vec::new())
            }
            async fn history(&self, _r: &ExternalRecord) -> Result<Vec<HistoryEntry>> {
                Err(bugwarden_core::error::BugwardenError::tracker("503"))
            }
            async fn update(
                &self,
                _id: u64,
                _u: &bugwarden_core::types::RecordUpdate,
            ) -> Result<()> {
                Ok(())
            }
        }

        let result = detector()
            .detect(&at(0).to_rfc3339(), vec![record(1, at(5))], &Down, at(30))
            .await;
        assert!(result.is_err());
    }
}
