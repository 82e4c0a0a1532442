//! Content-set diff over one field's transition history.
//!
//! The cursor remembers, per entity, the transitions of `field` seen last
//! time. An entity changes when its current sequence differs from the
//! remembered one. Entities whose transitions never touch a watched value
//! are not remembered at all, which bounds the cursor's size.

use std::collections::BTreeMap;

use async_trait::async_trait;
use bugwarden_core::error::Result;
use bugwarden_core::traits::Tracker;
use bugwarden_core::types::{ExternalRecord, RecordQuery, Transition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Change, ChangeDetector, Detection, transitions_of};

/// One remembered entity in the cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedEntity {
    pub id: u64,
    pub transitions: Vec<Transition>,
}

pub struct ContentDiff {
    field: String,
    watch: Vec<String>,
}

impl ContentDiff {
    pub fn new(field: &str, watch: Vec<String>) -> Self {
        Self {
            field: field.to_string(),
            watch,
        }
    }

    /// Remembered sequences by id; unset or undecodable means none.
    pub fn decode(cursor: &str) -> BTreeMap<u64, Vec<Transition>> {
        if cursor.is_empty() {
            return BTreeMap::new();
        }
        match serde_json::from_str::<Vec<TrackedEntity>>(cursor) {
            Ok(list) => list.into_iter().map(|e| (e.id, e.transitions)).collect(),
            Err(e) => {
                tracing::warn!("⚠️ Undecodable content-diff cursor, starting empty: {e}");
                BTreeMap::new()
            }
        }
    }

    pub fn encode(tracked: &BTreeMap<u64, Vec<Transition>>) -> Result<String> {
        let list: Vec<TrackedEntity> = tracked
            .iter()
            .map(|(id, transitions)| TrackedEntity {
                id: *id,
                transitions: transitions.clone(),
            })
            .collect();
        Ok(serde_json::to_string(&list)?)
    }

    fn touches_watch(&self, transitions: &[Transition]) -> bool {
        transitions
            .iter()
            .any(|t| self.watch.contains(&t.from) || self.watch.contains(&t.to))
    }
}

/// Order-insensitive form used for comparison and storage.
fn normalized(mut transitions: Vec<Transition>) -> Vec<Transition> {
    transitions.sort();
    transitions
}

#[async_trait]
impl ChangeDetector for ContentDiff {
    fn kind(&self) -> &'static str {
        "content_diff"
    }

    fn cursor_name(&self) -> &'static str {
        "tracked"
    }

    fn query(&self, base: &RecordQuery, _cursor: &str, _now: DateTime<Utc>) -> RecordQuery {
        let mut query = base.clone();
        if !query.include_fields.contains(&self.field) {
            query.include_fields.push(self.field.clone());
        }
        query
    }

    async fn detect(
        &self,
        cursor: &str,
        candidates: Vec<ExternalRecord>,
        tracker: &dyn Tracker,
        _now: DateTime<Utc>,
    ) -> Result<Detection> {
        let mut tracked = Self::decode(cursor);
        let mut changes = Vec::new();

        for record in candidates {
            let history = tracker.history(&record).await?;
            let current = normalized(transitions_of(&history, Some(self.field.as_str())));
            if !self.touches_watch(&current) {
                continue;
            }
            if tracked.get(&record.id) == Some(&current) {
                continue;
            }
            tracing::debug!(
                "🔍 Bug {}: {} now has {} transition(s)",
                record.id,
                self.field,
                current.len()
            );
            tracked.insert(record.id, current.clone());
            changes.push(Change {
                record,
                transitions: current,
            });
        }

        Ok(Detection {
            changes,
            next: Self::encode(&tracked)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::testing::{at, change, record};
    use bugwarden_tracker::MemoryTracker;

    const FIELD: &str = "cf_tracking_firefox120";

    fn detector() -> ContentDiff {
        ContentDiff::new(FIELD, vec!["+".into(), "blocking".into()])
    }

    async fn poll(tracker: &MemoryTracker, cursor: &str) -> Detection {
        detector()
            .detect(cursor, vec![record(42, at(10))], tracker, at(30))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_unchanged_sequence_is_idempotent() {
        let tracker = MemoryTracker::new();
        tracker.set_history(
            42,
            vec![
                change(at(1), "rm@example.com", FIELD, "---", "?"),
                change(at(2), "rm@example.com", FIELD, "?", "+"),
            ],
        );

        let first = poll(&tracker, "").await;
        assert_eq!(first.changes.len(), 1);

        let second = poll(&tracker, &first.next).await;
        assert!(second.changes.is_empty());
        assert_eq!(second.next, first.next);
    }

    #[tokio::test]
    async fn test_appended_transition_reports_full_sequence() {
        let tracker = MemoryTracker::new();
        tracker.set_history(42, vec![change(at(2), "rm@example.com", FIELD, "?", "+")]);
        let first = poll(&tracker, "").await;

        tracker.set_history(
            42,
            vec![
                change(at(2), "rm@example.com", FIELD, "?", "+"),
                change(at(5), "rm@example.com", FIELD, "+", "-"),
            ],
        );
        let second = poll(&tracker, &first.next).await;
        assert_eq!(second.changes.len(), 1);
        assert_eq!(second.changes[0].transitions.len(), 2);
        assert_eq!(second.changes[0].transitions[1].to, "-");
        assert_eq!(ContentDiff::decode(&second.next)[&42].len(), 2);
    }

    #[tokio::test]
    async fn test_unwatched_entities_not_remembered() {
        let tracker = MemoryTracker::new();
        tracker.set_history(
            42,
            vec![
                change(at(1), "rm@example.com", FIELD, "---", "?"),
                change(at(2), "rm@example.com", "status", "NEW", "ASSIGNED"),
            ],
        );
        let d = poll(&tracker, "").await;
        assert!(d.changes.is_empty());
        assert_eq!(d.next, "[]");
    }

    #[tokio::test]
    async fn test_order_normalized() {
        let tracker = MemoryTracker::new();
        let a = change(at(1), "rm@example.com", FIELD, "---", "+");
        let b = change(at(2), "rm@example.com", FIELD, "+", "blocking");
        tracker.set_history(42, vec![a.clone(), b.clone()]);
        let first = poll(&tracker, "").await;

        tracker.set_history(42, vec![b, a]);
        assert!(poll(&tracker, &first.next).await.changes.is_empty());
    }

    #[test]
    fn test_query_requests_the_field() {
        let q = detector().query(&RecordQuery::default(), "", at(0));
        assert_eq!(q.include_fields, vec![FIELD.to_string()]);
    }
}
