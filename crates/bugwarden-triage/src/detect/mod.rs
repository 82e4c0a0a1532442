//! Change detectors.
//!
//! A detector owns one cursor inside its workflow's scope and answers two
//! questions per run: which records to ask the tracker for, and which of
//! the returned candidates changed since the cursor. The cursor it returns
//! is committed by the driver after side effects were attempted.
//!
//! | Detector              | Cursor                          |
//! |-----------------------|---------------------------------|
//! | `IdWatermark`         | highest id seen, integer        |
//! | `TimestampWatermark`  | last change time, RFC 3339      |
//! | `ContentDiff`         | JSON list of tracked entities   |
//! | `ProcessedSet`        | JSON set of processed ids       |

pub mod content_diff;
pub mod id_watermark;
pub mod processed_set;
pub mod timestamp;

use async_trait::async_trait;
use bugwarden_core::config::DetectorConfig;
use bugwarden_core::error::Result;
use bugwarden_core::traits::Tracker;
use bugwarden_core::types::{ExternalRecord, RecordQuery, Transition};
use chrono::{DateTime, Utc};

pub use content_diff::ContentDiff;
pub use id_watermark::IdWatermark;
pub use processed_set::ProcessedSet;
pub use timestamp::TimestampWatermark;

/// A candidate that needs side effects.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub record: ExternalRecord,
    /// Field transitions behind the change; empty for detectors that only
    /// track identity.
    pub transitions: Vec<Transition>,
}

impl Change {
    pub fn new(record: ExternalRecord) -> Self {
        Self {
            record,
            transitions: Vec::new(),
        }
    }
}

/// Result of classifying one batch of candidates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    pub changes: Vec<Change>,
    /// Encoded cursor to commit once side effects were attempted.
    pub next: String,
}

#[async_trait]
pub trait ChangeDetector: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Cursor name within the workflow scope.
    fn cursor_name(&self) -> &'static str;

    /// Narrow the workflow's base query using the stored cursor.
    fn query(&self, base: &RecordQuery, cursor: &str, now: DateTime<Utc>) -> RecordQuery;

    /// Classify candidates against the cursor. Any error here is a fetch
    /// failure and aborts the run.
    async fn detect(
        &self,
        cursor: &str,
        candidates: Vec<ExternalRecord>,
        tracker: &dyn Tracker,
        now: DateTime<Utc>,
    ) -> Result<Detection>;

    /// Cursor to commit, given the ids whose side effects succeeded.
    fn settle(&self, _cursor: &str, detection: &Detection, _succeeded: &[u64]) -> Result<String> {
        Ok(detection.next.clone())
    }
}

/// Build the detector a workflow is configured with.
pub fn detector_from_config(config: &DetectorConfig) -> Box<dyn ChangeDetector> {
    match config {
        DetectorConfig::IdWatermark { bootstrap_hours } => {
            Box::new(IdWatermark::new(*bootstrap_hours))
        }
        DetectorConfig::TimestampWatermark {
            fields,
            lookback_days,
        } => Box::new(TimestampWatermark::new(fields.clone(), *lookback_days)),
        DetectorConfig::ContentDiff { field, watch } => {
            Box::new(ContentDiff::new(field, watch.clone()))
        }
        DetectorConfig::ProcessedSet => Box::new(ProcessedSet),
    }
}

/// Transitions recorded in a record's history, optionally limited to one
/// field.
pub(crate) fn transitions_of(
    history: &[bugwarden_core::types::HistoryEntry],
    field: Option<&str>,
) -> Vec<Transition> {
    history
        .iter()
        .flat_map(|entry| {
            entry
                .changes
                .iter()
                .filter(move |c| field.is_none_or(|f| c.field == f))
                .map(move |c| Transition {
                    at: entry.when,
                    from: c.removed.clone(),
                    to: c.added.clone(),
                })
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use bugwarden_core::types::{ExternalRecord, FieldChange, HistoryEntry};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    /// 2026-03-01 12:00 UTC plus `minutes`.
    pub fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    pub fn record(id: u64, changed: DateTime<Utc>) -> ExternalRecord {
        let mut r = bugwarden_tracker::memory::sample_record(id);
        r.creation_time = at(-60);
        r.last_change_time = changed;
        r.assignee = "owner@example.com".into();
        r
    }

    pub fn change(when: DateTime<Utc>, who: &str, field: &str, from: &str, to: &str) -> HistoryEntry {
        HistoryEntry {
            when,
            who: who.into(),
            changes: vec![FieldChange {
                field: field.into(),
                removed: from.into(),
                added: to.into(),
            }],
        }
    }
}
