//! Reconciliation driver.
//!
//! One run is `fetch → detect → apply → commit`:
//! - a fetch or detect failure aborts the run and leaves the cursor alone
//! - cancellation is honoured between detect and apply, also without commit
//! - side effects are attempted for every change; failures are collected
//! - once effects were attempted the detector's cursor is always committed,
//!   then collected failures are returned as one error
//! - a failed commit is returned as is; collected failures are logged

use std::sync::Arc;

use async_trait::async_trait;
use bugwarden_core::cancel::CancelSignal;
use bugwarden_core::error::{BugwardenError, Result};
use bugwarden_core::traits::{Job, Tracker};
use bugwarden_core::types::{RecordQuery, RunReport};
use bugwarden_store::ScopedCursors;
use chrono::{DateTime, Utc};
use futures::future::join_all;

use crate::detect::ChangeDetector;
use crate::effects::EffectChain;

pub struct Workflow {
    pub name: String,
    pub query: RecordQuery,
    pub detector: Box<dyn ChangeDetector>,
    pub effects: EffectChain,
    pub tracker: Arc<dyn Tracker>,
    pub cursors: ScopedCursors,
}

impl Workflow {
    pub async fn reconcile(&self, cancel: &CancelSignal, now: DateTime<Utc>) -> Result<RunReport> {
        let cursor_name = self.detector.cursor_name();
        let cursor = self.cursors.read(cursor_name)?;

        // Fetch
        let query = self.detector.query(&self.query, &cursor, now);
        let candidates = self.tracker.search(&query).await.inspect_err(|e| {
            tracing::warn!("🚫 [{}] Fetch failed, cursor left at '{cursor}': {e}", self.name);
        })?;
        let fetched = candidates.len();

        // Detect
        let detection = self
            .detector
            .detect(&cursor, candidates, self.tracker.as_ref(), now)
            .await?;
        tracing::debug!(
            "🔍 [{}] {} candidate(s), {} change(s) via {}",
            self.name,
            fetched,
            detection.changes.len(),
            self.detector.kind()
        );

        if cancel.is_cancelled() {
            tracing::info!("🛑 [{}] Cancelled before applying side effects", self.name);
            return Err(BugwardenError::Cancelled(format!(
                "workflow '{}' before side effects",
                self.name
            )));
        }

        // Apply
        let outcomes = join_all(detection.changes.iter().map(|change| async move {
            (change.record.id, self.effects.apply(change).await)
        }))
        .await;

        let mut succeeded = Vec::new();
        let mut failures = Vec::new();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(()) => succeeded.push(id),
                Err(e) => failures.push(format!("bug {id}: {e}")),
            }
        }

        // Commit
        let committed = self
            .detector
            .settle(&cursor, &detection, &succeeded)
            .and_then(|next| self.cursors.write(cursor_name, &next));
        if let Err(e) = committed {
            if !failures.is_empty() {
                tracing::warn!(
                    "❌ [{}] Cursor {cursor_name} not committed after {} failed side effect(s): {}",
                    self.name,
                    failures.len(),
                    failures.join("; ")
                );
            }
            return Err(e);
        }

        let report = RunReport {
            job: self.name.clone(),
            candidates: fetched,
            changes: detection.changes.len(),
            applied: succeeded.len(),
            failed: failures.len(),
            cursor_committed: true,
        };

        if failures.is_empty() {
            tracing::info!(
                "✅ [{}] {} change(s) applied, cursor {cursor_name} committed",
                self.name,
                report.applied
            );
            Ok(report)
        } else {
            Err(BugwardenError::SideEffects {
                workflow: self.name.clone(),
                attempted: report.changes,
                failures,
            })
        }
    }
}

#[async_trait]
impl Job for Workflow {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, cancel: CancelSignal) -> Result<RunReport> {
        self.reconcile(&cancel, Utc::now()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::testing::{at, change, record};
    use crate::detect::{ContentDiff, IdWatermark, ProcessedSet, TimestampWatermark};
    use crate::effects::UpdateRecord;
    use bugwarden_core::cancel::CancelHandle;
    use bugwarden_core::types::RecordUpdate;
    use bugwarden_store::{CursorStore, MemoryCursorStore};
    use bugwarden_tracker::MemoryTracker;

    struct Fixture {
        tracker: Arc<MemoryTracker>,
        store: Arc<MemoryCursorStore>,
    }

    impl Fixture {
        fn new(ids: &[u64]) -> Self {
            let tracker = Arc::new(MemoryTracker::new());
            for &id in ids {
                tracker.insert(record(id, at(0)));
            }
            Self {
                tracker,
                store: Arc::new(MemoryCursorStore::new()),
            }
        }

        fn workflow(&self, detector: Box<dyn ChangeDetector>) -> Workflow {
            Workflow {
                name: "new-bugs".into(),
                query: RecordQuery::default(),
                detector,
                effects: EffectChain::new().then(Box::new(UpdateRecord {
                    tracker: self.tracker.clone(),
                    update: RecordUpdate {
                        whiteboard: Some("[seen]".into()),
                        ..Default::default()
                    },
                })),
                tracker: self.tracker.clone(),
                cursors: ScopedCursors::new(self.store.clone(), "new-bugs"),
            }
        }

        fn cursor(&self, name: &str) -> String {
            self.store.get(&format!("new-bugs/{name}")).unwrap()
        }
    }

    #[tokio::test]
    async fn test_success_commits_cursor() {
        let f = Fixture::new(&[5, 9]);
        f.store.set("new-bugs/last_id", "4").unwrap();

        let report = f
            .workflow(Box::new(IdWatermark::new(24)))
            .reconcile(&CancelSignal::never(), at(10))
            .await
            .unwrap();

        assert_eq!(report.changes, 2);
        assert_eq!(report.applied, 2);
        assert!(report.cursor_committed);
        assert_eq!(f.cursor("last_id"), "9");
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_cursor() {
        let f = Fixture::new(&[5]);
        f.store.set("new-bugs/last_id", "4").unwrap();
        f.tracker.fail_searches(true);

        let err = f
            .workflow(Box::new(IdWatermark::new(24)))
            .reconcile(&CancelSignal::never(), at(10))
            .await
            .unwrap_err();

        assert!(err.is_fetch_failure());
        assert_eq!(f.cursor("last_id"), "4");
        assert!(f.tracker.updates().is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_still_commits_watermark() {
        let f = Fixture::new(&[5, 9]);
        f.store.set("new-bugs/last_id", "4").unwrap();
        f.tracker.fail_update_of(9);

        let err = f
            .workflow(Box::new(IdWatermark::new(24)))
            .reconcile(&CancelSignal::never(), at(10))
            .await
            .unwrap_err();

        match err {
            BugwardenError::SideEffects {
                attempted,
                failures,
                ..
            } => {
                assert_eq!(attempted, 2);
                assert_eq!(failures.len(), 1);
                assert!(failures[0].starts_with("bug 9:"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(f.cursor("last_id"), "9");
        assert_eq!(f.tracker.updates().len(), 1);
    }

    fn only_bug_9_failed(err: BugwardenError) {
        match err {
            BugwardenError::SideEffects { failures, .. } => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].starts_with("bug 9:"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_partial_failure_still_commits_timestamp() {
        let f = Fixture::new(&[]);
        f.tracker.insert(record(5, at(3)));
        f.tracker.insert(record(9, at(7)));
        for (id, when) in [(5, at(3)), (9, at(7))] {
            f.tracker
                .set_history(id, vec![change(when, "qa@example.com", "status", "NEW", "ASSIGNED")]);
        }
        f.store
            .set("new-bugs/last_change", &at(-10).to_rfc3339())
            .unwrap();
        f.tracker.fail_update_of(9);

        let err = f
            .workflow(Box::new(TimestampWatermark::new(Vec::new(), 7)))
            .reconcile(&CancelSignal::never(), at(10))
            .await
            .unwrap_err();

        only_bug_9_failed(err);
        assert_eq!(f.cursor("last_change"), at(7).to_rfc3339());
    }

    #[tokio::test]
    async fn test_partial_failure_still_commits_tracked_set() {
        let field = "cf_tracking_firefox120";
        let f = Fixture::new(&[5, 9]);
        for id in [5, 9] {
            f.tracker
                .set_history(id, vec![change(at(2), "rm@example.com", field, "?", "+")]);
        }
        f.tracker.fail_update_of(9);

        let err = f
            .workflow(Box::new(ContentDiff::new(field, vec!["+".into()])))
            .reconcile(&CancelSignal::never(), at(10))
            .await
            .unwrap_err();

        only_bug_9_failed(err);
        let tracked = ContentDiff::decode(&f.cursor("tracked"));
        assert_eq!(tracked.keys().copied().collect::<Vec<_>>(), vec![5, 9]);
    }

    struct ReadOnlyCursors;

    impl CursorStore for ReadOnlyCursors {
        fn get(&self, _key: &str) -> Result<String> {
            Ok(String::new())
        }
        fn set(&self, key: &str, _value: &str) -> Result<()> {
            Err(BugwardenError::Cursor(format!("{key}: read-only")))
        }
        fn list(&self, _prefix: &str) -> Result<Vec<(String, String)>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_commit_failure_is_returned() {
        let f = Fixture::new(&[5, 9]);
        f.tracker.fail_update_of(9);
        let mut workflow = f.workflow(Box::new(ProcessedSet));
        workflow.cursors = ScopedCursors::new(Arc::new(ReadOnlyCursors), "new-bugs");

        let err = workflow
            .reconcile(&CancelSignal::never(), at(10))
            .await
            .unwrap_err();

        assert!(matches!(err, BugwardenError::Cursor(_)));
        assert_eq!(f.tracker.updates().len(), 1);
    }

    #[tokio::test]
    async fn test_processed_set_marks_only_successes() {
        let f = Fixture::new(&[5, 9]);
        f.tracker.fail_update_of(9);
        let workflow = f.workflow(Box::new(ProcessedSet));

        assert!(workflow.reconcile(&CancelSignal::never(), at(10)).await.is_err());
        assert_eq!(f.cursor("processed"), "[5]");

        // 9 is retried; 5 is not touched again.
        assert!(workflow.reconcile(&CancelSignal::never(), at(20)).await.is_err());
        let touched: Vec<u64> = f.tracker.updates().iter().map(|(id, _)| *id).collect();
        assert_eq!(touched, vec![5]);
    }

    #[tokio::test]
    async fn test_cancel_before_apply_skips_commit() {
        let f = Fixture::new(&[5]);
        f.store.set("new-bugs/last_id", "4").unwrap();
        let (handle, signal) = CancelHandle::new();
        handle.cancel();

        let err = f
            .workflow(Box::new(IdWatermark::new(24)))
            .reconcile(&signal, at(10))
            .await
            .unwrap_err();

        assert!(matches!(err, BugwardenError::Cancelled(_)));
        assert_eq!(f.cursor("last_id"), "4");
        assert!(f.tracker.updates().is_empty());
    }

    #[tokio::test]
    async fn test_runs_as_job() {
        let f = Fixture::new(&[]);
        let workflow = f.workflow(Box::new(IdWatermark::new(24)));
        let report = Job::run(&workflow, CancelSignal::never()).await.unwrap();
        assert_eq!(report.job, "new-bugs");
        assert_eq!(report.changes, 0);
        assert_eq!(f.cursor("last_id"), "0");
    }
}
