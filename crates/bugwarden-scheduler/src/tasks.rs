//! Scheduled job definitions — one job, one or more cron schedules.

use std::sync::Arc;

use bugwarden_core::config::OverlapPolicy;
use bugwarden_core::error::{BugwardenError, Result};
use bugwarden_core::traits::Job;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::cron::CronSchedule;

/// A job bound to its schedules.
pub struct ScheduledJob {
    pub job: Arc<dyn Job>,
    pub schedules: Vec<CronSchedule>,
    pub overlap: OverlapPolicy,
    /// Last firing time.
    pub last_run: Option<DateTime<Utc>>,
    /// Next firing time across all schedules.
    pub next_run: Option<DateTime<Utc>>,
    /// How many times this job has fired (skipped firings excluded).
    pub run_count: u64,
    pub enabled: bool,
    /// Held for the duration of a run; enforces the overlap policy.
    pub(crate) gate: Arc<Mutex<()>>,
}

/// What a firing did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// A run task was spawned and starts immediately.
    Started,
    /// A run task was spawned and waits for the previous run.
    Queued,
    /// Previous run still active; nothing spawned.
    Skipped,
}

impl ScheduledJob {
    /// Parse every expression up front; a bad one rejects the whole job.
    pub fn new(
        job: Arc<dyn Job>,
        expressions: &[String],
        overlap: OverlapPolicy,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if expressions.is_empty() {
            return Err(BugwardenError::Schedule(format!(
                "job '{}' has no schedules",
                job.name()
            )));
        }
        let schedules = expressions
            .iter()
            .map(|e| CronSchedule::parse(e))
            .collect::<Result<Vec<_>>>()?;
        let mut scheduled = Self {
            job,
            schedules,
            overlap,
            last_run: None,
            next_run: None,
            run_count: 0,
            enabled: true,
            gate: Arc::new(Mutex::new(())),
        };
        scheduled.next_run = scheduled.next_after(now);
        Ok(scheduled)
    }

    pub fn name(&self) -> &str {
        self.job.name()
    }

    /// Earliest next firing over all schedules.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules.iter().filter_map(|s| s.next_after(after)).min()
    }

    /// Check if this job should fire at `now`.
    pub fn should_run(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_run.is_some_and(|next| now >= next)
    }

    /// True while a run holds the gate.
    pub fn is_running(&self) -> bool {
        self.gate.try_lock().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bugwarden_core::cancel::CancelSignal;
    use bugwarden_core::types::RunReport;
    use chrono::TimeZone;

    struct Noop;

    #[async_trait]
    impl Job for Noop {
        fn name(&self) -> &str {
            "noop"
        }
        async fn run(&self, _cancel: CancelSignal) -> Result<RunReport> {
            Ok(RunReport::default())
        }
    }

    #[test]
    fn test_next_run_is_min_over_schedules() {
        let now = Utc.with_ymd_and_hms(2026, 2, 23, 8, 10, 0).unwrap();
        let job = ScheduledJob::new(
            Arc::new(Noop),
            &["0 15 * * *".to_string(), "30 8 * * *".to_string()],
            OverlapPolicy::Skip,
            now,
        )
        .unwrap();
        assert_eq!(
            job.next_run,
            Some(Utc.with_ymd_and_hms(2026, 2, 23, 8, 30, 0).unwrap())
        );
        assert!(!job.should_run(now));
        assert!(job.should_run(Utc.with_ymd_and_hms(2026, 2, 23, 8, 30, 0).unwrap()));
    }

    #[test]
    fn test_bad_expression_rejects_job() {
        let err = ScheduledJob::new(
            Arc::new(Noop),
            &["0 8 * * *".to_string(), "nope".to_string()],
            OverlapPolicy::Skip,
            Utc::now(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, BugwardenError::Schedule(_)));
    }

    #[test]
    fn test_disabled_never_runs() {
        let mut job =
            ScheduledJob::new(Arc::new(Noop), &["* * * * *".to_string()], OverlapPolicy::Skip, Utc::now())
                .unwrap();
        job.enabled = false;
        assert!(!job.should_run(Utc::now() + chrono::Duration::hours(1)));
    }
}
