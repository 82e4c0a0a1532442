//! Scheduler Engine — the main loop that checks and fires jobs.
//! Uses tokio::interval for zero-overhead ticking (sleeps between checks).
//! Each firing runs as its own tokio task; jobs never share a run loop.

use std::sync::Arc;

use bugwarden_core::cancel::CancelSignal;
use bugwarden_core::config::OverlapPolicy;
use bugwarden_core::error::BugwardenError;
use bugwarden_core::traits::Job;
use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

use crate::tasks::{FireOutcome, ScheduledJob};

/// The scheduler engine — owns jobs and their in-flight runs.
pub struct SchedulerEngine {
    jobs: Vec<ScheduledJob>,
    cancel: CancelSignal,
    in_flight: JoinSet<()>,
}

impl SchedulerEngine {
    /// `cancel` is handed to every run so shutdown reaches in-progress work.
    pub fn new(cancel: CancelSignal) -> Self {
        Self {
            jobs: Vec::new(),
            cancel,
            in_flight: JoinSet::new(),
        }
    }

    /// Add a job.
    pub fn add_job(&mut self, job: ScheduledJob) {
        tracing::info!(
            "📅 Job added: '{}' [{}] next={}",
            job.name(),
            job.schedules
                .iter()
                .map(|s| s.expression())
                .collect::<Vec<_>>()
                .join(" | "),
            job.next_run
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".into())
        );
        self.jobs.push(job);
    }

    /// List all jobs.
    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }

    /// Number of spawned runs not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Tick — fire every job due at `now`.
    /// Returns the fired job names with what happened to each.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<(String, FireOutcome)> {
        // Reap finished runs.
        while self.in_flight.try_join_next().is_some() {}

        let mut fired = Vec::new();
        for idx in 0..self.jobs.len() {
            if !self.jobs[idx].should_run(now) {
                continue;
            }
            let outcome = self.fire(idx);

            let job = &mut self.jobs[idx];
            job.next_run = job.next_after(now);
            if outcome != FireOutcome::Skipped {
                job.last_run = Some(now);
                job.run_count += 1;
            }
            fired.push((job.name().to_string(), outcome));
        }
        fired
    }

    fn fire(&mut self, idx: usize) -> FireOutcome {
        let job = &self.jobs[idx];
        let runner = job.job.clone();
        let cancel = self.cancel.clone();

        match job.overlap {
            OverlapPolicy::Allow => {
                tracing::info!("🔔 Job fired: '{}'", job.name());
                self.in_flight.spawn(run_job(runner, cancel, None));
                FireOutcome::Started
            }
            OverlapPolicy::Skip => match job.gate.clone().try_lock_owned() {
                Ok(guard) => {
                    tracing::info!("🔔 Job fired: '{}'", job.name());
                    self.in_flight.spawn(run_job(runner, cancel, Some(guard)));
                    FireOutcome::Started
                }
                Err(_) => {
                    tracing::warn!(
                        "⏭️ Job '{}' skipped: previous run still in progress",
                        job.name()
                    );
                    FireOutcome::Skipped
                }
            },
            OverlapPolicy::Queue => {
                let busy = job.is_running();
                let gate = job.gate.clone();
                if busy {
                    tracing::info!("⏳ Job '{}' queued behind its previous run", job.name());
                } else {
                    tracing::info!("🔔 Job fired: '{}'", job.name());
                }
                self.in_flight.spawn(async move {
                    let guard = gate.lock_owned().await;
                    run_job(runner, cancel, Some(guard)).await;
                });
                if busy {
                    FireOutcome::Queued
                } else {
                    FireOutcome::Started
                }
            }
        }
    }

    /// Wait for every in-flight run to finish.
    pub async fn drain(&mut self) {
        let pending = self.in_flight.len();
        if pending > 0 {
            tracing::info!("⏳ Waiting for {pending} running job(s)");
        }
        while self.in_flight.join_next().await.is_some() {}
    }
}

/// Run one job to completion and log the outcome. `_gate` is released when
/// the run ends.
async fn run_job(job: Arc<dyn Job>, cancel: CancelSignal, _gate: Option<OwnedMutexGuard<()>>) {
    if cancel.is_cancelled() {
        tracing::info!("🛑 Job '{}' not started: shutting down", job.name());
        return;
    }
    // Every log line of one run carries the same run id.
    let span = tracing::info_span!("run", job = %job.name(), id = %Uuid::new_v4());
    let started = std::time::Instant::now();
    match job.run(cancel).instrument(span).await {
        Ok(report) => tracing::info!(
            "✅ Job '{}' done in {:?}: {} candidates, {} changes, {} applied",
            job.name(),
            started.elapsed(),
            report.candidates,
            report.changes,
            report.applied
        ),
        Err(e @ BugwardenError::SideEffects { .. }) => {
            tracing::warn!("⚠️ Job '{}' finished with failures: {e}", job.name())
        }
        Err(BugwardenError::Cancelled(reason)) => {
            tracing::info!("🛑 Job '{}' cancelled: {reason}", job.name())
        }
        Err(e) => tracing::error!("❌ Job '{}' failed: {e}", job.name()),
    }
}

/// Spawn-able scheduler loop. Ticks every `check_interval_secs` until
/// `cancel` fires, then waits for in-flight runs.
pub async fn spawn_scheduler(
    mut engine: SchedulerEngine,
    check_interval_secs: u64,
    mut cancel: CancelSignal,
) {
    tracing::info!(
        "⏰ Scheduler started: {} job(s), check every {}s",
        engine.jobs().len(),
        check_interval_secs
    );

    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(check_interval_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                engine.tick(Utc::now());
            }
            _ = cancel.cancelled() => break,
        }
    }

    tracing::info!("⏰ Scheduler stopping");
    engine.drain().await;
}
