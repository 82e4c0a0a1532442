//! Turns `[[workflows]]` and `[[escalations]]` into runnable jobs.

use std::sync::Arc;

use bugwarden_core::config::{ActionConfig, BugwardenConfig, EscalationConfig, WorkflowConfig};
use bugwarden_core::error::{BugwardenError, Result};
use bugwarden_core::traits::{ChatPlatform, Job, Tracker};
use bugwarden_scheduler::ScheduledJob;
use bugwarden_store::{CursorStore, ScopedCursors};
use chrono::{DateTime, Utc};

use crate::detect::detector_from_config;
use crate::driver::Workflow;
use crate::effects::{DirectToGroup, EffectChain, PostToChannel, UpdateRecord};
use crate::escalation::EscalationJob;
use crate::groups::GroupDefs;

/// Shared collaborators handed to every job.
#[derive(Clone)]
pub struct TriageContext {
    pub tracker: Arc<dyn Tracker>,
    pub chat: Arc<dyn ChatPlatform>,
    pub cursors: Arc<dyn CursorStore>,
    pub groups: Arc<GroupDefs>,
    /// Tracker web root used in chat links.
    pub link_base: String,
}

impl TriageContext {
    pub fn new(
        config: &BugwardenConfig,
        tracker: Arc<dyn Tracker>,
        chat: Arc<dyn ChatPlatform>,
        cursors: Arc<dyn CursorStore>,
    ) -> Self {
        Self {
            tracker,
            chat,
            cursors,
            groups: Arc::new(config.groups.clone()),
            link_base: config.tracker.base_url.clone(),
        }
    }
}

fn effects_for(wf: &WorkflowConfig, ctx: &TriageContext) -> EffectChain {
    wf.actions
        .iter()
        .fold(EffectChain::new(), |chain, action| match action {
            ActionConfig::Post {
                channel,
                claim_button,
            } => chain.then(Box::new(PostToChannel {
                chat: ctx.chat.clone(),
                channel: channel.clone(),
                claim_button: *claim_button,
                workflow: wf.name.clone(),
                link_base: ctx.link_base.clone(),
            })),
            ActionConfig::Direct { to } => chain.then(Box::new(DirectToGroup {
                chat: ctx.chat.clone(),
                groups: ctx.groups.clone(),
                tokens: to.clone(),
                workflow: wf.name.clone(),
                link_base: ctx.link_base.clone(),
            })),
            ActionConfig::Update { fields } => chain.then(Box::new(UpdateRecord {
                tracker: ctx.tracker.clone(),
                update: fields.clone(),
            })),
        })
}

pub fn build_workflow(wf: &WorkflowConfig, ctx: &TriageContext) -> Workflow {
    Workflow {
        name: wf.name.clone(),
        query: wf.query.clone(),
        detector: detector_from_config(&wf.detector),
        effects: effects_for(wf, ctx),
        tracker: ctx.tracker.clone(),
        cursors: ScopedCursors::new(ctx.cursors.clone(), &wf.name),
    }
}

pub fn build_escalation(esc: &EscalationConfig, ctx: &TriageContext) -> EscalationJob {
    EscalationJob {
        name: esc.name.clone(),
        tracker: ctx.tracker.clone(),
        chat: ctx.chat.clone(),
        groups: ctx.groups.clone(),
        group: esc.group.clone(),
        query: esc.query.clone(),
        count_by: esc.count_by,
        channel: esc.channel.clone(),
    }
}

/// Every configured job with its schedules. Disabled jobs are included
/// but never fire.
pub fn build_jobs(
    config: &BugwardenConfig,
    ctx: &TriageContext,
    now: DateTime<Utc>,
) -> Result<Vec<ScheduledJob>> {
    let mut jobs = Vec::new();
    for wf in &config.workflows {
        let overlap = wf.overlap.unwrap_or(config.scheduler.overlap);
        let mut job = ScheduledJob::new(Arc::new(build_workflow(wf, ctx)), &wf.schedules, overlap, now)?;
        job.enabled = wf.enabled;
        jobs.push(job);
    }
    for esc in &config.escalations {
        let mut job = ScheduledJob::new(
            Arc::new(build_escalation(esc, ctx)),
            &esc.schedules,
            config.scheduler.overlap,
            now,
        )?;
        job.enabled = esc.enabled;
        jobs.push(job);
    }
    tracing::debug!("🧩 Assembled {} job(s)", jobs.len());
    Ok(jobs)
}

/// A single job by name, for one-off runs.
pub fn find_job(config: &BugwardenConfig, ctx: &TriageContext, name: &str) -> Result<Arc<dyn Job>> {
    if let Some(wf) = config.workflows.iter().find(|w| w.name == name) {
        return Ok(Arc::new(build_workflow(wf, ctx)));
    }
    if let Some(esc) = config.escalations.iter().find(|e| e.name == name) {
        return Ok(Arc::new(build_escalation(esc, ctx)));
    }
    Err(BugwardenError::Config(format!("no workflow or escalation named '{name}'")))
}
