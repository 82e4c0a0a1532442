//! Side effects applied to each detected change.
//!
//! A workflow's actions form an [`EffectChain`]. Steps run in order for one
//! change and the first failing step fails that change; other changes are
//! unaffected.

use std::sync::Arc;

use async_trait::async_trait;
use bugwarden_core::error::{BugwardenError, Result};
use bugwarden_core::traits::{ChatPlatform, Tracker};
use bugwarden_core::types::{ChatAction, ChatMessage, RecordUpdate};

use crate::detect::Change;
use crate::groups::{self, GroupDefs};

/// Action id of the claim button attached to channel posts.
pub const CLAIM_ACTION: &str = "claim";

#[async_trait]
pub trait SideEffect: Send + Sync {
    /// Short label used in logs.
    fn describe(&self) -> String;

    async fn apply(&self, change: &Change) -> Result<()>;
}

/// Chat text for one change: headline, link and any transitions.
pub fn render_change(workflow: &str, change: &Change, link_base: &str) -> String {
    let r = &change.record;
    let mut text = format!(
        "*[{workflow}]* Bug {} ({} :: {}) {}\n{}/show_bug.cgi?id={}",
        r.id,
        r.product,
        r.component,
        r.summary,
        link_base.trim_end_matches('/'),
        r.id
    );
    for t in &change.transitions {
        text.push_str(&format!(
            "\n• {}: {} → {}",
            t.at.format("%Y-%m-%d %H:%M"),
            display(&t.from),
            display(&t.to)
        ));
    }
    text
}

fn display(value: &str) -> &str {
    if value.is_empty() { "(none)" } else { value }
}

// ─── Chat ─────────────────────────────────────────────────

pub struct PostToChannel {
    pub chat: Arc<dyn ChatPlatform>,
    pub channel: String,
    pub claim_button: bool,
    pub workflow: String,
    pub link_base: String,
}

#[async_trait]
impl SideEffect for PostToChannel {
    fn describe(&self) -> String {
        format!("post to {}", self.channel)
    }

    async fn apply(&self, change: &Change) -> Result<()> {
        let mut message = ChatMessage::text(render_change(&self.workflow, change, &self.link_base));
        if self.claim_button {
            message = message.with_action(ChatAction {
                action_id: CLAIM_ACTION.into(),
                label: "Take it".into(),
                value: change.record.id.to_string(),
            });
        }
        self.chat.post(&self.channel, &message).await?;
        Ok(())
    }
}

/// Direct message to every member of the given tokens. Groups are
/// resolved on each apply so config reloads are picked up.
pub struct DirectToGroup {
    pub chat: Arc<dyn ChatPlatform>,
    pub groups: Arc<GroupDefs>,
    pub tokens: Vec<String>,
    pub workflow: String,
    pub link_base: String,
}

#[async_trait]
impl SideEffect for DirectToGroup {
    fn describe(&self) -> String {
        format!("direct to {}", self.tokens.join(", "))
    }

    async fn apply(&self, change: &Change) -> Result<()> {
        let recipients = groups::resolve(&self.groups, &self.tokens);
        if recipients.is_empty() {
            tracing::warn!("⚠️ {} resolves to nobody, nothing sent", self.describe());
            return Ok(());
        }

        let message = ChatMessage::text(render_change(&self.workflow, change, &self.link_base));
        let mut failed = Vec::new();
        for recipient in &recipients {
            if let Err(e) = self.chat.direct(recipient, &message).await {
                failed.push(format!("{recipient}: {e}"));
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(BugwardenError::chat(format!(
                "{} of {} direct messages failed ({})",
                failed.len(),
                recipients.len(),
                failed.join("; ")
            )))
        }
    }
}

// ─── Tracker ──────────────────────────────────────────────

pub struct UpdateRecord {
    pub tracker: Arc<dyn Tracker>,
    pub update: RecordUpdate,
}

#[async_trait]
impl SideEffect for UpdateRecord {
    fn describe(&self) -> String {
        "update record".into()
    }

    async fn apply(&self, change: &Change) -> Result<()> {
        self.tracker.update(change.record.id, &self.update).await
    }
}

// ─── Chain ────────────────────────────────────────────────

/// Ordered steps for one change.
#[derive(Default)]
pub struct EffectChain {
    steps: Vec<Box<dyn SideEffect>>,
}

impl EffectChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, step: Box<dyn SideEffect>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub async fn apply(&self, change: &Change) -> Result<()> {
        for step in &self.steps {
            if let Err(e) = step.apply(change).await {
                tracing::warn!(
                    "❌ Bug {}: {} failed: {e}",
                    change.record.id,
                    step.describe()
                );
                return Err(e);
            }
        }
        Ok(())
    }
}
