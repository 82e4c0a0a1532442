//! "Take it" button: assigns the bug to whoever clicked.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bugwarden_channels::ActionHandler;
use bugwarden_core::error::{BugwardenError, Result};
use bugwarden_core::traits::Tracker;
use bugwarden_core::types::{ActionEvent, ChatMessage, RecordUpdate};

use crate::effects::CLAIM_ACTION;

pub struct ClaimHandler {
    tracker: Arc<dyn Tracker>,
    /// Chat user id → tracker login.
    users: BTreeMap<String, String>,
}

impl ClaimHandler {
    pub fn new(tracker: Arc<dyn Tracker>, users: BTreeMap<String, String>) -> Self {
        Self { tracker, users }
    }
}

#[async_trait]
impl ActionHandler for ClaimHandler {
    fn action_id(&self) -> &str {
        CLAIM_ACTION
    }

    async fn handle(&self, event: &ActionEvent) -> Result<Option<ChatMessage>> {
        let id: u64 = event
            .value
            .parse()
            .map_err(|_| BugwardenError::Config(format!("'{}' is not a bug id", event.value)))?;
        let login = self.users.get(&event.user).ok_or_else(|| {
            BugwardenError::Config(format!(
                "chat user {} has no tracker login in [chat.users]",
                event.user
            ))
        })?;

        let update = RecordUpdate {
            assignee: Some(login.clone()),
            status: Some("ASSIGNED".into()),
            ..Default::default()
        };
        self.tracker.update(id, &update).await?;
        tracing::info!("✋ Bug {id} claimed by {login}");
        Ok(Some(ChatMessage::text(format!("✋ Bug {id} claimed by {login}"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bugwarden_tracker::MemoryTracker;

    fn event(user: &str, value: &str) -> ActionEvent {
        ActionEvent {
            action_id: "claim".into(),
            value: value.into(),
            user: user.into(),
            message: None,
        }
    }

    fn handler(tracker: Arc<MemoryTracker>) -> ClaimHandler {
        let users = BTreeMap::from([("U123".to_string(), "alice@example.com".to_string())]);
        ClaimHandler::new(tracker, users)
    }

    #[tokio::test]
    async fn test_claim_assigns_to_mapped_login() {
        let tracker = Arc::new(MemoryTracker::new());
        let reply = handler(tracker.clone())
            .handle(&event("U123", "42"))
            .await
            .unwrap();

        assert_eq!(reply.unwrap().text, "✋ Bug 42 claimed by alice@example.com");
        let updates = tracker.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, 42);
        assert_eq!(updates[0].1.assignee.as_deref(), Some("alice@example.com"));
        assert_eq!(updates[0].1.status.as_deref(), Some("ASSIGNED"));
    }

    #[tokio::test]
    async fn test_unmapped_user_rejected() {
        let tracker = Arc::new(MemoryTracker::new());
        let err = handler(tracker.clone())
            .handle(&event("U999", "42"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("U999"));
        assert!(tracker.updates().is_empty());
    }

    #[tokio::test]
    async fn test_bad_value_rejected() {
        let tracker = Arc::new(MemoryTracker::new());
        assert!(handler(tracker).handle(&event("U123", "abc")).await.is_err());
    }

    #[tokio::test]
    async fn test_tracker_failure_propagates() {
        let tracker = Arc::new(MemoryTracker::new());
        tracker.fail_update_of(42);
        let err = handler(tracker).handle(&event("U123", "42")).await.unwrap_err();
        assert!(err.is_fetch_failure());
    }
}
