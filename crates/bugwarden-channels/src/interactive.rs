//! Interactive callbacks — acknowledge now, work later.
//!
//! The chat platform expects an answer within a few seconds, while a handler
//! may need several tracker round-trips. `acknowledge` only queues the event;
//! a worker runs the handler under its own timeout and reports failures back
//! to the user who clicked.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bugwarden_core::error::Result;
use bugwarden_core::traits::ChatPlatform;
use bugwarden_core::types::{ActionEvent, ChatMessage};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

const QUEUE_CAPACITY: usize = 64;

/// Handles one kind of interactive action, keyed by `action_id`.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    fn action_id(&self) -> &str;

    /// Run the action. `Some(message)` replaces the message that carried
    /// the button.
    async fn handle(&self, event: &ActionEvent) -> Result<Option<ChatMessage>>;
}

/// Front of the action queue. Cheap to clone into HTTP handlers.
#[derive(Clone)]
pub struct ActionDispatcher {
    tx: mpsc::Sender<ActionEvent>,
}

impl ActionDispatcher {
    /// Start the worker. It exits once every dispatcher clone is dropped and
    /// the queued work has finished.
    pub fn spawn(
        chat: Arc<dyn ChatPlatform>,
        handlers: Vec<Arc<dyn ActionHandler>>,
        timeout: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let handlers: HashMap<String, Arc<dyn ActionHandler>> = handlers
            .into_iter()
            .map(|h| (h.action_id().to_string(), h))
            .collect();
        let worker = tokio::spawn(run_worker(rx, Arc::new(handlers), chat, timeout));
        (Self { tx }, worker)
    }

    /// Queue `event` and return at once. `false` when the queue is full or
    /// the worker is gone.
    pub fn acknowledge(&self, event: ActionEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!("⚠️ Action queue full, dropping '{}'", event.action_id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::warn!("⚠️ Action worker stopped, dropping '{}'", event.action_id);
                false
            }
        }
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<ActionEvent>,
    handlers: Arc<HashMap<String, Arc<dyn ActionHandler>>>,
    chat: Arc<dyn ChatPlatform>,
    timeout: Duration,
) {
    tracing::info!("🖱️ Action worker started ({} handler(s))", handlers.len());
    let mut running = JoinSet::new();
    while let Some(event) = rx.recv().await {
        while running.try_join_next().is_some() {}
        running.spawn(process(event, handlers.clone(), chat.clone(), timeout));
    }
    while running.join_next().await.is_some() {}
    tracing::info!("🖱️ Action worker stopped");
}

async fn process(
    event: ActionEvent,
    handlers: Arc<HashMap<String, Arc<dyn ActionHandler>>>,
    chat: Arc<dyn ChatPlatform>,
    timeout: Duration,
) {
    let Some(handler) = handlers.get(&event.action_id) else {
        tracing::warn!("🖱️ No handler for action '{}'", event.action_id);
        report(&*chat, &event, "this button is no longer supported").await;
        return;
    };

    tracing::debug!("🖱️ '{}' from {}", event.action_id, event.user);
    match tokio::time::timeout(timeout, handler.handle(&event)).await {
        Ok(Ok(Some(replacement))) => {
            if let Some(target) = &event.message {
                if let Err(e) = chat.update(target, &replacement).await {
                    tracing::warn!("⚠️ Could not update message after '{}': {e}", event.action_id);
                }
            }
        }
        Ok(Ok(None)) => {}
        Ok(Err(e)) => {
            tracing::warn!("❌ Action '{}' failed: {e}", event.action_id);
            report(&*chat, &event, &e.to_string()).await;
        }
        Err(_) => {
            tracing::warn!("⏱️ Action '{}' timed out after {timeout:?}", event.action_id);
            report(&*chat, &event, &format!("timed out after {}s", timeout.as_secs())).await;
        }
    }
}

/// Tell the originating user their action did not go through.
async fn report(chat: &dyn ChatPlatform, event: &ActionEvent, reason: &str) {
    let text = format!(
        "⚠️ Your `{}` action ({}) did not complete: {reason}",
        event.action_id, event.value
    );
    if let Err(e) = chat.direct(&event.user, &ChatMessage::text(text)).await {
        tracing::error!("❌ Could not report failure to {}: {e}", event.user);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryChat;
    use bugwarden_core::error::BugwardenError;
    use bugwarden_core::types::MessageRef;

    struct Echo;

    #[async_trait]
    impl ActionHandler for Echo {
        fn action_id(&self) -> &str {
            "echo"
        }
        async fn handle(&self, event: &ActionEvent) -> Result<Option<ChatMessage>> {
            Ok(Some(ChatMessage::text(format!("done: {}", event.value))))
        }
    }

    struct Broken;

    #[async_trait]
    impl ActionHandler for Broken {
        fn action_id(&self) -> &str {
            "broken"
        }
        async fn handle(&self, _event: &ActionEvent) -> Result<Option<ChatMessage>> {
            Err(BugwardenError::tracker("bug 42: update rejected"))
        }
    }

    struct Slow;

    #[async_trait]
    impl ActionHandler for Slow {
        fn action_id(&self) -> &str {
            "slow"
        }
        async fn handle(&self, _event: &ActionEvent) -> Result<Option<ChatMessage>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(None)
        }
    }

    fn event(action_id: &str) -> ActionEvent {
        ActionEvent {
            action_id: action_id.into(),
            value: "42".into(),
            user: "U1".into(),
            message: Some(MessageRef {
                channel: "C1".into(),
                ts: "1.0".into(),
            }),
        }
    }

    async fn dispatch(events: &[&str]) -> Arc<MemoryChat> {
        let chat = Arc::new(MemoryChat::new());
        let handlers: Vec<Arc<dyn ActionHandler>> =
            vec![Arc::new(Echo), Arc::new(Broken), Arc::new(Slow)];
        let (dispatcher, worker) =
            ActionDispatcher::spawn(chat.clone(), handlers, Duration::from_millis(50));
        for id in events {
            assert!(dispatcher.acknowledge(event(id)));
        }
        drop(dispatcher);
        worker.await.unwrap();
        chat
    }

    #[tokio::test]
    async fn test_success_updates_message_in_place() {
        let chat = dispatch(&["echo"]).await;
        let updates = chat.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0.ts, "1.0");
        assert_eq!(updates[0].1.text, "done: 42");
        assert!(chat.directs().is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_reported_to_user() {
        let chat = dispatch(&["broken"]).await;
        let directs = chat.directs();
        assert_eq!(directs.len(), 1);
        assert_eq!(directs[0].0, "U1");
        assert!(directs[0].1.text.contains("update rejected"));
        assert!(chat.updates().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_is_reported_to_user() {
        let chat = dispatch(&["slow"]).await;
        let directs = chat.directs();
        assert_eq!(directs.len(), 1);
        assert!(directs[0].1.text.contains("timed out"));
    }

    #[tokio::test]
    async fn test_unknown_action_is_reported() {
        let chat = dispatch(&["nope"]).await;
        assert_eq!(chat.directs().len(), 1);
    }
}
