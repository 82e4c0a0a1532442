//! Chat decorators, stacked the same way as the tracker ones.

use std::sync::Arc;

use async_trait::async_trait;
use bugwarden_core::error::Result;
use bugwarden_core::traits::ChatPlatform;
use bugwarden_core::types::{ChatMessage, MessageRef};

/// Logs every outgoing message.
pub struct LoggingChat {
    inner: Arc<dyn ChatPlatform>,
}

impl LoggingChat {
    pub fn new(inner: Arc<dyn ChatPlatform>) -> Self {
        Self { inner }
    }
}

fn preview(text: &str) -> String {
    let first = text.lines().next().unwrap_or_default();
    if first.chars().count() > 80 {
        format!("{}…", first.chars().take(80).collect::<String>())
    } else {
        first.to_string()
    }
}

#[async_trait]
impl ChatPlatform for LoggingChat {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn post(&self, channel: &str, message: &ChatMessage) -> Result<MessageRef> {
        let result = self.inner.post(channel, message).await;
        match &result {
            Ok(_) => tracing::info!("💬 {channel} ← {}", preview(&message.text)),
            Err(e) => tracing::warn!("💬 Post to {channel} failed: {e}"),
        }
        result
    }

    async fn direct(&self, recipient: &str, message: &ChatMessage) -> Result<MessageRef> {
        let result = self.inner.direct(recipient, message).await;
        match &result {
            Ok(_) => tracing::info!("💬 DM {recipient} ← {}", preview(&message.text)),
            Err(e) => tracing::warn!("💬 DM to {recipient} failed: {e}"),
        }
        result
    }

    async fn update(&self, target: &MessageRef, message: &ChatMessage) -> Result<()> {
        let result = self.inner.update(target, message).await;
        if let Err(e) = &result {
            tracing::warn!("💬 Update of {}/{} failed: {e}", target.channel, target.ts);
        }
        result
    }
}

/// Sends every post and DM to one staging channel, prefixed with where it
/// would have gone.
pub struct StagingChat {
    inner: Arc<dyn ChatPlatform>,
    channel: String,
}

impl StagingChat {
    pub fn new(inner: Arc<dyn ChatPlatform>, channel: &str) -> Self {
        Self {
            inner,
            channel: channel.to_string(),
        }
    }

    fn redirect(&self, destination: &str, message: &ChatMessage) -> ChatMessage {
        ChatMessage {
            text: format!("[staging → {destination}] {}", message.text),
            actions: message.actions.clone(),
        }
    }
}

#[async_trait]
impl ChatPlatform for StagingChat {
    fn name(&self) -> &str {
        "staging"
    }

    async fn post(&self, channel: &str, message: &ChatMessage) -> Result<MessageRef> {
        self.inner
            .post(&self.channel, &self.redirect(channel, message))
            .await
    }

    async fn direct(&self, recipient: &str, message: &ChatMessage) -> Result<MessageRef> {
        self.inner
            .post(&self.channel, &self.redirect(&format!("DM {recipient}"), message))
            .await
    }

    async fn update(&self, target: &MessageRef, message: &ChatMessage) -> Result<()> {
        // Targets were already created in the staging channel.
        self.inner.update(target, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryChat;

    #[tokio::test]
    async fn test_staging_redirects_posts_and_dms() {
        let memory = Arc::new(MemoryChat::new());
        let chat = StagingChat::new(memory.clone(), "#bot-staging");

        chat.post("#triage", &ChatMessage::text("new bug")).await.unwrap();
        chat.direct("alice@example.com", &ChatMessage::text("ping"))
            .await
            .unwrap();

        let posts = memory.posts();
        assert_eq!(posts.len(), 2);
        assert!(posts.iter().all(|(channel, _)| channel == "#bot-staging"));
        assert_eq!(posts[0].1.text, "[staging → #triage] new bug");
        assert_eq!(posts[1].1.text, "[staging → DM alice@example.com] ping");
        assert!(memory.directs().is_empty());
    }

    #[test]
    fn test_preview_truncates_first_line() {
        assert_eq!(preview("one\ntwo"), "one");
        let long = "x".repeat(100);
        assert_eq!(preview(&long).chars().count(), 81);
    }
}
