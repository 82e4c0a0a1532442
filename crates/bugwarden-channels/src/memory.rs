//! In-memory chat platform that records what would have been sent.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bugwarden_core::error::{BugwardenError, Result};
use bugwarden_core::traits::ChatPlatform;
use bugwarden_core::types::{ChatMessage, MessageRef};

#[derive(Default)]
pub struct MemoryChat {
    posts: Mutex<Vec<(String, ChatMessage)>>,
    directs: Mutex<Vec<(String, ChatMessage)>>,
    updates: Mutex<Vec<(MessageRef, ChatMessage)>>,
    /// Channels or recipients that reject messages.
    unreachable: Mutex<Vec<String>>,
    seq: AtomicU64,
}

impl MemoryChat {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn make_unreachable(&self, destination: &str) {
        if let Ok(mut u) = self.unreachable.lock() {
            u.push(destination.to_string());
        }
    }

    pub fn posts(&self) -> Vec<(String, ChatMessage)> {
        self.posts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn directs(&self) -> Vec<(String, ChatMessage)> {
        self.directs.lock().map(|d| d.clone()).unwrap_or_default()
    }

    pub fn updates(&self) -> Vec<(MessageRef, ChatMessage)> {
        self.updates.lock().map(|u| u.clone()).unwrap_or_default()
    }

    fn check(&self, destination: &str) -> Result<()> {
        let unreachable = self
            .unreachable
            .lock()
            .map_err(|_| BugwardenError::chat("memory chat poisoned"))?;
        if unreachable.iter().any(|u| u == destination) {
            return Err(BugwardenError::chat(format!("{destination} unreachable")));
        }
        Ok(())
    }

    fn next_ref(&self, channel: &str) -> MessageRef {
        MessageRef {
            channel: channel.to_string(),
            ts: format!("{}.000100", self.seq.fetch_add(1, Ordering::SeqCst) + 1),
        }
    }

    fn record(
        log: &Mutex<Vec<(String, ChatMessage)>>,
        destination: &str,
        message: &ChatMessage,
    ) -> Result<()> {
        log.lock()
            .map_err(|_| BugwardenError::chat("memory chat poisoned"))?
            .push((destination.to_string(), message.clone()));
        Ok(())
    }
}

#[async_trait]
impl ChatPlatform for MemoryChat {
    fn name(&self) -> &str {
        "memory"
    }

    async fn post(&self, channel: &str, message: &ChatMessage) -> Result<MessageRef> {
        self.check(channel)?;
        Self::record(&self.posts, channel, message)?;
        Ok(self.next_ref(channel))
    }

    async fn direct(&self, recipient: &str, message: &ChatMessage) -> Result<MessageRef> {
        self.check(recipient)?;
        Self::record(&self.directs, recipient, message)?;
        Ok(self.next_ref(&format!("D-{recipient}")))
    }

    async fn update(&self, target: &MessageRef, message: &ChatMessage) -> Result<()> {
        self.check(&target.channel)?;
        self.updates
            .lock()
            .map_err(|_| BugwardenError::chat("memory chat poisoned"))?
            .push((target.clone(), message.clone()));
        Ok(())
    }
}
