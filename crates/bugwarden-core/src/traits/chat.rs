//! Chat platform capability.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ChatMessage, MessageRef};

#[async_trait]
pub trait ChatPlatform: Send + Sync {
    fn name(&self) -> &str;

    /// Post to a channel.
    async fn post(&self, channel: &str, message: &ChatMessage) -> Result<MessageRef>;

    /// Direct message to a resolved recipient identifier.
    async fn direct(&self, recipient: &str, message: &ChatMessage) -> Result<MessageRef>;

    /// Replace a previously sent message in place.
    async fn update(&self, target: &MessageRef, message: &ChatMessage) -> Result<()>;
}
