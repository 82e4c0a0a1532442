//! # Bugwarden Channels
//! Chat platform access: the Slack client, decorators that stack on any
//! `ChatPlatform`, and the interactive-callback pipeline.

pub mod decorators;
pub mod interactive;
pub mod memory;
pub mod server;
pub mod slack;

use std::sync::Arc;

use bugwarden_core::config::BugwardenConfig;
use bugwarden_core::error::Result;
use bugwarden_core::traits::ChatPlatform;

pub use decorators::{LoggingChat, StagingChat};
pub use interactive::{ActionDispatcher, ActionHandler};
pub use memory::MemoryChat;
pub use server::interactions_router;
pub use slack::SlackClient;

/// Production chat chain: Slack, optionally redirected to staging, then
/// logging.
pub fn chat_from_config(config: &BugwardenConfig) -> Result<Arc<dyn ChatPlatform>> {
    let base: Arc<dyn ChatPlatform> = Arc::new(SlackClient::new(
        &config.chat.api_base,
        &config.chat.token,
        config.chat.request_timeout_secs,
    )?);
    Ok(with_layers(base, config))
}

/// Apply the configured layers on top of `base`.
pub fn with_layers(base: Arc<dyn ChatPlatform>, config: &BugwardenConfig) -> Arc<dyn ChatPlatform> {
    let mut chat = base;
    if config.staging.enabled && !config.staging.chat_channel.is_empty() {
        tracing::info!(
            "🧪 Staging mode: chat goes to {}",
            config.staging.chat_channel
        );
        chat = Arc::new(StagingChat::new(chat, &config.staging.chat_channel));
    }
    Arc::new(LoggingChat::new(chat))
}
