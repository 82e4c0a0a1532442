//! Slack Web API client — channel posts, DMs and in-place updates.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bugwarden_core::error::{BugwardenError, Result};
use bugwarden_core::traits::ChatPlatform;
use bugwarden_core::types::{ChatMessage, MessageRef};
use serde::Deserialize;
use tokio::sync::Mutex;

/// Slack bot client.
pub struct SlackClient {
    api_base: String,
    token: String,
    client: reqwest::Client,
    /// Recipient (user id or email) → DM channel id.
    dm_channels: Mutex<HashMap<String, String>>,
}

impl SlackClient {
    pub fn new(api_base: &str, token: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BugwardenError::Http(format!("Slack client: {e}")))?;
        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
            dm_channels: Mutex::new(HashMap::new()),
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base, method)
    }

    /// Call a Web API method with a JSON body and check the `ok` envelope.
    async fn call(&self, method: &str, body: &serde_json::Value) -> Result<SlackResponse> {
        let response = self
            .client
            .post(self.api_url(method))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| BugwardenError::chat(format!("{method} failed: {e}")))?;

        let body: SlackResponse = response
            .json()
            .await
            .map_err(|e| BugwardenError::chat(format!("Invalid {method} response: {e}")))?;

        if !body.ok {
            return Err(BugwardenError::chat(format!(
                "{method}: {}",
                body.error.as_deref().unwrap_or("unknown error")
            )));
        }
        Ok(body)
    }

    /// Resolve an email to a Slack user id; ids pass through.
    async fn user_id(&self, recipient: &str) -> Result<String> {
        if !recipient.contains('@') {
            return Ok(recipient.to_string());
        }
        let response = self
            .client
            .get(self.api_url("users.lookupByEmail"))
            .bearer_auth(&self.token)
            .query(&[("email", recipient)])
            .send()
            .await
            .map_err(|e| BugwardenError::chat(format!("users.lookupByEmail failed: {e}")))?;
        let body: SlackResponse = response
            .json()
            .await
            .map_err(|e| BugwardenError::chat(format!("Invalid lookup response: {e}")))?;
        match body.user {
            Some(user) if body.ok => Ok(user.id),
            _ => Err(BugwardenError::chat(format!(
                "no Slack user for {recipient}: {}",
                body.error.as_deref().unwrap_or("not found")
            ))),
        }
    }

    /// DM channel with `recipient`, opened once and remembered.
    async fn dm_channel(&self, recipient: &str) -> Result<String> {
        if let Some(channel) = self.dm_channels.lock().await.get(recipient) {
            return Ok(channel.clone());
        }
        let user = self.user_id(recipient).await?;
        let body = self
            .call("conversations.open", &serde_json::json!({ "users": user }))
            .await?;
        let channel = body
            .channel
            .and_then(|c| c.into_id())
            .ok_or_else(|| BugwardenError::chat("conversations.open returned no channel"))?;
        self.dm_channels
            .lock()
            .await
            .insert(recipient.to_string(), channel.clone());
        Ok(channel)
    }

    async fn post_to(&self, channel: &str, message: &ChatMessage) -> Result<MessageRef> {
        let mut body = render(message);
        body["channel"] = channel.into();
        let response = self.call("chat.postMessage", &body).await?;
        Ok(MessageRef {
            channel: response
                .channel
                .and_then(|c| c.into_id())
                .unwrap_or_else(|| channel.to_string()),
            ts: response.ts.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl ChatPlatform for SlackClient {
    fn name(&self) -> &str {
        "slack"
    }

    async fn post(&self, channel: &str, message: &ChatMessage) -> Result<MessageRef> {
        self.post_to(channel, message).await
    }

    async fn direct(&self, recipient: &str, message: &ChatMessage) -> Result<MessageRef> {
        let channel = self.dm_channel(recipient).await?;
        self.post_to(&channel, message).await
    }

    async fn update(&self, target: &MessageRef, message: &ChatMessage) -> Result<()> {
        let mut body = render(message);
        body["channel"] = target.channel.as_str().into();
        body["ts"] = target.ts.as_str().into();
        self.call("chat.update", &body).await?;
        Ok(())
    }
}

/// Message body with Block Kit buttons for any actions. `text` stays set as
/// the notification fallback.
pub fn render(message: &ChatMessage) -> serde_json::Value {
    let mut body = serde_json::json!({ "text": message.text });
    if message.actions.is_empty() {
        body["blocks"] = serde_json::json!([]);
        return body;
    }
    let buttons: Vec<_> = message
        .actions
        .iter()
        .map(|a| {
            serde_json::json!({
                "type": "button",
                "text": { "type": "plain_text", "text": a.label },
                "action_id": a.action_id,
                "value": a.value,
            })
        })
        .collect();
    body["blocks"] = serde_json::json!([
        { "type": "section", "text": { "type": "mrkdwn", "text": message.text } },
        { "type": "actions", "elements": buttons },
    ]);
    body
}

// ─── Slack API types ─────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    channel: Option<SlackChannel>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    user: Option<SlackUser>,
}

/// `chat.postMessage` returns the channel as a bare id,
/// `conversations.open` as an object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SlackChannel {
    Id(String),
    Object { id: String },
}

impl SlackChannel {
    fn into_id(self) -> Option<String> {
        let id = match self {
            Self::Id(id) => id,
            Self::Object { id } => id,
        };
        if id.is_empty() { None } else { Some(id) }
    }
}

#[derive(Debug, Deserialize)]
struct SlackUser {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bugwarden_core::types::ChatAction;

    #[test]
    fn test_render_plain_text() {
        let body = render(&ChatMessage::text("hello"));
        assert_eq!(body["text"], "hello");
        assert_eq!(body["blocks"], serde_json::json!([]));
    }

    #[test]
    fn test_render_buttons() {
        let msg = ChatMessage::text("Bug 42 needs an owner").with_action(ChatAction {
            action_id: "claim".into(),
            label: "Take it".into(),
            value: "42".into(),
        });
        let body = render(&msg);
        assert_eq!(body["blocks"][1]["type"], "actions");
        let button = &body["blocks"][1]["elements"][0];
        assert_eq!(button["action_id"], "claim");
        assert_eq!(button["value"], "42");
        assert_eq!(button["text"]["text"], "Take it");
    }

    #[test]
    fn test_channel_shapes() {
        let posted: SlackResponse =
            serde_json::from_str(r#"{"ok":true,"channel":"C123","ts":"1.2"}"#).unwrap();
        assert_eq!(posted.channel.and_then(|c| c.into_id()).as_deref(), Some("C123"));

        let opened: SlackResponse =
            serde_json::from_str(r#"{"ok":true,"channel":{"id":"D9"}}"#).unwrap();
        assert_eq!(opened.channel.and_then(|c| c.into_id()).as_deref(), Some("D9"));

        let failed: SlackResponse =
            serde_json::from_str(r#"{"ok":false,"error":"channel_not_found"}"#).unwrap();
        assert!(!failed.ok);
        assert_eq!(failed.error.as_deref(), Some("channel_not_found"));
    }
}
