//! HTTP endpoint for Slack interactive callbacks.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use bugwarden_core::types::{ActionEvent, MessageRef};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tower_http::trace::TraceLayer;

use crate::interactive::ActionDispatcher;

type HmacSha256 = Hmac<Sha256>;

/// Requests older than this are treated as replays.
const MAX_SKEW_SECS: u64 = 300;

struct InteractionState {
    dispatcher: ActionDispatcher,
    signing_secret: String,
}

/// Router with `POST /slack/interactions` and `GET /health`.
pub fn interactions_router(dispatcher: ActionDispatcher, signing_secret: &str) -> Router {
    if signing_secret.is_empty() {
        tracing::warn!("⚠️ No chat signing secret configured; every callback will be rejected");
    }
    let state = Arc::new(InteractionState {
        dispatcher,
        signing_secret: signing_secret.to_string(),
    });
    Router::new()
        .route("/slack/interactions", post(interactions))
        .route("/health", get(|| async { "ok" }))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn interactions(
    State(state): State<Arc<InteractionState>>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let verified = verify_signature(
        &state.signing_secret,
        header(&headers, "x-slack-request-timestamp"),
        &body,
        header(&headers, "x-slack-signature"),
        chrono::Utc::now().timestamp(),
    );
    if !verified {
        tracing::warn!("🔒 Rejected callback with a bad signature");
        return StatusCode::UNAUTHORIZED;
    }

    let events = match decode_payload(&body) {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!("⚠️ Malformed interaction payload: {e}");
            return StatusCode::BAD_REQUEST;
        }
    };
    let total = events.len();
    let mut dropped = 0;
    for event in events {
        if !state.dispatcher.acknowledge(event) {
            dropped += 1;
        }
    }
    if dropped > 0 {
        tracing::warn!("⚠️ {dropped} of {total} action(s) not queued");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Check a Slack `v0` request signature: HMAC-SHA256 over
/// `v0:<timestamp>:<body>`, hex encoded after a `v0=` prefix.
pub fn verify_signature(
    secret: &str,
    timestamp: &str,
    body: &[u8],
    signature: &str,
    now: i64,
) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Ok(sent_at) = timestamp.parse::<i64>() else {
        return false;
    };
    if now.abs_diff(sent_at) > MAX_SKEW_SECS {
        return false;
    }
    let Some(expected) = signature
        .strip_prefix("v0=")
        .and_then(|h| hex::decode(h).ok())
    else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Signature header value for `body`, as Slack would send it.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);
    format!("v0={}", hex::encode(mac.finalize().into_bytes()))
}

// ─── Payload ──────────────────────────────────────────────

#[derive(Deserialize)]
struct InteractionForm {
    payload: String,
}

#[derive(Deserialize)]
struct BlockActions {
    #[serde(rename = "type")]
    kind: String,
    user: IdOnly,
    #[serde(default)]
    container: Option<Container>,
    #[serde(default)]
    actions: Vec<RawAction>,
}

#[derive(Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Deserialize)]
struct Container {
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default)]
    message_ts: Option<String>,
}

#[derive(Deserialize)]
struct RawAction {
    action_id: String,
    #[serde(default)]
    value: String,
}

fn decode_payload(body: &[u8]) -> Result<Vec<ActionEvent>, String> {
    let form: InteractionForm = serde_urlencoded::from_bytes(body).map_err(|e| e.to_string())?;
    let payload: BlockActions = serde_json::from_str(&form.payload).map_err(|e| e.to_string())?;
    if payload.kind != "block_actions" {
        tracing::debug!("🖱️ Ignoring '{}' interaction", payload.kind);
        return Ok(Vec::new());
    }

    let message = payload.container.and_then(|c| match (c.channel_id, c.message_ts) {
        (Some(channel), Some(ts)) => Some(MessageRef { channel, ts }),
        _ => None,
    });
    Ok(payload
        .actions
        .into_iter()
        .map(|a| ActionEvent {
            action_id: a.action_id,
            value: a.value,
            user: payload.user.id.clone(),
            message: message.clone(),
        })
        .collect())
}
