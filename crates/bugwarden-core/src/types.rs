//! Domain types shared between the tracker, chat and triage crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Snapshot of one tracked issue as returned by a single fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalRecord {
    pub id: u64,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub resolution: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub product: String,
    #[serde(default)]
    pub component: String,
    #[serde(default)]
    pub assignee: String,
    #[serde(default)]
    pub whiteboard: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub creation_time: DateTime<Utc>,
    pub last_change_time: DateTime<Utc>,
    #[serde(default)]
    pub flags: Vec<Flag>,
    /// Custom fields requested through `RecordQuery::include_fields`.
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ExternalRecord {
    /// Revision tag used to validate cached sub-resources.
    pub fn revision(&self) -> String {
        self.last_change_time.to_rfc3339()
    }

    pub fn is_open(&self) -> bool {
        self.resolution.is_empty()
    }

    /// Pending requests of a flag (e.g. `needinfo?`), by requestee.
    pub fn requestees(&self, flag_name: &str) -> Vec<&str> {
        self.flags
            .iter()
            .filter(|f| f.name == flag_name && f.status == "?")
            .filter_map(|f| f.requestee.as_deref())
            .collect()
    }
}

/// A tracker flag such as `needinfo?(someone)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flag {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub setter: String,
    #[serde(default)]
    pub requestee: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub author: String,
    pub text: String,
    pub creation_time: DateTime<Utc>,
}

/// One append-only history step on a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub when: DateTime<Utc>,
    pub who: String,
    pub changes: Vec<FieldChange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    #[serde(default)]
    pub removed: String,
    #[serde(default)]
    pub added: String,
}

/// A detected change of one field value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Transition {
    pub at: DateTime<Utc>,
    pub from: String,
    pub to: String,
}

/// Structured tracker search. Empty filters are not sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordQuery {
    pub classification: Vec<String>,
    pub product: Vec<String>,
    pub component: Vec<String>,
    pub status: Vec<String>,
    pub resolution: Vec<String>,
    pub severity: Vec<String>,
    pub priority: Vec<String>,
    pub assignee: Vec<String>,
    pub keywords: Vec<String>,
    /// Arbitrary tracker-side filters, e.g. `cf_status_firefox120 = "affected"`.
    pub custom: BTreeMap<String, String>,
    pub id_after: Option<u64>,
    pub created_since: Option<DateTime<Utc>>,
    pub changed_since: Option<DateTime<Utc>>,
    pub include_fields: Vec<String>,
    pub limit: Option<u32>,
}

impl RecordQuery {
    /// Client-side check of the structured filters. Used by in-memory
    /// trackers and as a guard after a remote search.
    pub fn matches(&self, record: &ExternalRecord) -> bool {
        fn within(values: &[String], value: &str) -> bool {
            values.is_empty() || values.iter().any(|v| v == value)
        }

        within(&self.product, &record.product)
            && within(&self.component, &record.component)
            && within(&self.status, &record.status)
            && within(&self.resolution, &record.resolution)
            && within(&self.severity, &record.severity)
            && within(&self.priority, &record.priority)
            && within(&self.assignee, &record.assignee)
            && self
                .keywords
                .iter()
                .all(|k| record.keywords.iter().any(|rk| rk == k))
            && self.id_after.is_none_or(|after| record.id > after)
            && self
                .created_since
                .is_none_or(|since| record.creation_time >= since)
            && self
                .changed_since
                .is_none_or(|since| record.last_change_time >= since)
    }
}

/// Partial field-change document for a tracker update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whiteboard: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<FlagChange>,
}

impl RecordUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagChange {
    pub name: String,
    /// `?`, `+`, `-` or `X` to clear.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requestee: Option<String>,
}

/// An outgoing chat message, optionally carrying action buttons.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub text: String,
    #[serde(default)]
    pub actions: Vec<ChatAction>,
}

impl ChatMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            actions: Vec::new(),
        }
    }

    pub fn with_action(mut self, action: ChatAction) -> Self {
        self.actions.push(action);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatAction {
    pub action_id: String,
    pub label: String,
    pub value: String,
}

/// Handle to a sent message, used to edit it in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel: String,
    pub ts: String,
}

/// Asynchronous interactive callback from the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEvent {
    pub action_id: String,
    pub value: String,
    /// Chat identifier of the user who clicked.
    pub user: String,
    /// Message that carried the action, when known.
    pub message: Option<MessageRef>,
}

/// Outcome of one job run, for logs and the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub job: String,
    pub candidates: usize,
    pub changes: usize,
    pub applied: usize,
    pub failed: usize,
    pub cursor_committed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: u64) -> ExternalRecord {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        ExternalRecord {
            id,
            summary: "crash on startup".into(),
            status: "NEW".into(),
            resolution: String::new(),
            severity: "S2".into(),
            priority: "P1".into(),
            product: "Core".into(),
            component: "Networking".into(),
            assignee: "nobody@example.com".into(),
            whiteboard: String::new(),
            keywords: vec!["regression".into()],
            creation_time: at,
            last_change_time: at,
            flags: vec![Flag {
                name: "needinfo".into(),
                status: "?".into(),
                setter: "a@example.com".into(),
                requestee: Some("b@example.com".into()),
            }],
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_query_matches_filters() {
        let r = record(10);
        let q = RecordQuery {
            product: vec!["Core".into()],
            keywords: vec!["regression".into()],
            id_after: Some(9),
            ..Default::default()
        };
        assert!(q.matches(&r));

        let q = RecordQuery {
            id_after: Some(10),
            ..Default::default()
        };
        assert!(!q.matches(&r));

        let q = RecordQuery {
            component: vec!["DOM".into()],
            ..Default::default()
        };
        assert!(!q.matches(&r));
    }

    #[test]
    fn test_requestees() {
        let r = record(1);
        assert_eq!(r.requestees("needinfo"), vec!["b@example.com"]);
        assert!(r.requestees("review").is_empty());
    }

    #[test]
    fn test_empty_update() {
        assert!(RecordUpdate::default().is_empty());
        let u = RecordUpdate {
            comment: Some("ping".into()),
            ..Default::default()
        };
        assert!(!u.is_empty());
    }
}
