//! Bugzilla REST client.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bugwarden_core::error::{BugwardenError, Result};
use bugwarden_core::traits::Tracker;
use bugwarden_core::types::{
    Comment, ExternalRecord, FieldChange, Flag, HistoryEntry, RecordQuery, RecordUpdate,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Fields every fetched record needs, whatever the query asks for.
const BASE_FIELDS: [&str; 15] = [
    "id",
    "summary",
    "status",
    "resolution",
    "severity",
    "priority",
    "product",
    "component",
    "assigned_to",
    "whiteboard",
    "keywords",
    "creation_time",
    "last_change_time",
    "flags",
    "classification",
];

/// Bugzilla REST API client.
pub struct BugzillaClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl BugzillaClient {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| BugwardenError::Http(format!("Bugzilla client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/rest/{}", self.base_url, path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<T> {
        let mut req = self.client.get(self.url(path)).query(params);
        if !self.api_key.is_empty() {
            req = req.header("X-BUGZILLA-API-KEY", &self.api_key);
        }
        let response = req
            .send()
            .await
            .map_err(|e| BugwardenError::tracker(format!("GET {path} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BugwardenError::tracker(format!("GET {path}: {status} {body}")));
        }
        response
            .json()
            .await
            .map_err(|e| BugwardenError::tracker(format!("GET {path}: invalid response: {e}")))
    }
}

#[async_trait]
impl Tracker for BugzillaClient {
    fn name(&self) -> &str {
        "bugzilla"
    }

    async fn search(&self, query: &RecordQuery) -> Result<Vec<ExternalRecord>> {
        let params = search_params(query);
        let body: BugList = self.get_json("bug", &params).await?;
        body.bugs.into_iter().map(RawBug::into_record).collect()
    }

    async fn get(&self, id: u64) -> Result<Option<ExternalRecord>> {
        let params = vec![("include_fields".to_string(), include_fields(&[]))];
        let path = format!("bug/{id}");
        let mut req = self.client.get(self.url(&path)).query(&params);
        if !self.api_key.is_empty() {
            req = req.header("X-BUGZILLA-API-KEY", &self.api_key);
        }
        let response = req
            .send()
            .await
            .map_err(|e| BugwardenError::tracker(format!("GET {path} failed: {e}")))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BugwardenError::tracker(format!("GET {path}: {status} {body}")));
        }
        let body: BugList = response
            .json()
            .await
            .map_err(|e| BugwardenError::tracker(format!("GET {path}: invalid response: {e}")))?;
        body.bugs.into_iter().next().map(RawBug::into_record).transpose()
    }

    async fn comments(&self, record: &ExternalRecord) -> Result<Vec<Comment>> {
        let body: serde_json::Value = self
            .get_json(&format!("bug/{}/comment", record.id), &[])
            .await?;
        parse_comments(record.id, &body)
    }

    async fn history(&self, record: &ExternalRecord) -> Result<Vec<HistoryEntry>> {
        let body: HistoryList = self
            .get_json(&format!("bug/{}/history", record.id), &[])
            .await?;
        Ok(body
            .bugs
            .into_iter()
            .find(|b| b.id == record.id)
            .map(|b| b.history.into_iter().map(RawHistory::into_entry).collect())
            .unwrap_or_default())
    }

    async fn update(&self, id: u64, update: &RecordUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        let path = format!("bug/{id}");
        let mut req = self.client.put(self.url(&path)).json(&update_body(update));
        if !self.api_key.is_empty() {
            req = req.header("X-BUGZILLA-API-KEY", &self.api_key);
        }
        let response = req
            .send()
            .await
            .map_err(|e| BugwardenError::tracker(format!("PUT {path} failed: {e}")))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BugwardenError::tracker(format!("PUT {path}: {status} {body}")));
        }
        Ok(())
    }
}

// ─── Request building ─────────────────────────────────────

fn include_fields(extra: &[String]) -> String {
    let mut fields: Vec<&str> = BASE_FIELDS.to_vec();
    for f in extra {
        if !fields.contains(&f.as_str()) {
            fields.push(f);
        }
    }
    fields.join(",")
}

/// Translate a structured query into Bugzilla search parameters.
pub fn search_params(query: &RecordQuery) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut multi = |name: &str, values: &[String]| {
        for v in values {
            params.push((name.to_string(), v.clone()));
        }
    };
    multi("classification", &query.classification);
    multi("product", &query.product);
    multi("component", &query.component);
    multi("bug_status", &query.status);
    multi("resolution", &query.resolution);
    multi("bug_severity", &query.severity);
    multi("priority", &query.priority);
    multi("assigned_to", &query.assignee);

    if !query.keywords.is_empty() {
        params.push(("keywords".into(), query.keywords.join(",")));
        params.push(("keywords_type".into(), "allwords".into()));
    }
    for (field, value) in &query.custom {
        params.push((field.clone(), value.clone()));
    }
    if let Some(after) = query.id_after {
        params.push(("f1".into(), "bug_id".into()));
        params.push(("o1".into(), "greaterthan".into()));
        params.push(("v1".into(), after.to_string()));
    }
    if let Some(since) = query.created_since {
        params.push(("creation_time".into(), since.to_rfc3339()));
    }
    if let Some(since) = query.changed_since {
        params.push(("last_change_time".into(), since.to_rfc3339()));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".into(), limit.to_string()));
    }
    params.push(("include_fields".into(), include_fields(&query.include_fields)));
    params
}

fn update_body(update: &RecordUpdate) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    let mut put = |key: &str, value: &Option<String>| {
        if let Some(v) = value {
            body.insert(key.to_string(), serde_json::Value::String(v.clone()));
        }
    };
    put("status", &update.status);
    put("resolution", &update.resolution);
    put("priority", &update.priority);
    put("severity", &update.severity);
    put("whiteboard", &update.whiteboard);
    put("assigned_to", &update.assignee);
    if let Some(comment) = &update.comment {
        body.insert("comment".into(), serde_json::json!({ "body": comment }));
    }
    if !update.flags.is_empty() {
        body.insert("flags".into(), serde_json::json!(update.flags));
    }
    serde_json::Value::Object(body)
}

// ─── Response parsing ─────────────────────────────────────

#[derive(Deserialize)]
struct BugList {
    #[serde(default)]
    bugs: Vec<RawBug>,
}

#[derive(Deserialize)]
struct RawBug {
    id: u64,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    resolution: String,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    priority: String,
    #[serde(default)]
    product: String,
    #[serde(default)]
    component: String,
    #[serde(default)]
    assigned_to: String,
    #[serde(default)]
    whiteboard: String,
    #[serde(default)]
    keywords: Vec<String>,
    creation_time: Option<DateTime<Utc>>,
    last_change_time: Option<DateTime<Utc>>,
    #[serde(default)]
    flags: Vec<Flag>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_json::Value>,
}

impl RawBug {
    fn into_record(self) -> Result<ExternalRecord> {
        let (Some(creation_time), Some(last_change_time)) =
            (self.creation_time, self.last_change_time)
        else {
            return Err(BugwardenError::tracker(format!(
                "bug {} is missing timestamps",
                self.id
            )));
        };
        Ok(ExternalRecord {
            id: self.id,
            summary: self.summary,
            status: self.status,
            resolution: self.resolution,
            severity: self.severity,
            priority: self.priority,
            product: self.product,
            component: self.component,
            assignee: self.assigned_to,
            whiteboard: self.whiteboard,
            keywords: self.keywords,
            creation_time,
            last_change_time,
            flags: self.flags,
            extra: self.extra,
        })
    }
}

#[derive(Deserialize)]
struct HistoryList {
    #[serde(default)]
    bugs: Vec<RawBugHistory>,
}

#[derive(Deserialize)]
struct RawBugHistory {
    id: u64,
    #[serde(default)]
    history: Vec<RawHistory>,
}

#[derive(Deserialize)]
struct RawHistory {
    when: DateTime<Utc>,
    who: String,
    #[serde(default)]
    changes: Vec<RawChange>,
}

#[derive(Deserialize)]
struct RawChange {
    field_name: String,
    #[serde(default)]
    removed: String,
    #[serde(default)]
    added: String,
}

impl RawHistory {
    fn into_entry(self) -> HistoryEntry {
        HistoryEntry {
            when: self.when,
            who: self.who,
            changes: self
                .changes
                .into_iter()
                .map(|c| FieldChange {
                    field: c.field_name,
                    removed: c.removed,
                    added: c.added,
                })
                .collect(),
        }
    }
}

#[derive(Deserialize)]
struct RawComment {
    id: u64,
    creator: String,
    text: String,
    creation_time: DateTime<Utc>,
}

/// Comments live under `bugs.<id>.comments`.
fn parse_comments(id: u64, body: &serde_json::Value) -> Result<Vec<Comment>> {
    let Some(comments) = body["bugs"][id.to_string()]["comments"].as_array() else {
        return Ok(Vec::new());
    };
    comments
        .iter()
        .map(|c| -> Result<Comment> {
            let raw: RawComment = serde_json::from_value(c.clone())?;
            Ok(Comment {
                id: raw.id,
                author: raw.creator,
                text: raw.text,
                creation_time: raw.creation_time,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bugwarden_core::types::FlagChange;
    use chrono::TimeZone;

    #[test]
    fn test_search_params() {
        let query = RecordQuery {
            product: vec!["Core".into(), "Firefox".into()],
            severity: vec!["S1".into()],
            keywords: vec!["regression".into()],
            id_after: Some(1000),
            include_fields: vec!["cf_status_firefox120".into(), "id".into()],
            ..Default::default()
        };
        let params = search_params(&query);
        let has = |k: &str, v: &str| params.iter().any(|(pk, pv)| pk == k && pv == v);
        assert!(has("product", "Core"));
        assert!(has("product", "Firefox"));
        assert!(has("bug_severity", "S1"));
        assert!(has("keywords_type", "allwords"));
        assert!(has("o1", "greaterthan"));
        assert!(has("v1", "1000"));
        let fields = &params.iter().find(|(k, _)| k == "include_fields").unwrap().1;
        assert!(fields.ends_with(",cf_status_firefox120"));
        assert_eq!(fields.matches("id,").count(), 1);
    }

    #[test]
    fn test_parse_bug_with_extra_fields() {
        let body = serde_json::json!({
            "bugs": [{
                "id": 42,
                "summary": "Crash in necko",
                "status": "NEW",
                "resolution": "",
                "assigned_to": "dev@example.com",
                "creation_time": "2026-03-01T10:00:00Z",
                "last_change_time": "2026-03-02T11:30:00Z",
                "flags": [{"name": "needinfo", "status": "?", "setter": "a@x", "requestee": "b@x"}],
                "cf_status_firefox120": "affected"
            }]
        });
        let list: BugList = serde_json::from_value(body).unwrap();
        let record = list.bugs.into_iter().next().unwrap().into_record().unwrap();
        assert_eq!(record.id, 42);
        assert_eq!(record.assignee, "dev@example.com");
        assert_eq!(record.revision(), "2026-03-02T11:30:00+00:00");
        assert_eq!(record.extra["cf_status_firefox120"], "affected");
        assert_eq!(record.requestees("needinfo"), vec!["b@x"]);
    }

    #[test]
    fn test_missing_timestamps_is_error() {
        let raw: RawBug = serde_json::from_value(serde_json::json!({"id": 1})).unwrap();
        assert!(raw.into_record().is_err());
    }

    #[test]
    fn test_parse_history_and_comments() {
        let history: HistoryList = serde_json::from_value(serde_json::json!({
            "bugs": [{"id": 7, "history": [{
                "when": "2026-03-01T10:00:00Z",
                "who": "triager@example.com",
                "changes": [{"field_name": "status", "removed": "NEW", "added": "ASSIGNED"}]
            }]}]
        }))
        .unwrap();
        let raw = history.bugs.into_iter().next().unwrap();
        let entry = raw.history.into_iter().next().unwrap().into_entry();
        assert_eq!(entry.changes[0].field, "status");
        assert_eq!(entry.changes[0].added, "ASSIGNED");
        assert_eq!(entry.when, Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap());

        let comments = parse_comments(
            7,
            &serde_json::json!({"bugs": {"7": {"comments": [{
                "id": 1, "creator": "r@x", "text": "STR attached", "creation_time": "2026-03-01T10:00:00Z"
            }]}}}),
        )
        .unwrap();
        assert_eq!(comments[0].author, "r@x");
        assert!(parse_comments(8, &serde_json::json!({})).unwrap().is_empty());
    }

    #[test]
    fn test_update_body() {
        let update = RecordUpdate {
            priority: Some("P1".into()),
            comment: Some("Escalated by triage".into()),
            assignee: Some("dev@example.com".into()),
            flags: vec![FlagChange {
                name: "needinfo".into(),
                status: "?".into(),
                requestee: Some("dev@example.com".into()),
            }],
            ..Default::default()
        };
        let body = update_body(&update);
        assert_eq!(body["priority"], "P1");
        assert_eq!(body["comment"]["body"], "Escalated by triage");
        assert_eq!(body["assigned_to"], "dev@example.com");
        assert_eq!(body["flags"][0]["requestee"], "dev@example.com");
        assert!(body.get("status").is_none());
    }
}
