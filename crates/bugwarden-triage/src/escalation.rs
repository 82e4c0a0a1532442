//! Periodic escalation report.
//!
//! Counts are computed from a fresh scan of open records on every run and
//! never persisted, so the job has no cursor.

use std::sync::Arc;

use async_trait::async_trait;
use bugwarden_core::cancel::CancelSignal;
use bugwarden_core::config::CountBy;
use bugwarden_core::error::{BugwardenError, Result};
use bugwarden_core::traits::{ChatPlatform, Job, Tracker};
use bugwarden_core::types::{ChatMessage, RecordQuery, RunReport};

use crate::groups::{self, GroupDefs};
use crate::quota::{self, QuotaReport};

pub struct EscalationJob {
    pub name: String,
    pub tracker: Arc<dyn Tracker>,
    pub chat: Arc<dyn ChatPlatform>,
    pub groups: Arc<GroupDefs>,
    /// Group token whose members are counted.
    pub group: String,
    pub query: RecordQuery,
    pub count_by: CountBy,
    pub channel: String,
}

impl EscalationJob {
    fn search_query(&self, members: &[String]) -> RecordQuery {
        let mut query = self.query.clone();
        if self.count_by == CountBy::Assignee && query.assignee.is_empty() {
            query.assignee = members.to_vec();
        }
        query
    }

    fn over_quota_message(&self, report: &QuotaReport) -> Option<ChatMessage> {
        if report.over_quota.is_empty() {
            return None;
        }
        let mut text = format!(
            "🚨 *{}*: over quota ({} per person, group of {})",
            self.name, report.quota, report.group_size
        );
        for (who, count) in &report.over_quota {
            text.push_str(&format!("\n• {who}: {count} open"));
        }
        Some(ChatMessage::text(text))
    }

    fn multiple_message(&self, report: &QuotaReport) -> Option<ChatMessage> {
        if report.multiple.is_empty() {
            return None;
        }
        let mut text = format!("📋 *{}*: more than one open item", self.name);
        for (who, count) in &report.multiple {
            text.push_str(&format!("\n• {who}: {count} open"));
        }
        Some(ChatMessage::text(text))
    }
}

#[async_trait]
impl Job for EscalationJob {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, cancel: CancelSignal) -> Result<RunReport> {
        let members = groups::resolve(&self.groups, std::slice::from_ref(&self.group));
        let mut report = RunReport {
            job: self.name.clone(),
            ..Default::default()
        };
        if members.is_empty() {
            tracing::warn!("⚠️ [{}] {} resolves to nobody", self.name, self.group);
            return Ok(report);
        }

        let listed: Vec<String> = members.iter().cloned().collect();
        let records = self.tracker.search(&self.search_query(&listed)).await?;
        let counts = quota::count_open(&records, &members, self.count_by);
        let evaluation = quota::evaluate(members.len(), &counts);
        tracing::debug!(
            "📊 [{}] {} record(s), quota {}, {} over, {} with several",
            self.name,
            records.len(),
            evaluation.quota,
            evaluation.over_quota.len(),
            evaluation.multiple.len()
        );

        if cancel.is_cancelled() {
            return Err(BugwardenError::Cancelled(format!(
                "escalation '{}' before posting",
                self.name
            )));
        }

        report.candidates = records.len();
        let messages: Vec<ChatMessage> = [
            self.over_quota_message(&evaluation),
            self.multiple_message(&evaluation),
        ]
        .into_iter()
        .flatten()
        .collect();
        report.changes = messages.len();

        let mut failures = Vec::new();
        for message in &messages {
            match self.chat.post(&self.channel, message).await {
                Ok(_) => report.applied += 1,
                Err(e) => failures.push(e.to_string()),
            }
        }
        report.failed = failures.len();

        if failures.is_empty() {
            tracing::info!("✅ [{}] {} report(s) posted", self.name, report.applied);
            Ok(report)
        } else {
            Err(BugwardenError::SideEffects {
                workflow: self.name.clone(),
                attempted: messages.len(),
                failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bugwarden_channels::MemoryChat;
    use bugwarden_core::types::Flag;
    use bugwarden_tracker::MemoryTracker;
    use bugwarden_tracker::memory::sample_record;

    fn team(size: usize) -> GroupDefs {
        let members: Vec<String> = (0..size).map(|i| format!("dev{i}@example.com")).collect();
        GroupDefs::from([("team".to_string(), members)])
    }

    fn job(tracker: Arc<MemoryTracker>, chat: Arc<MemoryChat>, size: usize, by: CountBy) -> EscalationJob {
        EscalationJob {
            name: "load".into(),
            tracker,
            chat,
            groups: Arc::new(team(size)),
            group: "group:team".into(),
            query: RecordQuery::default(),
            count_by: by,
            channel: "#triage-leads".into(),
        }
    }

    fn assign(tracker: &MemoryTracker, first_id: u64, who: &str, n: u64) {
        for id in first_id..first_id + n {
            let mut r = sample_record(id);
            r.assignee = who.into();
            tracker.insert(r);
        }
    }

    #[tokio::test]
    async fn test_over_quota_and_multiple_reports() {
        let tracker = Arc::new(MemoryTracker::new());
        let chat = Arc::new(MemoryChat::new());
        assign(&tracker, 1, "dev0@example.com", 5);
        assign(&tracker, 10, "dev1@example.com", 2);
        assign(&tracker, 20, "dev2@example.com", 1);
        assign(&tracker, 30, "outsider@example.com", 9);

        let report = job(tracker, chat.clone(), 20, CountBy::Assignee)
            .run(CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(report.applied, 2);

        let posts = chat.posts();
        assert_eq!(posts.len(), 2);
        let over = &posts[0].1.text;
        assert!(over.starts_with("🚨 *load*: over quota (4 per person, group of 20)"));
        assert!(over.contains("dev0@example.com: 5 open"));
        assert!(!over.contains("dev1@example.com"));

        let multiple = &posts[1].1.text;
        assert!(multiple.contains("dev0@example.com: 5 open"));
        assert!(multiple.contains("dev1@example.com: 2 open"));
        assert!(!multiple.contains("dev2@example.com"));
    }

    #[tokio::test]
    async fn test_single_item_never_reported_as_multiple() {
        let tracker = Arc::new(MemoryTracker::new());
        let chat = Arc::new(MemoryChat::new());
        // Quota is 1 for a group of 3, so one item is within it.
        assign(&tracker, 1, "dev0@example.com", 1);

        let report = job(tracker, chat.clone(), 3, CountBy::Assignee)
            .run(CancelSignal::never())
            .await
            .unwrap();
        assert_eq!(report.changes, 0);
        assert!(chat.posts().is_empty());
    }

    #[tokio::test]
    async fn test_counts_needinfo_requestees() {
        let tracker = Arc::new(MemoryTracker::new());
        let chat = Arc::new(MemoryChat::new());
        for id in 1..=2 {
            let mut r = sample_record(id);
            r.flags.push(Flag {
                name: "needinfo".into(),
                status: "?".into(),
                setter: "qa@example.com".into(),
                requestee: Some("dev1@example.com".into()),
            });
            tracker.insert(r);
        }

        job(tracker, chat.clone(), 5, CountBy::Needinfo)
            .run(CancelSignal::never())
            .await
            .unwrap();
        let posts = chat.posts();
        assert_eq!(posts.len(), 2);
        assert!(posts[0].1.text.contains("dev1@example.com: 2 open"));
    }

    #[tokio::test]
    async fn test_search_failure_is_error() {
        let tracker = Arc::new(MemoryTracker::new());
        tracker.fail_searches(true);
        let chat = Arc::new(MemoryChat::new());
        let err = job(tracker, chat.clone(), 5, CountBy::Assignee)
            .run(CancelSignal::never())
            .await
            .unwrap_err();
        assert!(err.is_fetch_failure());
        assert!(chat.posts().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_channel_collected() {
        let tracker = Arc::new(MemoryTracker::new());
        let chat = Arc::new(MemoryChat::new());
        chat.make_unreachable("#triage-leads");
        assign(&tracker, 1, "dev0@example.com", 2);

        let err = job(tracker, chat, 5, CountBy::Assignee)
            .run(CancelSignal::never())
            .await
            .unwrap_err();
        assert!(matches!(err, BugwardenError::SideEffects { attempted: 2, .. }));
    }
}
