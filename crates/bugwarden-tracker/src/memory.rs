//! In-memory tracker. Backs dry runs and every test that needs a tracker.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bugwarden_core::error::{BugwardenError, Result};
use bugwarden_core::traits::Tracker;
use bugwarden_core::types::{Comment, ExternalRecord, HistoryEntry, RecordQuery, RecordUpdate};
use chrono::{TimeZone, Utc};

#[derive(Default)]
pub struct MemoryTracker {
    records: Mutex<BTreeMap<u64, ExternalRecord>>,
    history: Mutex<HashMap<u64, Vec<HistoryEntry>>>,
    comments: Mutex<HashMap<u64, Vec<Comment>>>,
    updates: Mutex<Vec<(u64, RecordUpdate)>>,
    fail_search: AtomicBool,
    /// Updates to these ids fail.
    fail_updates: Mutex<Vec<u64>>,
    searches: AtomicUsize,
    history_calls: AtomicUsize,
    comment_calls: AtomicUsize,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: ExternalRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.insert(record.id, record);
        }
    }

    pub fn remove(&self, id: u64) {
        if let Ok(mut records) = self.records.lock() {
            records.remove(&id);
        }
    }

    pub fn set_history(&self, id: u64, entries: Vec<HistoryEntry>) {
        if let Ok(mut history) = self.history.lock() {
            history.insert(id, entries);
        }
    }

    pub fn set_comments(&self, id: u64, entries: Vec<Comment>) {
        if let Ok(mut comments) = self.comments.lock() {
            comments.insert(id, entries);
        }
    }

    /// Make every search fail, as an unreachable tracker would.
    pub fn fail_searches(&self, fail: bool) {
        self.fail_search.store(fail, Ordering::SeqCst);
    }

    pub fn fail_update_of(&self, id: u64) {
        if let Ok(mut ids) = self.fail_updates.lock() {
            ids.push(id);
        }
    }

    /// Updates applied so far, in call order.
    pub fn updates(&self) -> Vec<(u64, RecordUpdate)> {
        self.updates.lock().map(|u| u.clone()).unwrap_or_default()
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub fn comment_calls(&self) -> usize {
        self.comment_calls.load(Ordering::SeqCst)
    }
}

fn poisoned() -> BugwardenError {
    BugwardenError::tracker("memory tracker poisoned")
}

#[async_trait]
impl Tracker for MemoryTracker {
    fn name(&self) -> &str {
        "memory"
    }

    async fn search(&self, query: &RecordQuery) -> Result<Vec<ExternalRecord>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(BugwardenError::tracker("search unavailable"));
        }
        let records = self.records.lock().map_err(|_| poisoned())?;
        let mut found: Vec<_> = records
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        if let Some(limit) = query.limit {
            found.truncate(limit as usize);
        }
        Ok(found)
    }

    async fn get(&self, id: u64) -> Result<Option<ExternalRecord>> {
        let records = self.records.lock().map_err(|_| poisoned())?;
        Ok(records.get(&id).cloned())
    }

    async fn comments(&self, record: &ExternalRecord) -> Result<Vec<Comment>> {
        self.comment_calls.fetch_add(1, Ordering::SeqCst);
        let comments = self.comments.lock().map_err(|_| poisoned())?;
        Ok(comments.get(&record.id).cloned().unwrap_or_default())
    }

    async fn history(&self, record: &ExternalRecord) -> Result<Vec<HistoryEntry>> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        let history = self.history.lock().map_err(|_| poisoned())?;
        Ok(history.get(&record.id).cloned().unwrap_or_default())
    }

    async fn update(&self, id: u64, update: &RecordUpdate) -> Result<()> {
        let failing = self.fail_updates.lock().map_err(|_| poisoned())?;
        if failing.contains(&id) {
            return Err(BugwardenError::tracker(format!("bug {id}: update rejected")));
        }
        drop(failing);
        self.updates
            .lock()
            .map_err(|_| poisoned())?
            .push((id, update.clone()));
        Ok(())
    }
}

/// A plausible open record, stamped 2026-03-01 12:00 UTC.
pub fn sample_record(id: u64) -> ExternalRecord {
    let at = Utc
        .with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
        .single()
        .unwrap_or_default();
    ExternalRecord {
        id,
        summary: format!("bug {id}"),
        status: "NEW".into(),
        resolution: String::new(),
        severity: "S3".into(),
        priority: "--".into(),
        product: "Core".into(),
        component: "General".into(),
        assignee: "nobody@mozilla.org".into(),
        whiteboard: String::new(),
        keywords: Vec::new(),
        creation_time: at,
        last_change_time: at,
        flags: Vec::new(),
        extra: BTreeMap::new(),
    }
}
