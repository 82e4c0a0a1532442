//! Escalation quota arithmetic.

use std::collections::{BTreeMap, BTreeSet};

use bugwarden_core::config::CountBy;
use bugwarden_core::types::ExternalRecord;

/// Flag requested from someone when counting by needinfo.
pub const NEEDINFO: &str = "needinfo";

/// Items a single member may carry before being flagged: a fifth of the
/// group, at least one.
pub fn quota(group_size: usize) -> usize {
    (group_size / 5).max(1)
}

/// Outcome of one quota evaluation, each list sorted by recipient.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaReport {
    pub group_size: usize,
    pub quota: usize,
    /// Count strictly above quota.
    pub over_quota: Vec<(String, usize)>,
    /// Count at or below quota.
    pub within_quota: Vec<(String, usize)>,
    /// Count above one, regardless of quota.
    pub multiple: Vec<(String, usize)>,
}

/// Compare each recipient's count with the group quota.
pub fn evaluate(group_size: usize, counts: &BTreeMap<String, usize>) -> QuotaReport {
    let quota = quota(group_size);
    let mut report = QuotaReport {
        group_size,
        quota,
        ..Default::default()
    };
    for (recipient, &count) in counts {
        let entry = (recipient.clone(), count);
        if count > 1 {
            report.multiple.push(entry.clone());
        }
        if count > quota {
            report.over_quota.push(entry);
        } else {
            report.within_quota.push(entry);
        }
    }
    report
}

/// Open items per group member, charged by assignee or by pending needinfo
/// requestee.
pub fn count_open(
    records: &[ExternalRecord],
    members: &BTreeSet<String>,
    by: CountBy,
) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for record in records.iter().filter(|r| r.is_open()) {
        let charged: Vec<&str> = match by {
            CountBy::Assignee => vec![record.assignee.as_str()],
            CountBy::Needinfo => {
                let mut requestees = record.requestees(NEEDINFO);
                requestees.sort_unstable();
                requestees.dedup();
                requestees
            }
        };
        for recipient in charged.into_iter().filter(|r| members.contains(*r)) {
            *counts.entry(recipient.to_string()).or_insert(0) += 1;
        }
    }
    counts
}
