//! Group expansion.
//!
//! Groups are human-authored and may reference each other in cycles or
//! diamonds. The visited set is threaded through every recursive call, so
//! each group is expanded at most once per resolution.

use std::collections::{BTreeMap, BTreeSet};

use bugwarden_core::config::GROUP_PREFIX;

/// Group name → member tokens.
pub type GroupDefs = BTreeMap<String, Vec<String>>;

/// Expand one token into `members`.
///
/// A literal token is inserted as is. A `group:<name>` token expands every
/// member of that group unless the group was already visited. Unknown groups
/// contribute nobody.
pub fn expand(
    defs: &GroupDefs,
    token: &str,
    mut members: BTreeSet<String>,
    mut visited: BTreeSet<String>,
) -> (BTreeSet<String>, BTreeSet<String>) {
    let token = token.trim();
    if token.is_empty() {
        return (members, visited);
    }
    let Some(name) = token.strip_prefix(GROUP_PREFIX) else {
        members.insert(token.to_string());
        return (members, visited);
    };
    if !visited.insert(name.to_string()) {
        return (members, visited);
    }
    for member in defs.get(name).into_iter().flatten() {
        (members, visited) = expand(defs, member, members, visited);
    }
    (members, visited)
}

/// Flattened recipients of a token list.
pub fn resolve(defs: &GroupDefs, tokens: &[String]) -> BTreeSet<String> {
    let mut members = BTreeSet::new();
    let mut visited = BTreeSet::new();
    for token in tokens {
        (members, visited) = expand(defs, token, members, visited);
    }
    members
}
