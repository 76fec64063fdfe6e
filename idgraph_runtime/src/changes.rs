//! Change sets: which variables differ between two checkpoints.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Outcome of one checkpoint (or of diffing two snapshot records).
///
/// Every list is sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub sequence: u64,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
    pub unchanged: Vec<String>,
    /// Variables that could not be fingerprinted. Each also appears in
    /// `added` or `modified`.
    pub unfingerprintable: Vec<String>,
}

impl ChangeSet {
    pub fn new(sequence: u64) -> Self {
        Self {
            sequence,
            ..Self::default()
        }
    }

    /// True when nothing was added, removed or modified.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Names whose value must be stored again: added plus modified.
    pub fn dirty(&self) -> impl Iterator<Item = &str> {
        self.added.iter().chain(&self.modified).map(String::as_str)
    }
}

/// Split two name sets into (added, removed, common), each sorted.
pub(crate) fn partition_names<'a>(
    before: impl IntoIterator<Item = &'a str>,
    after: impl IntoIterator<Item = &'a str>,
) -> (Vec<String>, Vec<String>, Vec<&'a str>) {
    let before: BTreeSet<&str> = before.into_iter().collect();
    let after: BTreeSet<&str> = after.into_iter().collect();

    let added = after.difference(&before).map(|s| s.to_string()).collect();
    let removed = before.difference(&after).map(|s| s.to_string()).collect();
    let common = before.intersection(&after).copied().collect();
    (added, removed, common)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition() {
        let (added, removed, common) =
            partition_names(["a", "b", "c"], ["c", "d", "b"]);
        assert_eq!(added, vec!["d"]);
        assert_eq!(removed, vec!["a"]);
        assert_eq!(common, vec!["b", "c"]);
    }

    #[test]
    fn unchanged_only_is_empty() {
        let mut changes = ChangeSet::new(3);
        changes.unchanged.push("x".to_string());
        assert!(changes.is_empty());
        changes.modified.push("y".to_string());
        assert!(!changes.is_empty());
        assert_eq!(changes.dirty().collect::<Vec<_>>(), vec!["y"]);
    }
}
