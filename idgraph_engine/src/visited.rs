/// Identity-keyed registry of objects already seen in one traversal.
///
/// Containers record themselves before their children are visited, so a
/// lookup from any descendant sees every ancestor still being expanded.
/// That is what breaks cycles.

use rustc_hash::FxHashMap;

use crate::node::{Kind, Node};
use crate::value::ObjectId;

/// What was recorded for an object: enough to emit a stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VisitedEntry {
    pub identity: u64,
    pub kind: Kind,
}

/// Scoped to a single top-level traversal call; dropped when it returns.
#[derive(Debug, Clone, Default)]
pub struct VisitedSet {
    entries: FxHashMap<ObjectId, VisitedEntry>,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stub for an already-recorded object.
    pub fn lookup(&self, object: ObjectId) -> Option<Node> {
        self.entries
            .get(&object)
            .map(|entry| Node::stub(entry.identity, entry.kind))
    }

    /// Record the node created for `object`.
    pub fn record(&mut self, object: ObjectId, node: &Node) {
        self.mark(
            object,
            VisitedEntry {
                identity: node.identity(),
                kind: node.kind(),
            },
        );
    }

    /// Record an object without a node (hashing path).
    pub fn mark(&mut self, object: ObjectId, entry: VisitedEntry) {
        self.entries.entry(object).or_insert(entry);
    }

    /// Merge another set into this one. Entries already here win.
    pub fn absorb(&mut self, other: &VisitedSet) {
        for (object, entry) in &other.entries {
            self.entries.entry(*object).or_insert(*entry);
        }
    }

    pub fn entry(&self, object: ObjectId) -> Option<VisitedEntry> {
        self.entries.get(&object).copied()
    }

    pub fn contains(&self, object: ObjectId) -> bool {
        self.entries.contains_key(&object)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn lookup_reflects_earlier_records() {
        let list = Value::list(vec![]);
        let id = list.object_id().unwrap();
        let mut visited = VisitedSet::new();
        assert!(visited.lookup(id).is_none());

        visited.record(id, &Node::container(id.get(), Kind::List, Vec::new()));
        let stub = visited.lookup(id).unwrap();
        assert_eq!(stub.identity(), id.get());
        assert_eq!(stub.kind(), Kind::List);
        assert!(stub.children().is_empty());
        assert_eq!(visited.len(), 1);
    }

    #[test]
    fn first_record_wins() {
        let list = Value::list(vec![]);
        let id = list.object_id().unwrap();
        let mut visited = VisitedSet::new();
        visited.mark(id, VisitedEntry { identity: 1, kind: Kind::List });
        visited.mark(id, VisitedEntry { identity: 2, kind: Kind::Tuple });
        assert_eq!(
            visited.entry(id),
            Some(VisitedEntry { identity: 1, kind: Kind::List })
        );
    }

    #[test]
    fn absorb_keeps_existing_entries() {
        let (a, b) = (Value::list(vec![]), Value::list(vec![]));
        let (ia, ib) = (a.object_id().unwrap(), b.object_id().unwrap());
        let mut base = VisitedSet::new();
        base.mark(ia, VisitedEntry { identity: 1, kind: Kind::List });

        let mut member = base.clone();
        member.mark(ib, VisitedEntry { identity: 2, kind: Kind::List });
        let mut other = VisitedSet::new();
        other.mark(ia, VisitedEntry { identity: 9, kind: Kind::Tuple });

        base.absorb(&member);
        base.absorb(&other);
        assert_eq!(base.len(), 2);
        assert_eq!(base.entry(ia).map(|e| e.identity), Some(1));
        assert!(base.contains(ib));
    }
}
