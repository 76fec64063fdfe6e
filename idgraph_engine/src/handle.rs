/// Opaque graph handles and the table that owns the graphs behind them.
///
/// A handle is plain data: the id of the engine that issued it and a slot
/// number. Slots are never reused, so a released or foreign handle can
/// always be told apart from a live one.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{EngineError, Result};
use crate::node::Node;

static NEXT_ENGINE_ID: AtomicU32 = AtomicU32::new(1);

/// Reference to a graph owned by an engine. Release exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphHandle {
    engine: u32,
    slot: u64,
}

impl fmt::Display for GraphHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph#{}:{}", self.engine, self.slot)
    }
}

/// Live graphs of one engine.
///
/// Graphs are immutable once inserted and shared as `Arc<Node>`, so any
/// number of readers may serialize or compare one handle concurrently.
/// Releasing drops the table's reference; readers still holding an
/// `Arc` keep the tree alive until they finish.
pub struct HandleTable {
    engine: u32,
    next_slot: AtomicU64,
    live: RwLock<FxHashMap<u64, Arc<Node>>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            engine: NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed),
            next_slot: AtomicU64::new(1),
            live: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn insert(&self, node: Node) -> GraphHandle {
        let handle = GraphHandle {
            engine: self.engine,
            slot: self.next_slot.fetch_add(1, Ordering::Relaxed),
        };
        self.live.write().insert(handle.slot, Arc::new(node));
        trace!(%handle, "graph handle issued");
        handle
    }

    pub fn get(&self, handle: GraphHandle) -> Result<Arc<Node>> {
        if handle.engine != self.engine {
            return Err(EngineError::InvalidHandle(handle));
        }
        self.live
            .read()
            .get(&handle.slot)
            .cloned()
            .ok_or(EngineError::InvalidHandle(handle))
    }

    pub fn release(&self, handle: GraphHandle) -> Result<()> {
        if handle.engine != self.engine {
            return Err(EngineError::InvalidHandle(handle));
        }
        match self.live.write().remove(&handle.slot) {
            Some(_) => {
                trace!(%handle, "graph handle released");
                Ok(())
            }
            None => Err(EngineError::InvalidHandle(handle)),
        }
    }

    pub fn len(&self) -> usize {
        self.live.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.read().is_empty()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Kind, Primitive};

    #[test]
    fn release_exactly_once() {
        let table = HandleTable::new();
        let h = table.insert(Node::leaf(Primitive::Int(1)));
        assert_eq!(table.len(), 1);
        assert!(table.get(h).is_ok());
        table.release(h).unwrap();
        assert!(table.is_empty());
        assert!(matches!(table.get(h), Err(EngineError::InvalidHandle(_))));
        assert!(matches!(table.release(h), Err(EngineError::InvalidHandle(_))));
    }

    #[test]
    fn slots_are_not_reused() {
        let table = HandleTable::new();
        let a = table.insert(Node::stub(1, Kind::List));
        table.release(a).unwrap();
        let b = table.insert(Node::stub(1, Kind::List));
        assert_ne!(a, b);
        assert!(table.get(a).is_err());
    }

    #[test]
    fn foreign_handles_are_rejected() {
        let first = HandleTable::new();
        let second = HandleTable::new();
        let h = first.insert(Node::leaf(Primitive::Bool(true)));
        assert!(matches!(second.get(h), Err(EngineError::InvalidHandle(_))));
        assert!(second.release(h).is_err());
        assert!(first.get(h).is_ok());
    }

    #[test]
    fn readers_outlive_release() {
        let table = HandleTable::new();
        let h = table.insert(Node::stub(5, Kind::Dict));
        let graph = table.get(h).unwrap();
        table.release(h).unwrap();
        assert_eq!(graph.identity(), 5);
    }
}
