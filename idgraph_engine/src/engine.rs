/// Engine facade: the boundary the surrounding system talks to.
///
/// Builds graphs into handles, serializes and compares them, and computes
/// fingerprints. Holds no per-call state beyond the handle table; every
/// traversal owns its visited set for its own duration.

use std::sync::Arc;

use crate::builder::GraphBuilder;
use crate::compare;
use crate::config::{EngineConfig, HashOptions};
use crate::error::Result;
use crate::handle::{GraphHandle, HandleTable};
use crate::hashing::{Digest, HashTrace, StructuralHasher};
use crate::node::Node;
use crate::serialize;
use crate::value::Value;

/// Stateful engine wrapping the pure traversal layer.
pub struct IdGraphEngine {
    config: EngineConfig,
    handles: HandleTable,
}

impl IdGraphEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            handles: HandleTable::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Build the graph of `value` without registering a handle.
    pub fn build_node(&self, value: &Value) -> Result<Node> {
        GraphBuilder::new(&self.config).build(value)
    }

    /// Build the graph of `value` and hand out a handle owning it.
    pub fn build_graph(&self, value: &Value) -> Result<GraphHandle> {
        let node = self.build_node(value)?;
        Ok(self.handles.insert(node))
    }

    /// Shared read access to a live graph.
    pub fn graph(&self, handle: GraphHandle) -> Result<Arc<Node>> {
        self.handles.get(handle)
    }

    pub fn to_text(&self, handle: GraphHandle) -> Result<String> {
        let graph = self.handles.get(handle)?;
        Ok(serialize::to_text(&graph))
    }

    pub fn to_text_pretty(&self, handle: GraphHandle) -> Result<String> {
        let graph = self.handles.get(handle)?;
        Ok(serialize::to_text_pretty(&graph))
    }

    /// Structural comparison of two live graphs.
    pub fn equal(&self, a: GraphHandle, b: GraphHandle) -> Result<bool> {
        let left = self.handles.get(a)?;
        let right = self.handles.get(b)?;
        Ok(compare::equal(&left, &right))
    }

    /// Byte comparison of two serialized graphs. See [`compare::equal_text`].
    pub fn equal_text(&self, a: &str, b: &str) -> bool {
        compare::equal_text(a, b)
    }

    /// Identity recorded for the root node (`0` for a primitive root).
    pub fn identity_of(&self, handle: GraphHandle) -> Result<u64> {
        Ok(self.handles.get(handle)?.identity())
    }

    /// Structural fingerprint of `value`; no graph is materialized.
    pub fn hash(&self, value: &Value, include_identity: bool) -> Result<Digest> {
        self.hash_with(value, HashOptions::with_identity(include_identity))
    }

    pub fn hash_with(&self, value: &Value, options: HashOptions) -> Result<Digest> {
        StructuralHasher::new(&self.config, options).hash(value)
    }

    pub fn hash_traced(&self, value: &Value, options: HashOptions) -> Result<HashTrace> {
        StructuralHasher::new(&self.config, options).hash_traced(value)
    }

    /// Drop the graph behind `handle`. A second release is `InvalidHandle`.
    pub fn release(&self, handle: GraphHandle) -> Result<()> {
        self.handles.release(handle)
    }

    pub fn live_handles(&self) -> usize {
        self.handles.len()
    }
}

impl Default for IdGraphEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[test]
    fn handle_lifecycle() {
        let engine = IdGraphEngine::default();
        let value = Value::list(vec![Value::Int(1)]);
        let h = engine.build_graph(&value).unwrap();
        assert_eq!(engine.live_handles(), 1);
        assert_eq!(engine.identity_of(h).unwrap(), value.object_id().unwrap().get());
        assert!(engine.equal(h, h).unwrap());

        engine.release(h).unwrap();
        assert_eq!(engine.live_handles(), 0);
        assert!(matches!(engine.to_text(h), Err(EngineError::InvalidHandle(_))));
        assert!(matches!(engine.equal(h, h), Err(EngineError::InvalidHandle(_))));
        assert!(matches!(engine.release(h), Err(EngineError::InvalidHandle(_))));
    }

    #[test]
    fn failed_build_registers_nothing() {
        let engine = IdGraphEngine::default();
        let value = Value::list(vec![Value::Int(1), Value::resource("socket")]);
        assert!(engine.build_graph(&value).is_err());
        assert_eq!(engine.live_handles(), 0);
    }

    #[test]
    fn handles_from_another_engine_are_invalid() {
        let a = IdGraphEngine::default();
        let b = IdGraphEngine::default();
        let h = a.build_graph(&Value::Int(1)).unwrap();
        assert!(matches!(b.identity_of(h), Err(EngineError::InvalidHandle(_))));
    }

    #[test]
    fn primitive_root_identity_is_zero() {
        let engine = IdGraphEngine::default();
        let h = engine.build_graph(&Value::str("x")).unwrap();
        assert_eq!(engine.identity_of(h).unwrap(), 0);
        assert_eq!(
            engine.to_text(h).unwrap(),
            r#"{"obj_type":"string","obj_val":"x","children":[]}"#
        );
    }

    #[test]
    fn compact_and_pretty_text_describe_the_same_graph() {
        let engine = IdGraphEngine::default();
        let value = Value::dict(vec![(Value::str("xs"), Value::list(vec![Value::Int(1)]))]);
        let h = engine.build_graph(&value).unwrap();
        let compact = engine.to_text(h).unwrap();
        let pretty = engine.to_text_pretty(h).unwrap();
        assert!(pretty.contains('\n'));
        assert_eq!(
            serialize::to_text(&serialize::from_text(&pretty).unwrap()),
            compact
        );
        assert!(compare::equal_text(&compact, &engine.to_text(h).unwrap()));
    }
}
