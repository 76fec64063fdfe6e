/// Engine configuration.
///
/// Plain data with defaults, injected at engine construction.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// How container and object nodes get their `identity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityMode {
    /// The object's runtime `ObjectId`. Ids are never reused, so graphs
    /// built at different times can be compared safely.
    #[default]
    Object,
    /// Order of first encounter within the traversal, starting at 1.
    /// Graphs of the same shape and aliasing pattern compare equal.
    Traversal,
}

/// Order of set members in graphs and digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetOrder {
    /// The collection's own iteration order. Set order affects equality.
    #[default]
    Iteration,
    /// Members sorted by their canonical text (graphs) or sub-digest
    /// (hashing), making equality independent of iteration order. Each
    /// member is walked as if its siblings had not been visited.
    Canonical,
}

/// What the graph builder does with callables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallablePolicy {
    /// Fail with `UnsupportedType`.
    Reject,
    /// Leave them out. Inside a dict or object the whole key/value pair is
    /// dropped. A callable root still fails.
    Skip,
    /// Emit an object node carrying the callable's identity, no children.
    #[default]
    Leaf,
}

/// Traversal configuration shared by the builder and the hasher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub identity_mode: IdentityMode,
    pub set_order: SetOrder,
    pub callable_policy: CallablePolicy,
    /// Upper bound on nodes per built graph. Exceeding it is reported as
    /// `AllocationFailure`.
    pub max_nodes: Option<usize>,
}

impl EngineConfig {
    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| EngineError::Config(e.to_string()))
    }
}

/// Per-call hashing options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HashOptions {
    /// Mix the identity of every container and object into the digest.
    pub include_identity: bool,
    /// Mix a kind tag and element count for every container, so nesting
    /// shape affects the digest and not only the leaves.
    pub mark_containers: bool,
}

impl HashOptions {
    pub fn with_identity(include_identity: bool) -> Self {
        Self {
            include_identity,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.identity_mode, IdentityMode::Object);
        assert_eq!(config.set_order, SetOrder::Iteration);
        assert_eq!(config.callable_policy, CallablePolicy::Leaf);
        assert_eq!(config.max_nodes, None);
    }

    #[test]
    fn from_json_partial() {
        let config =
            EngineConfig::from_json(r#"{"set_order": "canonical", "max_nodes": 10}"#).unwrap();
        assert_eq!(config.set_order, SetOrder::Canonical);
        assert_eq!(config.max_nodes, Some(10));
        assert_eq!(config.identity_mode, IdentityMode::Object);
    }

    #[test]
    fn from_json_rejects_unknown_fields() {
        let err = EngineConfig::from_json(r#"{"depth": 3}"#).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
