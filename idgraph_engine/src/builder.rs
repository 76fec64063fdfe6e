/// Graph builder: converts a live value into an explicit node tree.
///
/// Traversal is iterative. Each container being expanded is a frame on an
/// explicit stack holding its node and the element references still to
/// visit, so input depth never touches the call stack. On error every frame
/// is dropped with the stack; no partial tree escapes.
///
/// Nodes carry object ids while the tree is built. Under traversal
/// identity they are renumbered in pre-order once the tree is complete, so
/// ordinals follow the final (possibly sorted) child order.

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::config::{CallablePolicy, EngineConfig, IdentityMode, SetOrder};
use crate::error::{EngineError, Result};
use crate::node::{Kind, Node, Primitive};
use crate::serialize::{to_shape_text, to_text};
use crate::value::Value;
use crate::visited::VisitedSet;

/// Build the graph of `root` with the given configuration.
pub fn build(root: &Value, config: &EngineConfig) -> Result<Node> {
    GraphBuilder::new(config).build(root)
}

/// A container being expanded.
struct Frame {
    node: Node,
    pending: std::vec::IntoIter<Value>,
    scope: Option<SetScope>,
}

/// Visited state of a canonically ordered set. Every member is built
/// against `base`, the state right after the set itself was registered;
/// what the members register is collected in `merged`.
struct SetScope {
    base: VisitedSet,
    merged: VisitedSet,
}

/// Outcome of resolving one value.
enum Step {
    /// Finished node: primitive leaf, stub or childless callable.
    Done(Node),
    /// Container that still has elements to expand.
    Expand(Frame),
}

/// One traversal. Owns its visited set for the duration of the call.
pub struct GraphBuilder<'a> {
    config: &'a EngineConfig,
    visited: VisitedSet,
    created: usize,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self {
            config,
            visited: VisitedSet::new(),
            created: 0,
        }
    }

    pub fn build(mut self, root: &Value) -> Result<Node> {
        if self.skips(root) {
            return Err(unsupported(root));
        }
        let mut current = match self.resolve(root)? {
            Step::Done(node) => return Ok(self.done(node)),
            Step::Expand(frame) => frame,
        };
        let mut parents: Vec<Frame> = Vec::new();

        loop {
            let next = current.pending.next();
            if let (Some(_), Some(scope)) = (&next, &mut current.scope) {
                scope.merged.absorb(&self.visited);
                self.visited = scope.base.clone();
            }
            match next {
                Some(item) => match self.resolve(&item)? {
                    Step::Done(node) => current.node.children_mut().push(node),
                    Step::Expand(frame) => parents.push(std::mem::replace(&mut current, frame)),
                },
                None => {
                    let node = self.finish(current);
                    match parents.pop() {
                        Some(parent) => {
                            current = parent;
                            current.node.children_mut().push(node);
                        }
                        None => return Ok(self.done(node)),
                    }
                }
            }
        }
    }

    fn done(&self, mut node: Node) -> Node {
        if self.config.identity_mode == IdentityMode::Traversal {
            renumber(&mut node);
        }
        debug!(
            nodes = self.created,
            visited = self.visited.len(),
            "built object graph"
        );
        node
    }

    /// Dispatch on the runtime kind of `value`.
    fn resolve(&mut self, value: &Value) -> Result<Step> {
        let leaf = match value {
            Value::Int(v) => Some(Primitive::Int(*v)),
            Value::Float(v) => Some(Primitive::Float(*v)),
            Value::Bool(v) => Some(Primitive::Bool(*v)),
            Value::Str(v) => Some(Primitive::Str(v.to_string())),
            _ => None,
        };
        if let Some(primitive) = leaf {
            self.count()?;
            return Ok(Step::Done(Node::leaf(primitive)));
        }

        let (object, kind) = match value {
            Value::List(s) => (s.id(), Kind::List),
            Value::Tuple(s) => (s.id(), Kind::Tuple),
            Value::Set(s) => (s.id(), Kind::Set),
            Value::Dict(s) => (s.id(), Kind::Dict),
            Value::Object(s) => (s.id(), Kind::Object),
            Value::Callable(s) if self.config.callable_policy == CallablePolicy::Leaf => {
                (s.id(), Kind::Object)
            }
            _ => return Err(unsupported(value)),
        };

        self.count()?;
        if let Some(stub) = self.visited.lookup(object) {
            return Ok(Step::Done(stub));
        }

        let mut node = Node::container(object.get(), kind, Vec::new());
        self.visited.record(object, &node);

        let pending = self.elements(value);
        if pending.is_empty() {
            return Ok(Step::Done(node));
        }
        node.children_mut()
            .try_reserve_exact(pending.len())
            .map_err(|e| EngineError::AllocationFailure(e.to_string()))?;
        let scope = (kind == Kind::Set && self.config.set_order == SetOrder::Canonical).then(|| {
            SetScope {
                base: self.visited.clone(),
                merged: self.visited.clone(),
            }
        });
        Ok(Step::Expand(Frame {
            node,
            pending: pending.into_iter(),
            scope,
        }))
    }

    /// Element references of a container, copied out under its read lock.
    /// Dict entries and object attributes are flattened to key, value.
    fn elements(&self, value: &Value) -> Vec<Value> {
        match value {
            Value::List(s) | Value::Tuple(s) | Value::Set(s) => s
                .read()
                .iter()
                .filter(|item| !self.skips(item))
                .cloned()
                .collect(),
            Value::Dict(s) => s
                .read()
                .iter()
                .filter(|(k, v)| !self.skips(k) && !self.skips(v))
                .flat_map(|(k, v)| [k.clone(), v.clone()])
                .collect(),
            Value::Object(s) => s
                .read()
                .attributes()
                .filter(|(name, v)| !name.starts_with('_') && !self.skips(v))
                .flat_map(|(name, v)| [Value::str(name), v.clone()])
                .collect(),
            _ => Vec::new(),
        }
    }

    fn skips(&self, value: &Value) -> bool {
        matches!(value, Value::Callable(_)) && self.config.callable_policy == CallablePolicy::Skip
    }

    fn count(&mut self) -> Result<()> {
        self.created += 1;
        match self.config.max_nodes {
            Some(limit) if self.created > limit => Err(EngineError::AllocationFailure(format!(
                "node budget of {} exhausted",
                limit
            ))),
            _ => Ok(()),
        }
    }

    /// Close a frame. Canonical sets get their members sorted by canonical
    /// text, or by shape when identities are renumbered afterwards, and
    /// hand everything their members registered on to the parent.
    fn finish(&mut self, frame: Frame) -> Node {
        let mut node = frame.node;
        if let Some(mut scope) = frame.scope {
            scope.merged.absorb(&self.visited);
            self.visited = scope.merged;
            match self.config.identity_mode {
                IdentityMode::Object => node.children_mut().sort_by_cached_key(to_text),
                IdentityMode::Traversal => node.children_mut().sort_by_cached_key(to_shape_text),
            }
        }
        node
    }
}

/// Replace object ids with 1-based ordinals in pre-order. Stubs share the
/// ordinal of the container they point at.
fn renumber(root: &mut Node) {
    let mut ordinals: FxHashMap<u64, u64> = FxHashMap::default();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if !node.is_primitive() {
            let next = ordinals.len() as u64 + 1;
            let ordinal = *ordinals.entry(node.identity()).or_insert(next);
            node.set_identity(ordinal);
        }
        stack.extend(node.children_mut().iter_mut().rev());
    }
}

fn unsupported(value: &Value) -> EngineError {
    EngineError::UnsupportedType {
        kind: value.type_name(),
    }
}
