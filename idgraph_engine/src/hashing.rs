/// Structural hashing.
///
/// Walks a value the way the graph builder does, but streams every
/// contribution straight into a SHA-256 state instead of building nodes.
///
/// Contributions, in traversal order:
///   - primitives: one tag byte, then canonical bytes (i64 LE, f64 bits LE,
///     one byte for bool, u64 LE length + bytes for str/bytes/bytearray)
///   - `None`: its tag only
///   - types: tag + length-prefixed qualified name
///   - containers and objects: their identity, only with `include_identity`
///   - tuples: never their identity; they are value carriers
///   - callables: their identity with `include_identity`, nothing otherwise
///
/// Tuples are registered in the visited set like every other container, so
/// a tuple reachable from itself terminates here exactly as in the builder.

use std::fmt;

use sha2::{Digest as _, Sha256};
use tracing::debug;

use crate::config::{EngineConfig, HashOptions, SetOrder};
use crate::error::{EngineError, Result};
use crate::node::{Kind, Node};
use crate::serialize::to_text;
use crate::value::{ObjectId, Value};
use crate::visited::{VisitedEntry, VisitedSet};

const TAG_NONE: u8 = 0x00;
const TAG_INT: u8 = 0x01;
const TAG_FLOAT: u8 = 0x02;
const TAG_BOOL: u8 = 0x03;
const TAG_STR: u8 = 0x04;
const TAG_BYTES: u8 = 0x05;
const TAG_BYTEARRAY: u8 = 0x06;
const TAG_TYPE: u8 = 0x07;
const TAG_IDENTITY: u8 = 0x10;
const TAG_CONTAINER: u8 = 0x11;
const TAG_BACKREF: u8 = 0x12;
const TAG_ELEMENT: u8 = 0x13;

// ---------------------------------------------------------------------------
// Digest
// ---------------------------------------------------------------------------

/// Fixed-width (32-byte) structural fingerprint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; 32]);

impl Digest {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect::<String>()
    }

    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != 64 || !hex.is_ascii() {
            return Err(EngineError::Decode(format!(
                "digest must be 64 hex characters, got {:?}",
                hex
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|e| EngineError::Decode(format!("bad digest {:?}: {}", hex, e)))?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// SHA-256 of a built graph's canonical text.
pub fn graph_digest(node: &Node) -> Digest {
    Digest(Sha256::digest(to_text(node).as_bytes()).into())
}

// ---------------------------------------------------------------------------
// Trace
// ---------------------------------------------------------------------------

/// One thing that went into a digest.
#[derive(Debug, Clone)]
pub enum Contribution {
    /// Identity of a container, object or callable.
    Identity(u64),
    /// A primitive, bytes or type value, fed by value.
    Leaf(Value),
    /// Kind tag and element count (only with `mark_containers`).
    Container { kind: Kind, len: usize },
    /// Sub-digest of one canonically ordered set member.
    Element(Digest),
}

/// Digest plus the ordered list of contributions that produced it.
#[derive(Debug, Clone)]
pub struct HashTrace {
    pub digest: Digest,
    pub contributions: Vec<Contribution>,
}

// ---------------------------------------------------------------------------
// Hasher
// ---------------------------------------------------------------------------

/// Hash `root` with the default configuration.
pub fn structural_hash(root: &Value, include_identity: bool) -> Result<Digest> {
    StructuralHasher::new(&EngineConfig::default(), HashOptions::with_identity(include_identity))
        .hash(root)
}

pub struct StructuralHasher<'a> {
    config: &'a EngineConfig,
    options: HashOptions,
}

impl<'a> StructuralHasher<'a> {
    pub fn new(config: &'a EngineConfig, options: HashOptions) -> Self {
        Self { config, options }
    }

    pub fn hash(&self, root: &Value) -> Result<Digest> {
        self.run(root, None)
    }

    pub fn hash_traced(&self, root: &Value) -> Result<HashTrace> {
        let mut contributions = Vec::new();
        let digest = self.run(root, Some(&mut contributions))?;
        Ok(HashTrace {
            digest,
            contributions,
        })
    }

    /// One call: fresh state and visited set in, finalized digest out.
    fn run(&self, root: &Value, trace: Option<&mut Vec<Contribution>>) -> Result<Digest> {
        let mut visited = VisitedSet::new();
        let mut state = Sha256::new();
        let mut walker = Walker {
            options: self.options,
            set_order: self.config.set_order,
            visited: &mut visited,
            trace,
            sets: Vec::new(),
        };
        walker.walk(root, &mut state)?;
        let digest = Digest(state.finalize().into());
        debug!(
            visited = visited.len(),
            include_identity = self.options.include_identity,
            digest = %digest,
            "hashed object graph"
        );
        Ok(digest)
    }
}

/// Work item of the explicit traversal stack.
enum Task {
    Visit(Value),
    /// Start of one canonically ordered set member.
    BeginMember,
    /// End of one member: keep its sub-digest.
    EndMember,
    /// All members done: feed the sorted sub-digests to the outer state.
    EndSet,
}

/// A canonically ordered set whose members are being hashed.
///
/// Every member starts from the visited set as it was when the set was
/// entered, so members never see what their siblings expanded and the
/// result does not depend on iteration order.
struct SetScope {
    outer: Sha256,
    base: VisitedSet,
    merged: VisitedSet,
    digests: Vec<Digest>,
}

struct Walker<'v, 't> {
    options: HashOptions,
    set_order: SetOrder,
    visited: &'v mut VisitedSet,
    trace: Option<&'t mut Vec<Contribution>>,
    sets: Vec<SetScope>,
}

impl Walker<'_, '_> {
    /// Depth-first, left to right, with an explicit stack.
    fn walk(&mut self, root: &Value, state: &mut Sha256) -> Result<()> {
        let mut pending = vec![Task::Visit(root.clone())];
        while let Some(task) = pending.pop() {
            match task {
                Task::Visit(value) => self.visit(&value, state, &mut pending)?,
                Task::BeginMember => self.begin_member(state),
                Task::EndMember => self.end_member(state),
                Task::EndSet => self.end_set(state),
            }
        }
        Ok(())
    }

    fn visit(&mut self, value: &Value, state: &mut Sha256, pending: &mut Vec<Task>) -> Result<()> {
        match value {
            Value::None => self.leaf(state, TAG_NONE, &[], value),
            Value::Bool(v) => self.leaf(state, TAG_BOOL, &[u8::from(*v)], value),
            Value::Int(v) => self.leaf(state, TAG_INT, &v.to_le_bytes(), value),
            Value::Float(v) => self.leaf(state, TAG_FLOAT, &v.to_bits().to_le_bytes(), value),
            Value::Str(s) => self.sized_leaf(state, TAG_STR, s.as_bytes(), value),
            Value::Bytes(b) => self.sized_leaf(state, TAG_BYTES, b, value),
            Value::ByteArray(s) => {
                let data = s.read().clone();
                self.sized_leaf(state, TAG_BYTEARRAY, &data, value);
            }
            Value::Type(t) => {
                let name = t.read().qualname.clone();
                self.sized_leaf(state, TAG_TYPE, name.as_bytes(), value);
            }
            Value::Callable(c) => {
                if self.options.include_identity {
                    self.visited.mark(c.id(), entry(c.id(), Kind::Object));
                    self.identity(state, c.id());
                }
            }
            Value::Opaque(_) => {
                return Err(EngineError::UnsupportedType {
                    kind: value.type_name(),
                })
            }
            Value::Tuple(s) => {
                if self.visited.contains(s.id()) {
                    self.backref(state);
                    return Ok(());
                }
                self.visited.mark(s.id(), entry(s.id(), Kind::Tuple));
                let items = s.read().clone();
                self.container(state, Kind::Tuple, items.len());
                push_reversed(pending, items);
            }
            Value::List(s) | Value::Set(s) => {
                let kind = if matches!(value, Value::Set(_)) {
                    Kind::Set
                } else {
                    Kind::List
                };
                if self.revisit(state, s.id()) {
                    return Ok(());
                }
                self.visited.mark(s.id(), entry(s.id(), kind));
                if self.options.include_identity {
                    self.identity(state, s.id());
                }
                let items = s.read().clone();
                self.container(state, kind, items.len());
                if kind == Kind::Set && self.set_order == SetOrder::Canonical {
                    self.open_set(state, items, pending);
                } else {
                    push_reversed(pending, items);
                }
            }
            Value::Dict(s) => {
                if self.revisit(state, s.id()) {
                    return Ok(());
                }
                self.visited.mark(s.id(), entry(s.id(), Kind::Dict));
                if self.options.include_identity {
                    self.identity(state, s.id());
                }
                let items: Vec<Value> = s
                    .read()
                    .iter()
                    .flat_map(|(k, v)| [k.clone(), v.clone()])
                    .collect();
                self.container(state, Kind::Dict, items.len() / 2);
                push_reversed(pending, items);
            }
            Value::Object(s) => {
                if self.revisit(state, s.id()) {
                    return Ok(());
                }
                self.visited.mark(s.id(), entry(s.id(), Kind::Object));
                if self.options.include_identity {
                    self.identity(state, s.id());
                }
                let items: Vec<Value> = s
                    .read()
                    .attributes()
                    .filter(|(name, _)| !name.starts_with('_'))
                    .flat_map(|(name, v)| [Value::str(name), v.clone()])
                    .collect();
                self.container(state, Kind::Object, items.len() / 2);
                push_reversed(pending, items);
            }
        }
        Ok(())
    }

    /// Already-seen list, set, dict or object: contribute its identity
    /// (when requested) and do not expand it again.
    fn revisit(&mut self, state: &mut Sha256, object: ObjectId) -> bool {
        if !self.visited.contains(object) {
            return false;
        }
        if self.options.include_identity {
            self.identity(state, object);
        }
        self.backref(state);
        true
    }

    /// Each member hashed on its own, sub-digests fed in sorted order.
    fn open_set(&mut self, state: &mut Sha256, items: Vec<Value>, pending: &mut Vec<Task>) {
        self.sets.push(SetScope {
            outer: std::mem::replace(state, Sha256::new()),
            base: self.visited.clone(),
            merged: self.visited.clone(),
            digests: Vec::with_capacity(items.len()),
        });
        pending.push(Task::EndSet);
        for item in items.into_iter().rev() {
            pending.push(Task::EndMember);
            pending.push(Task::Visit(item));
            pending.push(Task::BeginMember);
        }
    }

    fn begin_member(&mut self, state: &mut Sha256) {
        if let Some(scope) = self.sets.last() {
            *self.visited = scope.base.clone();
        }
        *state = Sha256::new();
    }

    fn end_member(&mut self, state: &mut Sha256) {
        let digest = Digest(std::mem::replace(state, Sha256::new()).finalize().into());
        if let Some(scope) = self.sets.last_mut() {
            scope.digests.push(digest);
            scope.merged.absorb(self.visited);
        }
    }

    fn end_set(&mut self, state: &mut Sha256) {
        let Some(SetScope {
            outer,
            merged,
            mut digests,
            ..
        }) = self.sets.pop()
        else {
            return;
        };
        *state = outer;
        *self.visited = merged;
        digests.sort();
        for digest in digests {
            state.update([TAG_ELEMENT]);
            state.update(digest.as_bytes());
            self.record(Contribution::Element(digest));
        }
    }

    fn leaf(&mut self, state: &mut Sha256, tag: u8, bytes: &[u8], value: &Value) {
        state.update([tag]);
        state.update(bytes);
        self.record(Contribution::Leaf(value.clone()));
    }

    fn sized_leaf(&mut self, state: &mut Sha256, tag: u8, bytes: &[u8], value: &Value) {
        state.update([tag]);
        state.update((bytes.len() as u64).to_le_bytes());
        state.update(bytes);
        self.record(Contribution::Leaf(value.clone()));
    }

    fn identity(&mut self, state: &mut Sha256, object: ObjectId) {
        state.update([TAG_IDENTITY]);
        state.update(object.get().to_le_bytes());
        self.record(Contribution::Identity(object.get()));
    }

    fn container(&mut self, state: &mut Sha256, kind: Kind, len: usize) {
        if !self.options.mark_containers {
            return;
        }
        state.update([TAG_CONTAINER, kind_tag(kind)]);
        state.update((len as u64).to_le_bytes());
        self.record(Contribution::Container { kind, len });
    }

    fn backref(&mut self, state: &mut Sha256) {
        if self.options.mark_containers {
            state.update([TAG_BACKREF]);
        }
    }

    /// Contributions inside canonical set members only reach the trace
    /// through their member's sub-digest.
    fn record(&mut self, contribution: Contribution) {
        if !self.sets.is_empty() {
            return;
        }
        if let Some(trace) = self.trace.as_deref_mut() {
            trace.push(contribution);
        }
    }
}

fn entry(object: ObjectId, kind: Kind) -> VisitedEntry {
    VisitedEntry {
        identity: object.get(),
        kind,
    }
}

fn push_reversed(pending: &mut Vec<Task>, items: Vec<Value>) {
    pending.extend(items.into_iter().rev().map(Task::Visit));
}

fn kind_tag(kind: Kind) -> u8 {
    match kind {
        Kind::Int => 1,
        Kind::Float => 2,
        Kind::Bool => 3,
        Kind::String => 4,
        Kind::List => 5,
        Kind::Tuple => 6,
        Kind::Dict => 7,
        Kind::Set => 8,
        Kind::Object => 9,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Shared;

    fn hash(value: &Value, include_identity: bool) -> Digest {
        structural_hash(value, include_identity).unwrap()
    }

    #[test]
    fn equal_primitives_hash_equal() {
        assert_eq!(hash(&Value::Int(5), false), hash(&Value::Int(5), false));
        assert_ne!(hash(&Value::Int(5), false), hash(&Value::Int(6), false));
        assert_ne!(hash(&Value::Int(1), false), hash(&Value::Float(1.0), false));
        assert_ne!(hash(&Value::Int(1), false), hash(&Value::Bool(true), false));
    }

    #[test]
    fn strings_are_length_prefixed() {
        let a = Value::list(vec![Value::str("ab"), Value::str("c")]);
        let b = Value::list(vec![Value::str("a"), Value::str("bc")]);
        assert_ne!(hash(&a, false), hash(&b, false));
    }

    #[test]
    fn identity_changes_digest_only_when_requested() {
        let a = Value::list(vec![Value::Int(1)]);
        let b = Value::list(vec![Value::Int(1)]);
        assert_eq!(hash(&a, false), hash(&b, false));
        assert_ne!(hash(&a, true), hash(&b, true));
        assert_eq!(hash(&a, true), hash(&a, true));
    }

    #[test]
    fn tuples_never_contribute_identity() {
        let a = Value::tuple(vec![Value::Int(1)]);
        let b = Value::tuple(vec![Value::Int(1)]);
        assert_eq!(hash(&a, true), hash(&b, true));
    }

    #[test]
    fn self_referential_tuple_terminates() {
        let items = Shared::new(vec![Value::Int(1)]);
        let tuple = Value::Tuple(items.clone());
        items.write().push(tuple.clone());
        assert_eq!(hash(&tuple, true), hash(&tuple, true));
        items.write().clear();
    }

    #[test]
    fn cyclic_dict_terminates() {
        let dict = Shared::new(crate::value::Dict::new());
        let value = Value::Dict(dict.clone());
        dict.write().insert(Value::str("self"), value.clone());
        let first = hash(&value, true);
        assert_eq!(first, hash(&value, true));
        dict.write().remove(&Value::str("self"));
    }

    #[test]
    fn extra_kinds_are_hashable() {
        let value = Value::list(vec![
            Value::None,
            Value::bytes(b"raw"),
            Value::bytearray(vec![1, 2]),
            Value::class("pkg.Point"),
            Value::function("pkg.helper"),
        ]);
        assert_eq!(hash(&value, false), hash(&value, false));
        assert_ne!(
            hash(&Value::bytes(b"raw"), false),
            hash(&Value::bytearray(b"raw".to_vec()), false)
        );
    }

    #[test]
    fn callables_contribute_identity_only_when_requested() {
        let f = Value::function("f");
        let g = Value::function("f");
        assert_eq!(hash(&f, false), hash(&g, false));
        assert_ne!(hash(&f, true), hash(&g, true));
    }

    #[test]
    fn opaque_values_are_rejected() {
        let value = Value::list(vec![Value::resource("file handle")]);
        assert!(matches!(
            structural_hash(&value, false),
            Err(EngineError::UnsupportedType { kind: "resource" })
        ));
    }

    #[test]
    fn container_markers_distinguish_nesting() {
        let a = Value::list(vec![Value::Int(1), Value::list(vec![Value::Int(2)])]);
        let b = Value::list(vec![Value::list(vec![Value::Int(1)]), Value::Int(2)]);
        assert_eq!(hash(&a, false), hash(&b, false));

        let config = EngineConfig::default();
        let marked = HashOptions {
            mark_containers: true,
            ..HashOptions::default()
        };
        let hasher = StructuralHasher::new(&config, marked);
        assert_ne!(hasher.hash(&a).unwrap(), hasher.hash(&b).unwrap());
    }

    #[test]
    fn canonical_sets_ignore_iteration_order() {
        let a = Value::set(vec![Value::Int(1), Value::str("x"), Value::Int(3)]);
        let b = Value::set(vec![Value::Int(3), Value::Int(1), Value::str("x")]);
        assert_ne!(hash(&a, false), hash(&b, false));

        let config = EngineConfig {
            set_order: SetOrder::Canonical,
            ..EngineConfig::default()
        };
        let hasher = StructuralHasher::new(&config, HashOptions::default());
        assert_eq!(hasher.hash(&a).unwrap(), hasher.hash(&b).unwrap());
    }

    #[test]
    fn canonical_sets_of_objects_sharing_a_child_ignore_iteration_order() {
        let data = Value::list(vec![Value::Int(7)]);
        let p = Value::object("P", vec![("x", Value::Int(1)), ("data", data.clone())]);
        let q = Value::object("P", vec![("x", Value::Int(2)), ("data", data.clone())]);
        let a = Value::set(vec![p.clone(), q.clone()]);
        let b = Value::set(vec![q, p]);

        let config = EngineConfig {
            set_order: SetOrder::Canonical,
            ..EngineConfig::default()
        };
        for options in [HashOptions::default(), HashOptions::with_identity(true)] {
            let hasher = StructuralHasher::new(&config, options);
            assert_eq!(hasher.hash(&a).unwrap(), hasher.hash(&b).unwrap());
        }
    }

    #[test]
    fn canonical_set_traces_one_element_per_member() {
        let config = EngineConfig {
            set_order: SetOrder::Canonical,
            ..EngineConfig::default()
        };
        let value = Value::list(vec![
            Value::set(vec![Value::Int(1), Value::list(vec![Value::Int(2)])]),
            Value::Int(3),
        ]);
        let hasher = StructuralHasher::new(&config, HashOptions::default());
        let trace = hasher.hash_traced(&value).unwrap();
        let elements = trace
            .contributions
            .iter()
            .filter(|c| matches!(c, Contribution::Element(_)))
            .count();
        assert_eq!(elements, 2);
        assert!(matches!(
            trace.contributions.last(),
            Some(Contribution::Leaf(Value::Int(3)))
        ));
        assert_eq!(trace.digest, hasher.hash(&value).unwrap());
    }

    #[test]
    fn trace_lists_contributions_in_order() {
        let inner = Value::list(vec![Value::Int(2)]);
        let outer = Value::list(vec![Value::Int(1), inner.clone()]);
        let config = EngineConfig::default();
        let trace = StructuralHasher::new(&config, HashOptions::with_identity(true))
            .hash_traced(&outer)
            .unwrap();
        let summary: Vec<String> = trace
            .contributions
            .iter()
            .map(|c| match c {
                Contribution::Identity(id) => format!("id:{id}"),
                Contribution::Leaf(Value::Int(v)) => format!("int:{v}"),
                other => format!("{other:?}"),
            })
            .collect();
        let outer_id = outer.object_id().unwrap().get();
        let inner_id = inner.object_id().unwrap().get();
        assert_eq!(
            summary,
            vec![
                format!("id:{outer_id}"),
                "int:1".to_string(),
                format!("id:{inner_id}"),
                "int:2".to_string(),
            ]
        );
        assert_eq!(trace.digest, hash(&outer, true));
    }

    #[test]
    fn digest_hex_round_trip() {
        let digest = hash(&Value::str("abc"), false);
        let hex = digest.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Digest::from_hex(&hex).unwrap(), digest);
        assert!(Digest::from_hex("zz").is_err());
    }
}
