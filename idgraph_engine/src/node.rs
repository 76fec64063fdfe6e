/// Graph nodes produced by the builder.
///
/// A node tree is strictly tree-shaped: a container reached a second time
/// within one traversal appears as a stub (identity and kind only), never
/// as a pointer back into the tree.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Closed set of node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    #[serde(rename = "int")]
    Int,
    #[serde(rename = "float")]
    Float,
    #[serde(rename = "bool")]
    Bool,
    #[serde(rename = "string")]
    String,
    #[serde(rename = "list")]
    List,
    #[serde(rename = "tuple")]
    Tuple,
    #[serde(rename = "dict")]
    Dict,
    #[serde(rename = "set")]
    Set,
    #[serde(rename = "class")]
    Object,
}

impl Kind {
    /// Wire name used in the canonical text form.
    pub fn name(self) -> &'static str {
        match self {
            Kind::Int => "int",
            Kind::Float => "float",
            Kind::Bool => "bool",
            Kind::String => "string",
            Kind::List => "list",
            Kind::Tuple => "tuple",
            Kind::Dict => "dict",
            Kind::Set => "set",
            Kind::Object => "class",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "int" => Kind::Int,
            "float" => Kind::Float,
            "bool" => Kind::Bool,
            "string" => Kind::String,
            "list" => Kind::List,
            "tuple" => Kind::Tuple,
            "dict" => Kind::Dict,
            "set" => Kind::Set,
            "class" => Kind::Object,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_primitive(self) -> bool {
        matches!(self, Kind::Int | Kind::Float | Kind::Bool | Kind::String)
    }
}

/// Typed value carried by a primitive node.
#[derive(Debug, Clone)]
pub enum Primitive {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
}

impl Primitive {
    pub fn kind(&self) -> Kind {
        match self {
            Primitive::Int(_) => Kind::Int,
            Primitive::Float(_) => Kind::Float,
            Primitive::Bool(_) => Kind::Bool,
            Primitive::Str(_) => Kind::String,
        }
    }

    /// Natural equality for the type. No cross-type coercion.
    /// Floats compare by bit pattern, with every NaN equal to every NaN.
    pub fn same_as(&self, other: &Primitive) -> bool {
        match (self, other) {
            (Primitive::Int(a), Primitive::Int(b)) => a == b,
            (Primitive::Float(a), Primitive::Float(b)) => {
                a.to_bits() == b.to_bits() || (a.is_nan() && b.is_nan())
            }
            (Primitive::Bool(a), Primitive::Bool(b)) => a == b,
            (Primitive::Str(a), Primitive::Str(b)) => a.as_bytes() == b.as_bytes(),
            _ => false,
        }
    }

    /// Deterministic text rendering, independent of locale.
    ///
    /// Floats use the shortest representation that parses back to the same
    /// value (`1.0`, `0.1`, `-0.0`, `NaN`, `inf`).
    pub fn render(&self) -> String {
        match self {
            Primitive::Int(v) => v.to_string(),
            Primitive::Float(v) => format!("{:?}", v),
            Primitive::Bool(v) => v.to_string(),
            Primitive::Str(v) => v.clone(),
        }
    }

    /// Inverse of [`Primitive::render`].
    pub fn parse(kind: Kind, text: &str) -> Result<Self> {
        let bad = || EngineError::Decode(format!("invalid {} value {:?}", kind.name(), text));
        match kind {
            Kind::Int => text.parse::<i64>().map(Primitive::Int).map_err(|_| bad()),
            Kind::Float => text.parse::<f64>().map(Primitive::Float).map_err(|_| bad()),
            Kind::Bool => match text {
                "true" => Ok(Primitive::Bool(true)),
                "false" => Ok(Primitive::Bool(false)),
                _ => Err(bad()),
            },
            Kind::String => Ok(Primitive::Str(text.to_string())),
            _ => Err(EngineError::Decode(format!(
                "{} is not a primitive kind",
                kind.name()
            ))),
        }
    }
}

/// One node of a built graph.
///
/// Primitive nodes carry a value and no children; their identity is `0`.
/// Container and object nodes carry an identity and owned children.
#[derive(Debug)]
pub struct Node {
    identity: u64,
    kind: Kind,
    value: Option<Primitive>,
    children: Vec<Node>,
}

impl Node {
    pub fn leaf(value: Primitive) -> Self {
        Self {
            identity: 0,
            kind: value.kind(),
            value: Some(value),
            children: Vec::new(),
        }
    }

    pub fn container(identity: u64, kind: Kind, children: Vec<Node>) -> Self {
        debug_assert!(!kind.is_primitive(), "container node with primitive kind");
        Self {
            identity,
            kind,
            value: None,
            children,
        }
    }

    /// Placeholder for an object already expanded earlier in the traversal.
    pub fn stub(identity: u64, kind: Kind) -> Self {
        Self::container(identity, kind, Vec::new())
    }

    pub fn identity(&self) -> u64 {
        self.identity
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn is_primitive(&self) -> bool {
        self.kind.is_primitive()
    }

    pub fn value(&self) -> Option<&Primitive> {
        self.value.as_ref()
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub(crate) fn set_identity(&mut self, identity: u64) {
        self.identity = identity;
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<Node> {
        &mut self.children
    }

    /// Total number of nodes in this tree, this one included.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            count += 1;
            pending.extend(node.children.iter());
        }
        count
    }
}

// Iterative teardown; the default recursive drop overflows the stack on
// deeply nested trees.
impl Drop for Node {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        crate::compare::equal(self, other)
    }
}
