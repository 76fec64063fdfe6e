/// Runtime value model: the live session objects the engine walks.
///
/// Primitives (`None`, `Bool`, `Int`, `Float`, `Str`, `Bytes`) are plain
/// values with no identity. Everything else lives in a [`Shared`] cell that
/// carries an [`ObjectId`], so graphs can alias and can be cyclic.
///
/// Cyclic values are reference cycles: like any `Arc` cycle they are only
/// freed once the cycle is broken (for example by clearing a list).
/// Acyclic values of any depth drop without recursion.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// Object identity
// ---------------------------------------------------------------------------

/// Runtime identity of a shared object.
///
/// Allocated from a process-wide monotonic counter and never reused, so two
/// objects can never share an id, even if one was dropped long ago.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    fn fresh() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Cell<T> {
    id: ObjectId,
    data: RwLock<T>,
}

/// A shared, lock-protected object with a stable identity.
pub struct Shared<T: Contents>(Arc<Cell<T>>);

impl<T: Contents> Shared<T> {
    pub fn new(data: T) -> Self {
        Self(Arc::new(Cell {
            id: ObjectId::fresh(),
            data: RwLock::new(data),
        }))
    }

    pub fn id(&self) -> ObjectId {
        self.0.id
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.data.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.data.write()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: Contents> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

// Only the id: printing contents would recurse forever on cycles.
impl<T: Contents> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shared(#{})", self.0.id)
    }
}

/// Payload of a [`Shared`] cell.
pub trait Contents {
    /// Move every directly held value into `out`.
    fn take_values(&mut self, _out: &mut Vec<Value>) {}
}

/// The last owner of a cell unlinks its contents into a worklist and
/// releases them one level at a time, so a long chain of nested
/// containers never drops recursively.
impl<T: Contents> Drop for Shared<T> {
    fn drop(&mut self) {
        let mut pending = Vec::new();
        take_contents(&mut self.0, &mut pending);
        while let Some(mut value) = pending.pop() {
            match &mut value {
                Value::List(s) | Value::Tuple(s) | Value::Set(s) => {
                    take_contents(&mut s.0, &mut pending)
                }
                Value::Dict(s) => take_contents(&mut s.0, &mut pending),
                Value::Object(s) => take_contents(&mut s.0, &mut pending),
                _ => {}
            }
        }
    }
}

fn take_contents<T: Contents>(cell: &mut Arc<Cell<T>>, out: &mut Vec<Value>) {
    if let Some(cell) = Arc::get_mut(cell) {
        cell.data.get_mut().take_values(out);
    }
}

impl Contents for Vec<Value> {
    fn take_values(&mut self, out: &mut Vec<Value>) {
        out.append(self);
    }
}

impl Contents for Vec<u8> {}

// ---------------------------------------------------------------------------
// Containers and objects
// ---------------------------------------------------------------------------

/// Insertion-ordered mapping.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: Vec<(Value, Value)>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. An existing key keeps its position.
    pub fn insert(&mut self, key: Value, value: Value) -> Option<Value> {
        match self.entries.iter_mut().find(|(k, _)| k.key_eq(&key)) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((key, value));
                None
            }
        }
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| k.key_eq(key))
            .map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let pos = self.entries.iter().position(|(k, _)| k.key_eq(key))?;
        Some(self.entries.remove(pos).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }
}

impl Contents for Dict {
    fn take_values(&mut self, out: &mut Vec<Value>) {
        out.extend(self.entries.drain(..).flat_map(|(k, v)| [k, v]));
    }
}

/// An instance of a user-defined class: a class name plus an ordered
/// attribute store.
#[derive(Debug, Clone)]
pub struct Instance {
    class_name: String,
    attributes: Vec<(String, Value)>,
}

impl Instance {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            attributes: Vec::new(),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.attributes.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.attributes.push((name, value)),
        }
    }

    pub fn get_attr(&self, name: &str) -> Option<&Value> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn del_attr(&mut self, name: &str) -> Option<Value> {
        let pos = self.attributes.iter().position(|(n, _)| n == name)?;
        Some(self.attributes.remove(pos).1)
    }

    /// Attributes in store order, private ones included.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.attributes.iter().map(|(n, v)| (n.as_str(), v))
    }
}

impl Contents for Instance {
    fn take_values(&mut self, out: &mut Vec<Value>) {
        out.extend(self.attributes.drain(..).map(|(_, v)| v));
    }
}

/// A class object.
#[derive(Debug, Clone)]
pub struct TypeObject {
    pub qualname: String,
}

/// A function, bound method or other callable.
#[derive(Debug, Clone)]
pub struct Callable {
    pub qualname: String,
}

/// A foreign resource (open file, socket, lock). Never describable.
#[derive(Debug, Clone)]
pub struct Resource {
    pub description: String,
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

impl Contents for TypeObject {}
impl Contents for Callable {}
impl Contents for Resource {}

/// A session value.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Bytes(Arc<[u8]>),
    ByteArray(Shared<Vec<u8>>),
    List(Shared<Vec<Value>>),
    Tuple(Shared<Vec<Value>>),
    Dict(Shared<Dict>),
    Set(Shared<Vec<Value>>),
    Object(Shared<Instance>),
    Type(Shared<TypeObject>),
    Callable(Shared<Callable>),
    Opaque(Shared<Resource>),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    pub fn bytes(data: &[u8]) -> Self {
        Value::Bytes(Arc::from(data))
    }

    pub fn bytearray(data: Vec<u8>) -> Self {
        Value::ByteArray(Shared::new(data))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Shared::new(items))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Shared::new(items))
    }

    /// Build a set, dropping duplicate members (first occurrence wins).
    pub fn set(items: Vec<Value>) -> Self {
        let mut members: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            if !members.iter().any(|m| m.key_eq(&item)) {
                members.push(item);
            }
        }
        Value::Set(Shared::new(members))
    }

    pub fn dict(pairs: Vec<(Value, Value)>) -> Self {
        let mut dict = Dict::new();
        for (k, v) in pairs {
            dict.insert(k, v);
        }
        Value::Dict(Shared::new(dict))
    }

    pub fn object(class_name: &str, attributes: Vec<(&str, Value)>) -> Self {
        let mut instance = Instance::new(class_name);
        for (name, value) in attributes {
            instance.set_attr(name, value);
        }
        Value::Object(Shared::new(instance))
    }

    pub fn class(qualname: &str) -> Self {
        Value::Type(Shared::new(TypeObject {
            qualname: qualname.to_string(),
        }))
    }

    pub fn function(qualname: &str) -> Self {
        Value::Callable(Shared::new(Callable {
            qualname: qualname.to_string(),
        }))
    }

    pub fn resource(description: &str) -> Self {
        Value::Opaque(Shared::new(Resource {
            description: description.to_string(),
        }))
    }

    /// Runtime type name, as reported in `UnsupportedType` errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::ByteArray(_) => "bytearray",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Set(_) => "set",
            Value::Object(_) => "object",
            Value::Type(_) => "type",
            Value::Callable(_) => "function",
            Value::Opaque(_) => "resource",
        }
    }

    /// Identity of the underlying shared object; `None` for primitives.
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            Value::None
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::Str(_)
            | Value::Bytes(_) => None,
            Value::ByteArray(s) => Some(s.id()),
            Value::List(s) | Value::Tuple(s) | Value::Set(s) => Some(s.id()),
            Value::Dict(s) => Some(s.id()),
            Value::Object(s) => Some(s.id()),
            Value::Type(s) => Some(s.id()),
            Value::Callable(s) => Some(s.id()),
            Value::Opaque(s) => Some(s.id()),
        }
    }

    /// Runtime identity comparison (`is`).
    pub fn same_object(&self, other: &Value) -> bool {
        match (self.object_id(), other.object_id()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Equality used for dict keys and set membership: value equality for
    /// primitives, identity for everything else.
    pub fn key_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            _ => self.same_object(other),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::str(v)
    }
}

// ---------------------------------------------------------------------------
// JSON import
// ---------------------------------------------------------------------------

/// Convert a JSON document into a fresh value graph.
///
/// `null` -> None, arrays -> List, objects -> Dict with string keys,
/// integral numbers that fit i64 -> Int, every other number -> Float.
pub fn from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::str(s),
        serde_json::Value::Array(items) => Value::list(items.iter().map(from_json).collect()),
        serde_json::Value::Object(map) => Value::dict(
            map.iter()
                .map(|(k, v)| (Value::str(k), from_json(v)))
                .collect(),
        ),
    }
}
