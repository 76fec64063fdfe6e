#![forbid(unsafe_code)]

//! Object-graph identity and structural hashing engine.
//!
//! Reduces a live, possibly cyclic object graph to either an explicit node
//! tree (for structural comparison and canonical text) or a fixed-width
//! digest, so a session versioning tool can tell which variables changed
//! between two checkpoints.

pub mod value;
pub mod node;
pub mod config;
pub mod error;
pub mod visited;
pub mod builder;
pub mod hashing;
pub mod serialize;
pub mod compare;
pub mod handle;
pub mod engine;

pub use config::{CallablePolicy, EngineConfig, HashOptions, IdentityMode, SetOrder};
pub use engine::IdGraphEngine;
pub use error::{EngineError, Result};
pub use handle::GraphHandle;
pub use hashing::Digest;
pub use node::{Kind, Node, Primitive};
pub use value::{ObjectId, Shared, Value};
