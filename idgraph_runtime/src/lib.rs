#![forbid(unsafe_code)]

//! Checkpoint change detection for interpreter sessions.
//!
//! Wraps `idgraph_engine` with a namespace model, a checkpoint session
//! that reports which variables changed, and a portable snapshot record
//! for comparing checkpoints taken in different processes.
//!
//! Deciding when to checkpoint and storing the changed values are left to
//! the caller.

pub mod error;
pub mod namespace;
pub mod changes;
pub mod session;
pub mod snapshot;

pub use changes::ChangeSet;
pub use error::{Result, RuntimeError};
pub use namespace::Namespace;
pub use session::{CheckpointSession, DetectionStrategy, SessionConfig, SharedSession};
pub use snapshot::{
    decode_snapshot, diff_snapshots, encode_snapshot, snapshot_hash, verify_snapshot_hash,
    SnapshotRecord, VariableRecord,
};
