//! Runtime error type.

use thiserror::Error;

use idgraph_engine::EngineError;

/// All possible checkpoint and snapshot failures.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The engine rejected a call (bad handle, unsupported value, ...).
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// JSON serialization of a snapshot record failed.
    #[error("snapshot serialization failed: {0}")]
    Serialization(String),

    /// Malformed JSON, missing fields, unknown fields or a bad digest.
    #[error("snapshot deserialization failed: {0}")]
    Deserialization(String),

    /// The encoded snapshot does not hash to the expected value.
    #[error("snapshot hash mismatch: expected {expected}, computed {actual}")]
    HashMismatch { expected: String, actual: String },
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
