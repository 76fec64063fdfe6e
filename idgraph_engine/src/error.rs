/// Engine error taxonomy.
///
/// Every failure aborts the whole traversal call that raised it. Nothing
/// partially built is ever returned.

use thiserror::Error;

use crate::handle::GraphHandle;

/// All possible engine failures.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The input reaches a value outside the describable kind set.
    #[error("unsupported type: {kind}")]
    UnsupportedType { kind: &'static str },

    /// A node or combiner allocation failed, or the node budget ran out.
    #[error("allocation failure: {0}")]
    AllocationFailure(String),

    /// The handle does not reference a live graph of this engine.
    #[error("invalid handle: {0}")]
    InvalidHandle(GraphHandle),

    /// Text is not a canonical graph document.
    #[error("decode error: {0}")]
    Decode(String),

    /// Engine configuration could not be parsed.
    #[error("invalid engine config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
