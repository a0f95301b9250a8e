//! Error Types
//!
//! Every fallible operation in the crate returns [`Result<T>`], an alias over
//! [`NetError`]. Shape and range errors indicate a configuration bug and abort
//! the current pass; checkpoint errors are reported to the caller, which may
//! choose to continue training without the checkpoint.

use crate::tensor::Shape;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, NetError>;

#[derive(Debug, Error)]
pub enum NetError {
    /// Two blobs (or a blob and a layer parameter) disagree in dimension
    #[error("shape mismatch in {op}: {left} vs {right}")]
    ShapeMismatch {
        op: &'static str,
        left: Shape,
        right: Shape,
    },

    /// Batch sub-range outside `[0, len)`
    #[error("sample range [{lo}, {hi}) out of bounds for batch of {len}")]
    OutOfRange { lo: usize, hi: usize, len: usize },

    #[error("unknown update method '{0}' (expected sgd, momentum or rmsprop)")]
    UnknownOptimizer(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed checkpoint: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl NetError {
    pub(crate) fn shape(op: &'static str, left: Shape, right: Shape) -> Self {
        NetError::ShapeMismatch { op, left, right }
    }
}
