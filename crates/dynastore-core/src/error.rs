//! Error types for all DynaStore operations.

use std::io;
use thiserror::Error;

/// Top-level error type for DynaStore operations.
///
/// Variants map one-to-one onto the wire-level error kinds of the emulated
/// service; the HTTP layer decides status codes and `__type` strings.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input, unsupported expression form, key-type mismatch,
    /// invalid update target.
    #[error("{0}")]
    Validation(String),

    /// Referenced table, index, or snapshot is missing.
    #[error("{0}")]
    ResourceNotFound(String),

    /// Table already exists.
    #[error("{0}")]
    ResourceInUse(String),

    /// A non-transactional conditional write failed its condition.
    #[error("the conditional request failed")]
    ConditionCheckFailed,

    /// One or more in-transaction conditions failed. `reasons[k]` describes
    /// the k-th item of the request.
    #[error("transaction canceled")]
    TransactionCanceled { reasons: Vec<CancellationReason> },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }
}

/// Errors from the ordered-KV layer; all surface as `InternalServerError`
/// at the wire boundary.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("kv store error: {0}")]
    Kv(#[from] fjall::Error),

    #[error("stored bytes are not a valid record: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("storage handle is closed")]
    Closed,
}

/// Per-item outcome reported when a transaction is canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationReason {
    None,
    ConditionalCheckFailed,
}

impl CancellationReason {
    /// Wire code for this reason.
    pub fn code(&self) -> &'static str {
        match self {
            CancellationReason::None => "None",
            CancellationReason::ConditionalCheckFailed => "ConditionalCheckFailed",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
