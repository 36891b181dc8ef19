//! Error types for the tablet core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Typed failure of parsing persisted JSON documents or encoded names.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Malformed JSON document.
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    /// A file or directory name that does not follow its encoding.
    #[error("invalid {kind} name: {name}")]
    InvalidName {
        /// What kind of name was being parsed (fence, segment, version).
        kind: &'static str,
        /// The offending name.
        name: String,
    },
}

impl ParseError {
    /// Creates an invalid name error.
    pub fn invalid_name(kind: &'static str, name: impl Into<String>) -> Self {
        Self::InvalidName {
            kind,
            name: name.into(),
        }
    }
}

/// Errors that can occur in tablet core operations.
///
/// The variants map onto four handling classes:
/// - `InvalidArgs`: malformed caller input, never retried
/// - `Exist` / `Abort`: optimistic-concurrency conflicts, retryable with a fresh id
/// - `Storage` / `Io` / `Corruption` / `Parse`: durable-storage failures, surfaced
/// - `Internal` / `DumpFailed`: invariant violations and recorded dump failures
#[derive(Debug, Error)]
pub enum CoreError {
    /// Directory error.
    #[error("storage error: {0}")]
    Storage(#[from] tablet_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Persisted document could not be parsed.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Malformed caller input.
    #[error("invalid arguments: {message}")]
    InvalidArgs {
        /// Description of the problem.
        message: String,
    },

    /// The target already exists (optimistic-concurrency conflict).
    #[error("already exists: {message}")]
    Exist {
        /// Description of the conflicting target.
        message: String,
    },

    /// The operation gave up after conflicts or was refused.
    #[error("aborted: {message}")]
    Abort {
        /// Reason for the abort.
        message: String,
    },

    /// Persisted data is inconsistent.
    #[error("corruption: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },

    /// An internal invariant was violated.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },

    /// A segment dump failed earlier and blocks further commits.
    #[error("dump of segment {segment_id} failed: {message}")]
    DumpFailed {
        /// Raw id of the segment whose dump failed.
        segment_id: i32,
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid arguments error.
    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::InvalidArgs {
            message: message.into(),
        }
    }

    /// Creates an exist (conflict) error.
    pub fn exist(message: impl Into<String>) -> Self {
        Self::Exist {
            message: message.into(),
        }
    }

    /// Creates an abort error.
    pub fn abort(message: impl Into<String>) -> Self {
        Self::Abort {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true for conflicts that a caller may retry with a fresh id.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Exist { .. } => true,
            Self::Storage(err) => err.is_already_exists(),
            _ => false,
        }
    }

    /// Returns true if the error reports a missing file or directory.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Storage(err) => err.is_not_found(),
            Self::Io(err) => err.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
