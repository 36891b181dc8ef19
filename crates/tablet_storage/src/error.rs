//! Error types for directory operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for directory operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during directory operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The target path does not exist.
    #[error("path not found: {}", path.display())]
    NotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// A no-overwrite store found the target already present.
    #[error("path already exists: {}", path.display())]
    AlreadyExists {
        /// The existing path.
        path: PathBuf,
    },

    /// Stored data is corrupted or the layout is inconsistent.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// A failure injected by a test directory.
    #[error("injected failure on {}", path.display())]
    Injected {
        /// The path the failure was injected on.
        path: PathBuf,
    },
}

impl StorageError {
    /// Returns true if this error reports a missing path.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Io(err) => err.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Returns true if this error reports an already-present path.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        match self {
            Self::AlreadyExists { .. } => true,
            Self::Io(err) => err.kind() == io::ErrorKind::AlreadyExists,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_is_classified() {
        let err = StorageError::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(err.is_not_found());
        assert!(!err.is_already_exists());
    }

    #[test]
    fn already_exists_display_contains_path() {
        let err = StorageError::AlreadyExists {
            path: PathBuf::from("version.1"),
        };
        assert!(err.is_already_exists());
        assert!(err.to_string().contains("version.1"));
    }
}
