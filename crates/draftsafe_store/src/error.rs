//! Error types for store operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for store operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while persisting or loading store state.
///
/// Storage errors are fatal from the point of view of the sync layer:
/// if the local store cannot be written, the "your edit is safe locally"
/// guarantee no longer holds and callers must be told.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding or decoding a persisted collection failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// Another process holds the store directory lock.
    #[error("store directory is locked: {}", path.display())]
    Locked {
        /// The contended store directory.
        path: PathBuf,
    },

    /// The store path exists but is not a directory.
    #[error("store path is not a directory: {}", path.display())]
    NotADirectory {
        /// The offending path.
        path: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StorageError::Codec("truncated document".into());
        assert_eq!(err.to_string(), "codec error: truncated document");

        let err = StorageError::Locked {
            path: PathBuf::from("/tmp/drafts"),
        };
        assert!(err.to_string().contains("/tmp/drafts"));
    }
}
