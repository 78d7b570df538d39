//! Error types for the sync orchestrator.

use draftsafe_store::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync orchestration.
///
/// Only storage failures ever reach callers of the public API: remote
/// failures resolve as a queued [`crate::SaveOutcome`] and a superseded
/// session settles as [`crate::SaveOutcome::Superseded`], so neither is
/// an error.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The durable store failed. Fatal: local safety can no longer be
    /// guaranteed, so this propagates unmasked.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_convert_and_display() {
        let err = SyncError::from(StorageError::Codec("truncated document".into()));
        assert!(matches!(err, SyncError::Storage(_)));
        assert!(err.to_string().contains("truncated document"));
    }
}
