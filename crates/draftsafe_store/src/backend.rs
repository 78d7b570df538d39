//! Store backend trait definition.

use crate::error::StorageResult;

/// A low-level persistence backend for the draft store.
///
/// Backends are **opaque blob stores** keyed by collection name. They do
/// not interpret the documents they hold; the [`crate::DraftStore`] owns
/// all encoding and schema concerns.
///
/// # Invariants
///
/// - `write` replaces the collection atomically: a crash mid-write leaves
///   either the old document or the new one, never a mix
/// - `read` returns exactly the bytes of the last completed `write`, or
///   `None` if the collection was never written (or was removed)
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - for testing
/// - [`super::FileBackend`] - for persistent storage
pub trait StoreBackend: Send + Sync + 'static {
    /// Reads the current document of a collection.
    ///
    /// Returns `None` if the collection has never been written.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read(&self, collection: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Atomically replaces the document of a collection.
    ///
    /// After this returns successfully, the new document is durable and
    /// will be returned by subsequent `read` calls, including after a
    /// process restart for persistent backends.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or the durability barrier fails.
    fn write(&self, collection: &str, data: &[u8]) -> StorageResult<()>;

    /// Removes a collection entirely.
    ///
    /// Removing a collection that does not exist is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn remove(&self, collection: &str) -> StorageResult<()>;
}
