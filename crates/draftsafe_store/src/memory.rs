//! In-memory store backend for testing and ephemeral use.

use crate::backend::StoreBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An in-memory store backend.
///
/// Collections live in a map; nothing survives the process. Clones share
/// the same underlying state, which lets tests keep a handle to the
/// backend after handing it to a store.
///
/// Writes can be made to fail on demand via [`set_fail_writes`], to
/// exercise the fatal-storage-error paths of callers.
///
/// [`set_fail_writes`]: InMemoryBackend::set_fail_writes
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    inner: Arc<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    collections: RwLock<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl InMemoryBackend {
    /// Creates a new, empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `write` calls fail with an I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl StoreBackend for InMemoryBackend {
    fn read(&self, collection: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.inner.collections.read().get(collection).cloned())
    }

    fn write(&self, collection: &str, data: &[u8]) -> StorageResult<()> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::other(
                "simulated write failure",
            )));
        }
        self.inner
            .collections
            .write()
            .insert(collection.to_owned(), data.to_vec());
        Ok(())
    }

    fn remove(&self, collection: &str) -> StorageResult<()> {
        self.inner.collections.write().remove(collection);
        Ok(())
    }
}
