//! File-based store backend for persistent storage.

use crate::backend::StoreBackend;
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Advisory lock for single-process ownership of the store directory.
const LOCK_FILE: &str = "LOCK";

/// A file-based store backend.
///
/// Each collection lives in its own `<name>.cbor` file inside the store
/// directory. Writes go to a temporary sibling which is fsynced and then
/// renamed over the old document, so a crash mid-write can never leave a
/// half-written collection behind.
///
/// The directory layout:
///
/// ```text
/// <store_dir>/
/// ├─ LOCK             # advisory lock, held while the backend is open
/// ├─ drafts.cbor      # drafts collection
/// └─ pending.cbor     # pending-operation queue
/// ```
///
/// # Thread Safety
///
/// The backend is thread-safe; atomicity comes from the rename, not from
/// locking, so concurrent writers of *different* collections never block
/// each other.
#[derive(Debug)]
pub struct FileBackend {
    dir: PathBuf,
    _lock_file: File,
}

impl FileBackend {
    /// Opens or creates a store directory.
    ///
    /// Acquires an exclusive advisory lock on the directory; only one
    /// backend instance may own a directory at a time.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The path exists but is not a directory
    /// - Another process (or backend instance) holds the lock
    /// - An I/O error occurs
    pub fn open(dir: &Path) -> StorageResult<Self> {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
        }

        if !dir.is_dir() {
            return Err(StorageError::NotADirectory {
                path: dir.to_path_buf(),
            });
        }

        let lock_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StorageError::Locked {
                path: dir.to_path_buf(),
            })?;

        Ok(Self {
            dir: dir.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory path.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.dir.join(format!("{collection}.cbor"))
    }
}

impl StoreBackend for FileBackend {
    fn read(&self, collection: &str) -> StorageResult<Option<Vec<u8>>> {
        match fs::read(self.collection_path(collection)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, collection: &str, data: &[u8]) -> StorageResult<()> {
        let path = self.collection_path(collection);
        let tmp = self.dir.join(format!("{collection}.cbor.tmp"));

        {
            let mut file = File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }

        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, collection: &str) -> StorageResult<()> {
        match fs::remove_file(self.collection_path(collection)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
