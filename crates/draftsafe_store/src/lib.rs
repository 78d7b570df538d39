//! # DraftSafe Store
//!
//! Crash-safe local persistence for the DraftSafe reliability layer.
//!
//! This crate provides the durable leaf store that the sync orchestrator
//! (`draftsafe_engine`) is built on. It holds two independent collections:
//!
//! - **Drafts**: at most one per note, written before any network attempt
//! - **Pending operations**: a FIFO queue of updates that could not be
//!   applied remotely yet
//!
//! There is no retry or network logic here. Every mutation is persisted
//! before it returns, and a persistence failure surfaces directly as a
//! [`StorageError`] — it is never swallowed, because the caller's crash
//! safety depends on it.
//!
//! ## Backends
//!
//! Persistence goes through the [`StoreBackend`] trait:
//!
//! - [`FileBackend`] - directory of CBOR files with atomic replace writes
//! - [`InMemoryBackend`] - for testing and ephemeral use
//!
//! ## Example
//!
//! ```rust
//! use draftsafe_store::{DraftStore, InMemoryBackend, NoteId, NoteUpdate};
//!
//! let store = DraftStore::open(InMemoryBackend::new()).unwrap();
//! let id = NoteId::from("note-1");
//! store.save_draft(&id, NoteUpdate::new("Title", "Body", vec![]), None).unwrap();
//! assert!(store.get_draft(&id).is_some());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod store;
mod types;

pub use backend::StoreBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
pub use store::{DraftStore, OperationPatch, DRAFTS_COLLECTION, PENDING_COLLECTION};
pub use types::{now_millis, Draft, NoteId, NoteUpdate, OperationKind, PendingOperation};
