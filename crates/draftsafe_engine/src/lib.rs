//! # DraftSafe Engine
//!
//! Sync orchestrator for the DraftSafe reliability layer.
//!
//! This crate provides:
//! - Per-note sync sessions with supersede-on-newer-edit cancellation
//! - Retry with exponential backoff for transient remote failures
//! - Offline queueing and queue flush on reconnect
//! - Crash/startup recovery of unsynced drafts
//! - A notification bus for UI consumers
//!
//! ## Architecture
//!
//! The engine sits between callers and two collaborators: the durable
//! [`draftsafe_store::DraftStore`] and a remote "apply update" seam
//! ([`RemoteApplier`]). Every save is persisted locally **before** any
//! network attempt, so a crash at any point loses nothing.
//!
//! ## Key Invariants
//!
//! - A draft is only deleted after the remote confirms the edit (or the
//!   caller dismisses it)
//! - Per note, a newer save always supersedes an older in-flight one
//! - Ordinary network failure never surfaces as an error: callers get a
//!   discriminated [`SaveOutcome`] instead
//! - Only a storage failure rejects, because it breaks the crash-safety
//!   guarantee and the caller must know

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod events;
mod remote;
mod session;

pub use config::{RetryConfig, SyncConfig};
pub use engine::{EngineState, FlushReport, SaveOutcome, SyncEngine, SyncStats, WaitReport};
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, SyncEvent};
pub use remote::{ApplyFuture, MockRemote, RemoteApplier, RemoteError, RemoteNote};
pub use session::{CancelToken, SessionRegistry};
