//! Notification bus for sync state transitions.
//!
//! Consumers (UI, navigation guards) subscribe to a stream of
//! [`SyncEvent`]s. Delivery is best-effort and in-process only:
//! disconnected subscribers are dropped on the next emit, and the engine
//! never blocks on a slow consumer.

use draftsafe_store::{Draft, NoteId};
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

use crate::remote::RemoteNote;

/// A sync state transition reported to consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A sync session started for a note.
    SyncStarted {
        /// The note being synced.
        note_id: NoteId,
    },
    /// A note's edit was confirmed by the remote.
    SyncCompleted {
        /// The note that completed.
        note_id: NoteId,
        /// The remote's canonical result.
        remote: RemoteNote,
    },
    /// A sync session ended without remote confirmation.
    SyncFailed {
        /// The note that failed.
        note_id: NoteId,
        /// Description of the failure.
        error: String,
        /// True if the edit will be retried later (transient failure),
        /// false if the remote rejected it permanently. Either way the
        /// edit is queued locally.
        will_retry: bool,
    },
    /// The pending-queue depth changed.
    SyncPending {
        /// Current number of queued operations.
        count: usize,
    },
    /// A draft was persisted locally.
    DraftSaved {
        /// The note whose draft was saved.
        note_id: NoteId,
    },
    /// Connectivity was regained.
    Online,
    /// Connectivity was lost.
    Offline,
    /// Startup recovery found drafts newer than their last known remote
    /// version. The decision to reapply or discard is the caller's.
    RecoveryFound {
        /// The recovered drafts.
        drafts: Vec<Draft>,
    },
}

impl SyncEvent {
    /// Returns the wire-style topic name of this event.
    #[must_use]
    pub fn topic(&self) -> &'static str {
        match self {
            SyncEvent::SyncStarted { .. } => "sync-started",
            SyncEvent::SyncCompleted { .. } => "sync-completed",
            SyncEvent::SyncFailed { .. } => "sync-failed",
            SyncEvent::SyncPending { .. } => "sync-pending",
            SyncEvent::DraftSaved { .. } => "sync-draft-saved",
            SyncEvent::Online => "sync-online",
            SyncEvent::Offline => "sync-offline",
            SyncEvent::RecoveryFound { .. } => "sync-recovery-found",
        }
    }
}

/// A publish/subscribe registry distributing [`SyncEvent`]s.
///
/// Fire-and-forget: events are cloned to each live subscriber and senders
/// whose receiver is gone are pruned. No delivery guarantee beyond
/// best-effort in-process notification.
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Sender<SyncEvent>>>,
}

impl EventBus {
    /// Creates a new event bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits an event to all live subscribers.
    pub fn emit(&self, event: SyncEvent) {
        tracing::trace!(topic = event.topic(), "emitting sync event");
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}
