//! Per-note sync sessions and cooperative cancellation.

use draftsafe_store::NoteId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

/// A cooperative cancellation token.
///
/// Cloned freely; all clones observe the same cancellation. Cancellation
/// is sticky and observed promptly by anyone awaiting [`cancelled`].
///
/// [`cancelled`]: CancelToken::cancelled
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Creates a fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token, waking every waiter.
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns true if the token has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            // Register before re-checking so a concurrent cancel between
            // the check and the await cannot be missed.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// One live session per note id.
#[derive(Debug)]
struct SessionHandle {
    session_id: u64,
    cancel: CancelToken,
}

/// Registry of the in-flight sync sessions.
///
/// Starting a session for a note cancels and replaces whatever session
/// was live for that note: the newer edit owns the slot from then on.
/// Sessions deregister themselves when they settle, guarded by their
/// session id so a settled predecessor can never evict its successor.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<NoteId, SessionHandle>>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins a session for a note, superseding any live one.
    ///
    /// Returns the new session's cancel token.
    pub fn begin(&self, note_id: &NoteId, session_id: u64) -> CancelToken {
        let cancel = CancelToken::new();
        let handle = SessionHandle {
            session_id,
            cancel: cancel.clone(),
        };

        if let Some(previous) = self.sessions.lock().insert(note_id.clone(), handle) {
            debug!(note = %note_id, superseded = previous.session_id, "superseding in-flight session");
            previous.cancel.cancel();
        }

        cancel
    }

    /// Removes a session if it is still the live one for its note.
    pub fn finish(&self, note_id: &NoteId, session_id: u64) {
        let mut sessions = self.sessions.lock();
        if sessions
            .get(note_id)
            .is_some_and(|h| h.session_id == session_id)
        {
            sessions.remove(note_id);
        }
    }

    /// Cancels the live session for a note, if any.
    pub fn cancel_note(&self, note_id: &NoteId) {
        if let Some(handle) = self.sessions.lock().get(note_id) {
            handle.cancel.cancel();
        }
    }

    /// Cancels every live session.
    pub fn cancel_all(&self) {
        for handle in self.sessions.lock().values() {
            handle.cancel.cancel();
        }
    }

    /// Returns true if a session is live for the note.
    #[must_use]
    pub fn is_active(&self, note_id: &NoteId) -> bool {
        self.sessions.lock().contains_key(note_id)
    }

    /// Returns the number of live sessions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn cancelled_future_resolves() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn cancel_before_wait_resolves_immediately() {
        let token = CancelToken::new();
        token.cancel();
        token.cancelled().await;
    }

    #[test]
    fn begin_supersedes_previous_session() {
        let registry = SessionRegistry::new();
        let note = NoteId::from("n1");

        let first = registry.begin(&note, 1);
        let _second = registry.begin(&note, 2);

        assert!(first.is_cancelled());
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn finish_only_removes_own_session() {
        let registry = SessionRegistry::new();
        let note = NoteId::from("n1");

        registry.begin(&note, 1);
        registry.begin(&note, 2);

        // the superseded session settling must not evict its successor
        registry.finish(&note, 1);
        assert!(registry.is_active(&note));

        registry.finish(&note, 2);
        assert!(!registry.is_active(&note));
    }

    #[test]
    fn cancel_note_and_cancel_all() {
        let registry = SessionRegistry::new();
        let a = NoteId::from("a");
        let b = NoteId::from("b");

        let token_a = registry.begin(&a, 1);
        let token_b = registry.begin(&b, 2);

        registry.cancel_note(&a);
        assert!(token_a.is_cancelled());
        assert!(!token_b.is_cancelled());

        registry.cancel_all();
        assert!(token_b.is_cancelled());
    }
}
