//! The remote "apply update" seam.
//!
//! The engine never speaks a wire protocol itself. It consumes a single
//! asynchronous operation through the [`RemoteApplier`] trait, which a
//! host application implements over its HTTP client of choice. Errors
//! carry enough information to classify them as retryable (connectivity,
//! 5xx, 429) versus permanent (any other rejection).

use draftsafe_store::{now_millis, NoteId, NoteUpdate};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// The authoritative note returned by a successful remote apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteNote {
    /// The note id.
    pub id: NoteId,
    /// Canonical title.
    pub title: String,
    /// Canonical body.
    pub content: String,
    /// Canonical tags.
    pub tags: Vec<String>,
    /// The remote's modification timestamp (ms).
    pub modified_at: u64,
}

/// A failure reported by the remote seam.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The remote could not be reached at all.
    #[error("connectivity failure: {0}")]
    Connectivity(String),

    /// The remote failed internally (HTTP 5xx).
    #[error("server error (status {status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// The remote is rate limiting us (HTTP 429).
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The remote rejected the update for any other reason.
    #[error("update rejected (status {status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },
}

impl RemoteError {
    /// Creates a connectivity-class error.
    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::Connectivity(message.into())
    }

    /// Classifies an HTTP status into the right error variant.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited(message),
            500..=599 => Self::Server { status, message },
            _ => Self::Rejected { status, message },
        }
    }

    /// Returns true if this failure class is worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::Connectivity(_) | RemoteError::Server { .. } | RemoteError::RateLimited(_)
        )
    }

    /// Returns true if this failure means the transport itself is down.
    #[must_use]
    pub fn is_connectivity(&self) -> bool {
        matches!(self, RemoteError::Connectivity(_))
    }
}

/// Future returned by [`RemoteApplier::apply_update`].
pub type ApplyFuture = Pin<Box<dyn Future<Output = Result<RemoteNote, RemoteError>> + Send>>;

/// The single remote operation the engine depends on.
///
/// Cancellation model: the engine races the returned future against the
/// session's cancel token and drops it when a newer edit supersedes the
/// session. Implementations must therefore be drop-safe mid-flight and
/// must not leave partial local state behind.
pub trait RemoteApplier: Send + Sync + 'static {
    /// Applies one note update remotely.
    ///
    /// Resolves with the authoritative updated note, or fails with an
    /// error classified per [`RemoteError`].
    fn apply_update(&self, note_id: NoteId, payload: NoteUpdate) -> ApplyFuture;
}

/// A scripted remote for testing.
///
/// Calls consume scripted results front-to-back; once the script runs
/// out, every call succeeds and echoes its payload back. An artificial
/// per-call delay makes in-flight cancellation observable. Clones share
/// state so tests can keep a handle after giving one to the engine.
#[derive(Debug, Clone, Default)]
pub struct MockRemote {
    inner: Arc<MockRemoteInner>,
}

#[derive(Debug, Default)]
struct MockRemoteInner {
    script: Mutex<VecDeque<Result<RemoteNote, RemoteError>>>,
    sent: Mutex<Vec<(NoteId, NoteUpdate)>>,
    calls: AtomicU64,
    delay: Mutex<Duration>,
    fail_all_connectivity: AtomicBool,
}

impl MockRemote {
    /// Creates a mock remote that succeeds on every call.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the result of the next unconsumed call.
    pub fn push_result(&self, result: Result<RemoteNote, RemoteError>) {
        self.inner.script.lock().push_back(result);
    }

    /// Scripts a failure for the next unconsumed call.
    pub fn push_failure(&self, error: RemoteError) {
        self.push_result(Err(error));
    }

    /// Sets an artificial delay applied before each call completes.
    pub fn set_delay(&self, delay: Duration) {
        *self.inner.delay.lock() = delay;
    }

    /// Makes every call fail with a connectivity error, regardless of
    /// the script.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner
            .fail_all_connectivity
            .store(unreachable, Ordering::SeqCst);
    }

    /// Returns the number of calls that ran to completion.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.inner.calls.load(Ordering::SeqCst)
    }

    /// Returns the payloads that were actually transmitted.
    #[must_use]
    pub fn sent(&self) -> Vec<(NoteId, NoteUpdate)> {
        self.inner.sent.lock().clone()
    }
}

impl RemoteApplier for MockRemote {
    fn apply_update(&self, note_id: NoteId, payload: NoteUpdate) -> ApplyFuture {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let delay = *inner.delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            // A dropped future never reaches this point, so cancelled
            // attempts are not counted as transmissions.
            inner.calls.fetch_add(1, Ordering::SeqCst);
            inner.sent.lock().push((note_id.clone(), payload.clone()));

            if inner.fail_all_connectivity.load(Ordering::SeqCst) {
                return Err(RemoteError::connectivity("unreachable"));
            }

            match inner.script.lock().pop_front() {
                Some(result) => result,
                None => Ok(RemoteNote {
                    id: note_id,
                    title: payload.title,
                    content: payload.content,
                    tags: payload.tags,
                    modified_at: now_millis(),
                }),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            RemoteError::from_status(429, "slow down"),
            RemoteError::RateLimited(_)
        ));
        assert!(matches!(
            RemoteError::from_status(503, "oops"),
            RemoteError::Server { status: 503, .. }
        ));
        assert!(matches!(
            RemoteError::from_status(403, "forbidden"),
            RemoteError::Rejected { status: 403, .. }
        ));
    }

    #[test]
    fn retryable_classes() {
        assert!(RemoteError::connectivity("down").is_retryable());
        assert!(RemoteError::from_status(500, "x").is_retryable());
        assert!(RemoteError::from_status(429, "x").is_retryable());
        assert!(!RemoteError::from_status(400, "x").is_retryable());

        assert!(RemoteError::connectivity("down").is_connectivity());
        assert!(!RemoteError::from_status(500, "x").is_connectivity());
    }

    #[tokio::test]
    async fn mock_default_echoes_payload() {
        let remote = MockRemote::new();
        let payload = NoteUpdate::new("t", "c", vec!["a".into()]);

        let note = remote
            .apply_update(NoteId::from("n1"), payload.clone())
            .await
            .unwrap();
        assert_eq!(note.id, NoteId::from("n1"));
        assert_eq!(note.content, "c");
        assert_eq!(remote.calls(), 1);
        assert_eq!(remote.sent(), vec![(NoteId::from("n1"), payload)]);
    }

    #[tokio::test]
    async fn mock_script_consumed_in_order() {
        let remote = MockRemote::new();
        remote.push_failure(RemoteError::from_status(500, "boom"));

        let payload = NoteUpdate::new("t", "c", vec![]);
        let err = remote
            .apply_update(NoteId::from("n1"), payload.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Server { status: 500, .. }));

        // script exhausted, falls back to success
        assert!(remote.apply_update(NoteId::from("n1"), payload).await.is_ok());
    }

    #[tokio::test]
    async fn dropped_call_is_not_transmitted() {
        let remote = MockRemote::new();
        remote.set_delay(Duration::from_secs(60));

        let fut = remote.apply_update(NoteId::from("n1"), NoteUpdate::new("t", "c", vec![]));
        drop(fut);

        assert_eq!(remote.calls(), 0);
        assert!(remote.sent().is_empty());
    }
}
