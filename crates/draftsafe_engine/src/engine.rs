//! The sync orchestrator.

use crate::config::SyncConfig;
use crate::error::SyncResult;
use crate::events::{EventBus, SyncEvent};
use crate::remote::{RemoteApplier, RemoteNote};
use crate::session::{CancelToken, SessionRegistry};
use draftsafe_store::{
    Draft, DraftStore, NoteId, NoteUpdate, OperationKind, OperationPatch, StoreBackend,
};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

/// How a save settled, from the caller's point of view.
///
/// Ordinary network failure never surfaces as an error: the edit is
/// durable locally either way, and the variant says what happened to it.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// The remote confirmed the edit; this is its canonical result.
    Completed(RemoteNote),
    /// The edit is queued locally for a later flush.
    Queued {
        /// True if transient retries were exhausted first (the edit will
        /// be retried), false if it was queued without a completed
        /// attempt (offline) or after a permanent rejection.
        retrying: bool,
    },
    /// A newer edit for the same note superseded this save before it
    /// could settle. The newer save owns the data from here on.
    Superseded,
}

/// Result of a queue flush run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    /// Number of updates applied remotely during this run.
    pub flushed: u64,
    /// Queue depth after the run.
    pub remaining: usize,
}

/// Result of a `wait_for_sync` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitReport {
    /// True if quiescence was reached before the timeout.
    pub success: bool,
    /// Sessions still in flight plus operations still queued. Data is
    /// never discarded on timeout; this only reports what is pending.
    pub pending_count: usize,
}

/// Aggregate engine state, for UI reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Nothing in flight, nothing queued.
    Idle,
    /// At least one sync session is in flight.
    Syncing,
    /// Operations are queued awaiting a flush.
    Pending,
    /// The engine believes the transport is down.
    Offline,
    /// The last session ended in failure and nothing has succeeded since.
    Error,
}

/// Counters about sync activity.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Saves confirmed by the remote.
    pub completed: u64,
    /// Saves that ended up queued locally.
    pub queued: u64,
    /// Backoff retries performed.
    pub retries: u64,
    /// Message of the most recent failure, cleared on success.
    pub last_error: Option<String>,
}

/// The sync orchestrator.
///
/// One instance per process, constructed over a shared [`DraftStore`] and
/// a [`RemoteApplier`]. Cheap to clone; clones share all state. Every
/// public operation takes `&self` and is safe to call concurrently.
///
/// # Example
///
/// ```rust,ignore
/// let store = Arc::new(DraftStore::open(FileBackend::open(&dir)?)?);
/// let engine = SyncEngine::new(store, HttpRemote::new(api), SyncConfig::default());
/// let recovered = engine.init().await?;
/// ```
pub struct SyncEngine<B: StoreBackend, R: RemoteApplier> {
    inner: Arc<EngineInner<B, R>>,
}

impl<B: StoreBackend, R: RemoteApplier> Clone for SyncEngine<B, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct EngineInner<B: StoreBackend, R: RemoteApplier> {
    store: Arc<DraftStore<B>>,
    remote: R,
    config: SyncConfig,
    bus: EventBus,
    sessions: SessionRegistry,
    online: AtomicBool,
    next_session_id: AtomicU64,
    flush_lock: AsyncMutex<()>,
    last_error: RwLock<Option<String>>,
    stats: RwLock<SyncStats>,
    shutdown: CancelToken,
}

impl<B: StoreBackend, R: RemoteApplier> SyncEngine<B, R> {
    /// Creates a new engine over a store and a remote seam.
    pub fn new(store: Arc<DraftStore<B>>, remote: R, config: SyncConfig) -> Self {
        let online = config.start_online;
        Self {
            inner: Arc::new(EngineInner {
                store,
                remote,
                config,
                bus: EventBus::new(),
                sessions: SessionRegistry::new(),
                online: AtomicBool::new(online),
                next_session_id: AtomicU64::new(1),
                flush_lock: AsyncMutex::new(()),
                last_error: RwLock::new(None),
                stats: RwLock::new(SyncStats::default()),
                shutdown: CancelToken::new(),
            }),
        }
    }

    /// Runs startup recovery and an initial queue flush.
    ///
    /// Every draft edited strictly after its last known remote version is
    /// returned and reported via a `sync-recovery-found` notification.
    /// Whether to reapply a recovered draft is the caller's decision;
    /// [`discard_draft`](Self::discard_draft) dismisses one.
    ///
    /// # Errors
    ///
    /// Returns an error only if the durable store fails.
    pub async fn init(&self) -> SyncResult<Vec<Draft>> {
        let recovered: Vec<Draft> = self
            .inner
            .store
            .all_drafts()
            .into_iter()
            .filter(|d| d.last_known_remote_version.is_none_or(|v| d.updated_at > v))
            .collect();

        if !recovered.is_empty() {
            info!(count = recovered.len(), "recovered unsynced drafts");
            self.inner.bus.emit(SyncEvent::RecoveryFound {
                drafts: recovered.clone(),
            });
        }

        if self.is_online() && self.inner.store.pending_count() > 0 {
            self.flush_pending().await?;
        }

        Ok(recovered)
    }

    /// Saves a note edit.
    ///
    /// The edit is persisted to the durable store before anything else,
    /// so once this method has started it cannot be lost to a crash. It
    /// then settles as:
    ///
    /// - [`SaveOutcome::Completed`] once the remote confirms,
    /// - [`SaveOutcome::Queued`] if offline or the remote keeps failing,
    /// - [`SaveOutcome::Superseded`] if a newer edit for the same note
    ///   arrives first.
    ///
    /// # Errors
    ///
    /// Returns an error only if the durable store fails — the one case
    /// where "your edit is safe locally" cannot be promised.
    pub async fn save_note(
        &self,
        note_id: NoteId,
        update: NoteUpdate,
        last_known_remote_version: Option<u64>,
    ) -> SyncResult<SaveOutcome> {
        let inner = &self.inner;

        let draft = inner
            .store
            .save_draft(&note_id, update, last_known_remote_version)?;
        inner.bus.emit(SyncEvent::DraftSaved {
            note_id: note_id.clone(),
        });

        if !self.is_online() {
            // A still-in-flight session for this note holds stale content
            // now; it must not settle against the store after this edit.
            inner.sessions.cancel_note(&note_id);
            self.queue_offline(&note_id, draft.update())?;
            inner.stats.write().queued += 1;
            inner.bus.emit(SyncEvent::SyncPending {
                count: inner.store.pending_count(),
            });
            debug!(note = %note_id, "offline, save queued");
            return Ok(SaveOutcome::Queued { retrying: false });
        }

        let session_id = inner.next_session_id.fetch_add(1, Ordering::SeqCst);
        let cancel = inner.sessions.begin(&note_id, session_id);
        let (tx, rx) = oneshot::channel();

        let engine = self.clone();
        let payload = draft.update();
        tokio::spawn(async move {
            let outcome = engine
                .run_session(&note_id, payload, &cancel)
                .await;
            engine.inner.sessions.finish(&note_id, session_id);
            let _ = tx.send(outcome);
        });

        match rx.await {
            Ok(outcome) => outcome,
            // The session task only disappears without settling when the
            // runtime is torn down mid-save.
            Err(_) => Ok(SaveOutcome::Superseded),
        }
    }

    /// One sync session: attempt with backoff, settle exactly once.
    async fn run_session(
        &self,
        note_id: &NoteId,
        payload: NoteUpdate,
        cancel: &CancelToken,
    ) -> SyncResult<SaveOutcome> {
        let inner = &self.inner;
        inner.bus.emit(SyncEvent::SyncStarted {
            note_id: note_id.clone(),
        });

        let retry = &inner.config.retry;

        for attempt in 0..retry.max_attempts {
            if attempt > 0 {
                let delay = retry.delay_for_attempt(attempt);
                inner.stats.write().retries += 1;
                debug!(note = %note_id, attempt, ?delay, "backing off before retry");
                tokio::select! {
                    () = tokio::time::sleep(delay) => {}
                    () = cancel.cancelled() => return Ok(SaveOutcome::Superseded),
                    () = inner.shutdown.cancelled() => return Ok(SaveOutcome::Superseded),
                }
            }

            let call = inner.remote.apply_update(note_id.clone(), payload.clone());
            let result = tokio::select! {
                result = call => result,
                () = cancel.cancelled() => {
                    debug!(note = %note_id, "session superseded mid-flight");
                    return Ok(SaveOutcome::Superseded);
                }
                () = inner.shutdown.cancelled() => return Ok(SaveOutcome::Superseded),
            };

            match result {
                Ok(remote) => {
                    self.clear_confirmed(note_id, &payload)?;
                    inner.last_error.write().take();
                    {
                        let mut stats = inner.stats.write();
                        stats.completed += 1;
                        stats.last_error = None;
                    }
                    inner.bus.emit(SyncEvent::SyncCompleted {
                        note_id: note_id.clone(),
                        remote: remote.clone(),
                    });
                    inner.bus.emit(SyncEvent::SyncPending {
                        count: inner.store.pending_count(),
                    });
                    debug!(note = %note_id, "sync completed");
                    return Ok(SaveOutcome::Completed(remote));
                }
                Err(err) => {
                    if err.is_connectivity() {
                        self.mark_offline();
                    }
                    // Once the transport is down, further attempts are
                    // pointless; the flush on reconnect owns the edit.
                    if err.is_retryable() && self.is_online() && attempt + 1 < retry.max_attempts {
                        warn!(note = %note_id, attempt, error = %err, "sync attempt failed, will retry");
                        continue;
                    }
                    let will_retry = err.is_retryable();
                    return self.settle_failed(note_id, payload, err.to_string(), will_retry);
                }
            }
        }

        // Only reachable with a zero-attempt retry budget.
        self.settle_failed(note_id, payload, "no attempts made".to_owned(), false)
    }

    /// Queues the latest payload and settles the session as queued.
    fn settle_failed(
        &self,
        note_id: &NoteId,
        payload: NoteUpdate,
        error: String,
        will_retry: bool,
    ) -> SyncResult<SaveOutcome> {
        let inner = &self.inner;

        // A newer edit may have landed since this session snapshotted its
        // payload; the draft always holds the most recent content.
        let latest = inner
            .store
            .get_draft(note_id)
            .map_or(payload, |d| d.update());
        inner
            .store
            .queue_operation(OperationKind::Update, note_id, latest, Some(error.clone()))?;

        *inner.last_error.write() = Some(error.clone());
        {
            let mut stats = inner.stats.write();
            stats.queued += 1;
            stats.last_error = Some(error.clone());
        }

        warn!(note = %note_id, error = %error, will_retry, "sync failed, edit queued locally");
        inner.bus.emit(SyncEvent::SyncFailed {
            note_id: note_id.clone(),
            error,
            will_retry,
        });
        inner.bus.emit(SyncEvent::SyncPending {
            count: inner.store.pending_count(),
        });

        Ok(SaveOutcome::Queued {
            retrying: will_retry,
        })
    }

    /// Clears a note's local state only if its draft still matches the
    /// content the remote just confirmed.
    ///
    /// A draft that changed while the call was in flight belongs to a
    /// newer edit and must survive the stale session's success.
    fn clear_confirmed(&self, note_id: &NoteId, confirmed: &NoteUpdate) -> SyncResult<()> {
        let inner = &self.inner;
        let unchanged = inner
            .store
            .get_draft(note_id)
            .is_none_or(|d| d.update() == *confirmed);
        if unchanged {
            inner.store.clear_draft(note_id)?;
            inner.store.clear_pending_for_note(note_id)?;
        } else {
            debug!(note = %note_id, "draft moved on mid-flight, leaving local state");
        }
        Ok(())
    }

    /// Dedups an offline save into at most one queued entry per note.
    fn queue_offline(&self, note_id: &NoteId, payload: NoteUpdate) -> SyncResult<()> {
        let inner = &self.inner;
        match inner.store.pending_for_note(note_id).last() {
            Some(existing) => {
                inner
                    .store
                    .update_operation(existing.id, OperationPatch::superseding_payload(payload))?;
            }
            None => {
                inner
                    .store
                    .queue_operation(OperationKind::Update, note_id, payload, None)?;
            }
        }
        Ok(())
    }

    /// Drains the pending queue, oldest first.
    ///
    /// Runs are serialized; each entry gets a single attempt (a flush
    /// happening at all implies connectivity has returned, so there is no
    /// backoff here). The first failure stops the run, and the run aborts
    /// early if the engine goes offline again. Entries whose note has a
    /// live session are left to that session.
    ///
    /// # Errors
    ///
    /// Returns an error only if the durable store fails.
    pub async fn flush_pending(&self) -> SyncResult<FlushReport> {
        let inner = &self.inner;
        let _guard = inner.flush_lock.lock().await;

        let ops = inner.store.pending_operations();
        let mut flushed = 0u64;

        if !ops.is_empty() {
            info!(count = ops.len(), "flushing pending queue");
        }

        let mut settled_notes: HashSet<NoteId> = HashSet::new();
        for op in ops {
            if !self.is_online() {
                debug!("went offline mid-flush, aborting run");
                break;
            }
            if inner.shutdown.is_cancelled() {
                break;
            }
            if settled_notes.contains(&op.note_id) {
                continue;
            }
            if inner.sessions.is_active(&op.note_id) {
                continue;
            }
            // The entry may have been cleared by a session since the
            // snapshot was taken.
            if !inner
                .store
                .pending_for_note(&op.note_id)
                .iter()
                .any(|p| p.id == op.id)
            {
                continue;
            }

            // The draft supersedes the queued payload when further edits
            // happened after the entry was queued.
            let payload = inner
                .store
                .get_draft(&op.note_id)
                .map_or_else(|| op.payload.clone(), |d| d.update());

            let call = inner.remote.apply_update(op.note_id.clone(), payload.clone());
            let result = tokio::select! {
                result = call => result,
                () = inner.shutdown.cancelled() => break,
            };

            match result {
                Ok(remote) => {
                    self.clear_confirmed(&op.note_id, &payload)?;
                    settled_notes.insert(op.note_id.clone());
                    flushed += 1;
                    inner.stats.write().completed += 1;
                    inner.bus.emit(SyncEvent::SyncCompleted {
                        note_id: op.note_id.clone(),
                        remote,
                    });
                }
                Err(err) => {
                    if err.is_connectivity() {
                        self.mark_offline();
                    }
                    inner.store.update_operation(
                        op.id,
                        OperationPatch::failure(op.retry_count + 1, err.to_string()),
                    )?;
                    *inner.last_error.write() = Some(err.to_string());
                    inner.stats.write().last_error = Some(err.to_string());
                    warn!(note = %op.note_id, error = %err, "flush attempt failed, stopping run");
                    inner.bus.emit(SyncEvent::SyncFailed {
                        note_id: op.note_id.clone(),
                        error: err.to_string(),
                        will_retry: err.is_retryable(),
                    });
                    break;
                }
            }
        }

        let remaining = inner.store.pending_count();
        inner
            .bus
            .emit(SyncEvent::SyncPending { count: remaining });
        Ok(FlushReport { flushed, remaining })
    }

    /// Blocks until the engine is quiescent, or the timeout lapses.
    ///
    /// Quiescent means no sync sessions in flight and, while online, an
    /// empty pending queue: undelivered entries the engine could still
    /// send count as pending work. Entries waiting offline for a
    /// reconnect do not block the wait (they would block it forever).
    ///
    /// Never discards data on timeout; the report only says whether
    /// quiescence was reached and how much is still pending. Intended for
    /// callers that must guarantee a delivery attempt before an
    /// irreversible action, like leaving a view.
    pub async fn wait_for_sync(&self, timeout: Duration) -> WaitReport {
        let poll = self.inner.config.wait_poll_interval;
        let idle = async {
            loop {
                let sessions = self.inner.sessions.active_count();
                let undelivered = self.is_online() && self.inner.store.pending_count() > 0;
                if sessions == 0 && !undelivered {
                    return;
                }
                tokio::time::sleep(poll).await;
            }
        };

        let success = tokio::time::timeout(timeout, idle).await.is_ok();
        WaitReport {
            success,
            pending_count: self.inner.store.pending_count() + self.inner.sessions.active_count(),
        }
    }

    /// Records a connectivity change.
    ///
    /// Transitioning to online triggers a queue flush; repeated calls
    /// with the current state are no-ops.
    ///
    /// # Errors
    ///
    /// Returns an error only if the flush hits a storage failure.
    pub async fn set_online(&self, online: bool) -> SyncResult<()> {
        let was = self.inner.online.swap(online, Ordering::SeqCst);
        if was == online {
            return Ok(());
        }

        if online {
            info!("transport back online");
            self.inner.bus.emit(SyncEvent::Online);
            if self.inner.store.pending_count() > 0 {
                self.flush_pending().await?;
            }
        } else {
            info!("transport offline");
            self.inner.bus.emit(SyncEvent::Offline);
        }
        Ok(())
    }

    /// Flips offline without flushing; used when a call fails with a
    /// connectivity-class error.
    fn mark_offline(&self) {
        if self.inner.online.swap(false, Ordering::SeqCst) {
            info!("connectivity failure, marking transport offline");
            self.inner.bus.emit(SyncEvent::Offline);
        }
    }

    /// Returns true if the engine currently believes it is online.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Dismisses a recovered (or unwanted) draft and its queued entries.
    ///
    /// Cancels any live session for the note first.
    ///
    /// # Errors
    ///
    /// Returns an error only if the durable store fails.
    pub fn discard_draft(&self, note_id: &NoteId) -> SyncResult<()> {
        self.inner.sessions.cancel_note(note_id);
        self.inner.store.clear_draft(note_id)?;
        self.inner.store.clear_pending_for_note(note_id)?;
        debug!(note = %note_id, "draft discarded");
        Ok(())
    }

    /// Cancels all sessions and clears the store. Used on logout.
    ///
    /// # Errors
    ///
    /// Returns an error only if the durable store fails.
    pub fn reset(&self) -> SyncResult<()> {
        self.inner.sessions.cancel_all();
        self.inner.store.clear_all()?;
        self.inner.last_error.write().take();
        *self.inner.stats.write() = SyncStats::default();
        Ok(())
    }

    /// Cancels every in-flight session and stops future flush work.
    ///
    /// Already-queued data stays in the durable store; a later process
    /// picks it up through [`init`](Self::init).
    pub fn shutdown(&self) {
        info!("sync engine shutting down");
        self.inner.shutdown.cancel();
        self.inner.sessions.cancel_all();
    }

    /// Subscribes to sync notifications.
    pub fn subscribe(&self) -> std::sync::mpsc::Receiver<SyncEvent> {
        self.inner.bus.subscribe()
    }

    /// Returns the aggregate engine state, for UI reporting only.
    #[must_use]
    pub fn state(&self) -> EngineState {
        if !self.is_online() {
            return EngineState::Offline;
        }
        if self.inner.sessions.active_count() > 0 {
            return EngineState::Syncing;
        }
        if self.inner.store.pending_count() > 0 {
            return EngineState::Pending;
        }
        if self.inner.last_error.read().is_some() {
            return EngineState::Error;
        }
        EngineState::Idle
    }

    /// Returns a snapshot of the activity counters.
    #[must_use]
    pub fn stats(&self) -> SyncStats {
        self.inner.stats.read().clone()
    }

    /// Returns the underlying durable store.
    #[must_use]
    pub fn store(&self) -> &DraftStore<B> {
        &self.inner.store
    }
}
