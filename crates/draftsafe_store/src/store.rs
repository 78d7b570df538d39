//! The durable draft store.

use crate::backend::StoreBackend;
use crate::error::{StorageError, StorageResult};
use crate::types::{now_millis, Draft, NoteId, NoteUpdate, OperationKind, PendingOperation};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Collection name of the drafts table.
pub const DRAFTS_COLLECTION: &str = "drafts";
/// Collection name of the pending-operation queue.
pub const PENDING_COLLECTION: &str = "pending";

/// The crash-safe local store backing the sync orchestrator.
///
/// Two independent collections: drafts keyed by note id, and a FIFO queue
/// of pending operations with a secondary lookup by note id. Each mutation
/// persists its owning collection through the backend before returning;
/// the two collections never need a cross-collection transaction.
///
/// # Thread Safety
///
/// All operations take `&self` and are safe to call from concurrent sync
/// sessions. Per-key semantics are last-writer-wins, which matches the
/// orchestrator's dedup policy.
pub struct DraftStore<B: StoreBackend> {
    backend: B,
    drafts: RwLock<HashMap<NoteId, Draft>>,
    pending: RwLock<Vec<PendingOperation>>,
    next_op_id: AtomicU64,
}

impl<B: StoreBackend> DraftStore<B> {
    /// Opens the store, loading both collections from the backend.
    ///
    /// Operation ids continue from the highest persisted id, so they stay
    /// strictly increasing across restarts.
    ///
    /// # Errors
    ///
    /// Returns an error if a collection cannot be read or decoded.
    pub fn open(backend: B) -> StorageResult<Self> {
        let drafts: Vec<Draft> = match backend.read(DRAFTS_COLLECTION)? {
            Some(bytes) => decode(&bytes)?,
            None => Vec::new(),
        };
        let pending: Vec<PendingOperation> = match backend.read(PENDING_COLLECTION)? {
            Some(bytes) => decode(&bytes)?,
            None => Vec::new(),
        };

        let next_op_id = pending.iter().map(|op| op.id).max().map_or(1, |id| id + 1);

        debug!(
            drafts = drafts.len(),
            pending = pending.len(),
            "opened draft store"
        );

        Ok(Self {
            backend,
            drafts: RwLock::new(drafts.into_iter().map(|d| (d.note_id.clone(), d)).collect()),
            pending: RwLock::new(pending),
            next_op_id: AtomicU64::new(next_op_id),
        })
    }

    // --- drafts -----------------------------------------------------------

    /// Upserts the draft for a note and persists it.
    ///
    /// `updated_at` is set to the current wall clock, clamped so it never
    /// moves backwards for the same note. A `None` remote version keeps
    /// the previously recorded one, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the drafts collection cannot be persisted.
    pub fn save_draft(
        &self,
        id: &NoteId,
        update: NoteUpdate,
        last_known_remote_version: Option<u64>,
    ) -> StorageResult<Draft> {
        let mut drafts = self.drafts.write();

        let now = now_millis();
        let (updated_at, remote_version) = match drafts.get(id) {
            Some(prev) => (
                now.max(prev.updated_at),
                last_known_remote_version.or(prev.last_known_remote_version),
            ),
            None => (now, last_known_remote_version),
        };

        let draft = Draft {
            note_id: id.clone(),
            title: update.title,
            content: update.content,
            tags: update.tags,
            updated_at,
            last_known_remote_version: remote_version,
        };

        drafts.insert(id.clone(), draft.clone());
        self.persist_drafts(&drafts)?;

        debug!(note = %id, updated_at, "saved draft");
        Ok(draft)
    }

    /// Returns the draft for a note, if one exists.
    #[must_use]
    pub fn get_draft(&self, id: &NoteId) -> Option<Draft> {
        self.drafts.read().get(id).cloned()
    }

    /// Deletes the draft for a note. No-op if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the drafts collection cannot be persisted.
    pub fn clear_draft(&self, id: &NoteId) -> StorageResult<()> {
        let mut drafts = self.drafts.write();
        if drafts.remove(id).is_some() {
            self.persist_drafts(&drafts)?;
            debug!(note = %id, "cleared draft");
        }
        Ok(())
    }

    /// Returns all drafts, ordered by note id.
    ///
    /// Used at startup for crash recovery.
    #[must_use]
    pub fn all_drafts(&self) -> Vec<Draft> {
        let mut drafts: Vec<Draft> = self.drafts.read().values().cloned().collect();
        drafts.sort_by(|a, b| a.note_id.cmp(&b.note_id));
        drafts
    }

    /// Returns true if the note has a draft edited strictly after the
    /// given remote modification timestamp.
    #[must_use]
    pub fn has_draft_newer_than(&self, id: &NoteId, remote_timestamp: u64) -> bool {
        self.drafts
            .read()
            .get(id)
            .is_some_and(|d| d.is_newer_than(remote_timestamp))
    }

    /// Garbage-collects drafts older than `max_age_ms`.
    ///
    /// Returns the ids of the removed drafts, ordered by note id.
    ///
    /// # Errors
    ///
    /// Returns an error if the drafts collection cannot be persisted.
    pub fn clear_old_drafts(&self, max_age_ms: u64) -> StorageResult<Vec<NoteId>> {
        let cutoff = now_millis().saturating_sub(max_age_ms);
        let mut drafts = self.drafts.write();

        let mut removed: Vec<NoteId> = drafts
            .values()
            .filter(|d| d.updated_at < cutoff)
            .map(|d| d.note_id.clone())
            .collect();
        removed.sort();

        if !removed.is_empty() {
            for id in &removed {
                drafts.remove(id);
            }
            self.persist_drafts(&drafts)?;
            info!(count = removed.len(), "garbage-collected old drafts");
        }

        Ok(removed)
    }

    // --- pending queue ----------------------------------------------------

    /// Appends a pending operation and persists the queue.
    ///
    /// Returns the assigned operation id.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be persisted.
    pub fn queue_operation(
        &self,
        kind: OperationKind,
        note_id: &NoteId,
        payload: NoteUpdate,
        last_error: Option<String>,
    ) -> StorageResult<u64> {
        let id = self.next_op_id.fetch_add(1, Ordering::SeqCst);
        let op = PendingOperation {
            id,
            kind,
            note_id: note_id.clone(),
            payload,
            enqueued_at: now_millis(),
            retry_count: 0,
            last_error,
        };

        let mut pending = self.pending.write();
        pending.push(op);
        self.persist_pending(&pending)?;

        debug!(note = %note_id, op = id, "queued pending operation");
        Ok(id)
    }

    /// Returns all pending operations, oldest first.
    #[must_use]
    pub fn pending_operations(&self) -> Vec<PendingOperation> {
        let mut ops = self.pending.read().clone();
        ops.sort_by_key(|op| (op.enqueued_at, op.id));
        ops
    }

    /// Returns the pending operations for one note, oldest first.
    #[must_use]
    pub fn pending_for_note(&self, id: &NoteId) -> Vec<PendingOperation> {
        let mut ops: Vec<PendingOperation> = self
            .pending
            .read()
            .iter()
            .filter(|op| &op.note_id == id)
            .cloned()
            .collect();
        ops.sort_by_key(|op| (op.enqueued_at, op.id));
        ops
    }

    /// Patches a pending operation in place and persists the queue.
    ///
    /// Returns the updated operation, or `None` if no operation has the
    /// given id.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be persisted.
    pub fn update_operation(
        &self,
        id: u64,
        patch: OperationPatch,
    ) -> StorageResult<Option<PendingOperation>> {
        let mut pending = self.pending.write();

        let Some(op) = pending.iter_mut().find(|op| op.id == id) else {
            return Ok(None);
        };

        if let Some(payload) = patch.payload {
            op.payload = payload;
        }
        if let Some(retry_count) = patch.retry_count {
            op.retry_count = retry_count;
        }
        if let Some(last_error) = patch.last_error {
            op.last_error = Some(last_error);
        }
        let updated = op.clone();

        self.persist_pending(&pending)?;
        Ok(Some(updated))
    }

    /// Removes a single pending operation. No-op if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be persisted.
    pub fn remove_operation(&self, id: u64) -> StorageResult<()> {
        let mut pending = self.pending.write();
        let before = pending.len();
        pending.retain(|op| op.id != id);
        if pending.len() != before {
            self.persist_pending(&pending)?;
        }
        Ok(())
    }

    /// Removes every pending operation for one note. No-op if none exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue cannot be persisted.
    pub fn clear_pending_for_note(&self, id: &NoteId) -> StorageResult<()> {
        let mut pending = self.pending.write();
        let before = pending.len();
        pending.retain(|op| &op.note_id != id);
        if pending.len() != before {
            self.persist_pending(&pending)?;
            debug!(note = %id, removed = before - pending.len(), "cleared pending operations");
        }
        Ok(())
    }

    /// Returns the number of pending operations.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.read().len()
    }

    // --- whole-store ------------------------------------------------------

    /// Clears both collections. Used on logout/reset.
    ///
    /// # Errors
    ///
    /// Returns an error if either collection cannot be persisted.
    pub fn clear_all(&self) -> StorageResult<()> {
        {
            let mut drafts = self.drafts.write();
            drafts.clear();
            self.persist_drafts(&drafts)?;
        }
        {
            let mut pending = self.pending.write();
            pending.clear();
            self.persist_pending(&pending)?;
        }
        info!("cleared draft store");
        Ok(())
    }

    fn persist_drafts(&self, drafts: &HashMap<NoteId, Draft>) -> StorageResult<()> {
        let mut rows: Vec<&Draft> = drafts.values().collect();
        rows.sort_by(|a, b| a.note_id.cmp(&b.note_id));
        self.backend.write(DRAFTS_COLLECTION, &encode(&rows)?)
    }

    fn persist_pending(&self, pending: &[PendingOperation]) -> StorageResult<()> {
        self.backend.write(PENDING_COLLECTION, &encode(&pending)?)
    }
}

/// A partial update to a pending operation.
///
/// `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct OperationPatch {
    /// Replacement payload (a newer local edit superseding the queued one).
    pub payload: Option<NoteUpdate>,
    /// New failed-attempt count.
    pub retry_count: Option<u32>,
    /// Message of the latest delivery failure.
    pub last_error: Option<String>,
}

impl OperationPatch {
    /// Patch recording one more failed delivery attempt.
    #[must_use]
    pub fn failure(retry_count: u32, error: impl Into<String>) -> Self {
        Self {
            payload: None,
            retry_count: Some(retry_count),
            last_error: Some(error.into()),
        }
    }

    /// Patch replacing the queued payload with a newer edit.
    #[must_use]
    pub fn superseding_payload(payload: NoteUpdate) -> Self {
        Self {
            payload: Some(payload),
            retry_count: None,
            last_error: None,
        }
    }
}

fn encode<T: Serialize>(value: &T) -> StorageResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StorageError::Codec(e.to_string()))?;
    Ok(buf)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StorageResult<T> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileBackend;
    use crate::memory::InMemoryBackend;
    use tempfile::tempdir;

    fn update(text: &str) -> NoteUpdate {
        NoteUpdate::new(format!("title {text}"), text, vec!["tag".into()])
    }

    #[test]
    fn save_and_get_draft() {
        let store = DraftStore::open(InMemoryBackend::new()).unwrap();
        let id = NoteId::from("n1");

        assert!(store.get_draft(&id).is_none());

        let draft = store.save_draft(&id, update("hello"), Some(10)).unwrap();
        assert_eq!(draft.content, "hello");
        assert_eq!(draft.last_known_remote_version, Some(10));

        let loaded = store.get_draft(&id).unwrap();
        assert_eq!(loaded, draft);
    }

    #[test]
    fn save_draft_overwrites() {
        let store = DraftStore::open(InMemoryBackend::new()).unwrap();
        let id = NoteId::from("n1");

        store.save_draft(&id, update("first"), None).unwrap();
        store.save_draft(&id, update("second"), None).unwrap();

        assert_eq!(store.get_draft(&id).unwrap().content, "second");
        assert_eq!(store.all_drafts().len(), 1);
    }

    #[test]
    fn updated_at_is_monotonic() {
        let store = DraftStore::open(InMemoryBackend::new()).unwrap();
        let id = NoteId::from("n1");

        let first = store.save_draft(&id, update("a"), None).unwrap();
        let second = store.save_draft(&id, update("b"), None).unwrap();
        assert!(second.updated_at >= first.updated_at);
    }

    #[test]
    fn remote_version_kept_when_not_supplied() {
        let store = DraftStore::open(InMemoryBackend::new()).unwrap();
        let id = NoteId::from("n1");

        store.save_draft(&id, update("a"), Some(42)).unwrap();
        let draft = store.save_draft(&id, update("b"), None).unwrap();
        assert_eq!(draft.last_known_remote_version, Some(42));
    }

    #[test]
    fn clear_draft_is_idempotent() {
        let store = DraftStore::open(InMemoryBackend::new()).unwrap();
        let id = NoteId::from("n1");

        store.save_draft(&id, update("a"), None).unwrap();
        store.clear_draft(&id).unwrap();
        assert!(store.get_draft(&id).is_none());

        store.clear_draft(&id).unwrap();
    }

    #[test]
    fn newer_than_comparison() {
        let store = DraftStore::open(InMemoryBackend::new()).unwrap();
        let id = NoteId::from("n1");

        let draft = store.save_draft(&id, update("a"), None).unwrap();
        assert!(store.has_draft_newer_than(&id, draft.updated_at - 1));
        assert!(!store.has_draft_newer_than(&id, draft.updated_at));
        assert!(!store.has_draft_newer_than(&NoteId::from("other"), 0));
    }

    #[test]
    fn queue_order_and_lookup() {
        let store = DraftStore::open(InMemoryBackend::new()).unwrap();
        let a = NoteId::from("a");
        let b = NoteId::from("b");

        let id1 = store
            .queue_operation(OperationKind::Update, &a, update("1"), None)
            .unwrap();
        let id2 = store
            .queue_operation(OperationKind::Update, &b, update("2"), None)
            .unwrap();
        let id3 = store
            .queue_operation(OperationKind::Update, &a, update("3"), None)
            .unwrap();

        assert!(id1 < id2 && id2 < id3);
        assert_eq!(store.pending_count(), 3);

        let all: Vec<u64> = store.pending_operations().iter().map(|op| op.id).collect();
        assert_eq!(all, vec![id1, id2, id3]);

        let for_a: Vec<u64> = store.pending_for_note(&a).iter().map(|op| op.id).collect();
        assert_eq!(for_a, vec![id1, id3]);
    }

    #[test]
    fn update_operation_patches_fields() {
        let store = DraftStore::open(InMemoryBackend::new()).unwrap();
        let id = NoteId::from("n1");

        let op_id = store
            .queue_operation(OperationKind::Update, &id, update("old"), None)
            .unwrap();

        let patched = store
            .update_operation(op_id, OperationPatch::failure(1, "HTTP 503"))
            .unwrap()
            .unwrap();
        assert_eq!(patched.retry_count, 1);
        assert_eq!(patched.last_error.as_deref(), Some("HTTP 503"));
        assert_eq!(patched.payload.content, "old");

        let patched = store
            .update_operation(op_id, OperationPatch::superseding_payload(update("new")))
            .unwrap()
            .unwrap();
        assert_eq!(patched.payload.content, "new");
        assert_eq!(patched.retry_count, 1);

        assert!(store.update_operation(9999, OperationPatch::default()).unwrap().is_none());
    }

    #[test]
    fn remove_and_clear_pending() {
        let store = DraftStore::open(InMemoryBackend::new()).unwrap();
        let a = NoteId::from("a");
        let b = NoteId::from("b");

        let id1 = store
            .queue_operation(OperationKind::Update, &a, update("1"), None)
            .unwrap();
        store
            .queue_operation(OperationKind::Update, &a, update("2"), None)
            .unwrap();
        store
            .queue_operation(OperationKind::Update, &b, update("3"), None)
            .unwrap();

        store.remove_operation(id1).unwrap();
        assert_eq!(store.pending_count(), 2);

        store.clear_pending_for_note(&a).unwrap();
        assert_eq!(store.pending_count(), 1);
        assert!(store.pending_for_note(&a).is_empty());

        // no-op when nothing matches
        store.clear_pending_for_note(&a).unwrap();
        store.remove_operation(id1).unwrap();
    }

    #[test]
    fn clear_all_empties_both_collections() {
        let store = DraftStore::open(InMemoryBackend::new()).unwrap();
        let id = NoteId::from("n1");

        store.save_draft(&id, update("a"), None).unwrap();
        store
            .queue_operation(OperationKind::Update, &id, update("a"), None)
            .unwrap();

        store.clear_all().unwrap();
        assert!(store.all_drafts().is_empty());
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn clear_old_drafts_by_age() {
        let store = DraftStore::open(InMemoryBackend::new()).unwrap();
        let old = NoteId::from("old");

        store.save_draft(&old, update("stale"), None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(30));

        let fresh = NoteId::from("fresh");
        store.save_draft(&fresh, update("live"), None).unwrap();

        let removed = store.clear_old_drafts(10).unwrap();
        assert_eq!(removed, vec![old.clone()]);
        assert!(store.get_draft(&old).is_none());
        assert!(store.get_draft(&fresh).is_some());

        let removed = store.clear_old_drafts(60_000).unwrap();
        assert!(removed.is_empty());
    }

    #[test]
    fn storage_failure_propagates() {
        let backend = InMemoryBackend::new();
        let store = DraftStore::open(backend.clone()).unwrap();
        let id = NoteId::from("n1");

        backend.set_fail_writes(true);
        let result = store.save_draft(&id, update("a"), None);
        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempdir().unwrap();
        let id = NoteId::from("n1");

        let saved = {
            let store = DraftStore::open(FileBackend::open(dir.path()).unwrap()).unwrap();
            let saved = store.save_draft(&id, update("persisted"), Some(7)).unwrap();
            store
                .queue_operation(OperationKind::Update, &id, update("queued"), None)
                .unwrap();
            saved
        };

        let store = DraftStore::open(FileBackend::open(dir.path()).unwrap()).unwrap();
        assert_eq!(store.get_draft(&id).unwrap(), saved);
        assert_eq!(store.pending_count(), 1);
        assert_eq!(store.pending_for_note(&id)[0].payload.content, "queued");
    }

    #[test]
    fn op_ids_strictly_increase_across_reopen() {
        let dir = tempdir().unwrap();
        let id = NoteId::from("n1");

        let first = {
            let store = DraftStore::open(FileBackend::open(dir.path()).unwrap()).unwrap();
            store
                .queue_operation(OperationKind::Update, &id, update("1"), None)
                .unwrap()
        };

        let store = DraftStore::open(FileBackend::open(dir.path()).unwrap()).unwrap();
        let second = store
            .queue_operation(OperationKind::Update, &id, update("2"), None)
            .unwrap();
        assert!(second > first);
    }
}
