//! Core data types persisted by the store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier of a note.
///
/// Note ids are opaque strings assigned by the remote store. They are used
/// as the key of the drafts collection and as the secondary lookup key of
/// the pending queue.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(String);

impl NoteId {
    /// Creates a note id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NoteId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for NoteId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The content of one local edit: the fields a save carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteUpdate {
    /// Note title.
    pub title: String,
    /// Note body.
    pub content: String,
    /// Ordered list of tag references.
    pub tags: Vec<String>,
}

impl NoteUpdate {
    /// Creates a note update.
    pub fn new(title: impl Into<String>, content: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            tags,
        }
    }
}

/// The latest locally known content for one note, persisted before any
/// network attempt.
///
/// A draft is created or overwritten on every local edit and deleted only
/// once the edit has been confirmed remotely or explicitly discarded.
/// It is never deleted on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    /// The note this draft belongs to.
    pub note_id: NoteId,
    /// Note title.
    pub title: String,
    /// Note body.
    pub content: String,
    /// Ordered list of tag references.
    pub tags: Vec<String>,
    /// Wall-clock timestamp (ms) of the last local edit.
    ///
    /// Monotonically non-decreasing per note id; the store clamps it on
    /// upsert so a clock step backwards cannot reorder edits.
    pub updated_at: u64,
    /// The remote's last-seen modification timestamp (ms), if known.
    ///
    /// Used only for crash-recovery comparison, never to reject an edit.
    pub last_known_remote_version: Option<u64>,
}

impl Draft {
    /// Returns the draft's content as a [`NoteUpdate`] payload.
    #[must_use]
    pub fn update(&self) -> NoteUpdate {
        NoteUpdate {
            title: self.title.clone(),
            content: self.content.clone(),
            tags: self.tags.clone(),
        }
    }

    /// Returns true if this draft was edited strictly after the given
    /// remote modification timestamp.
    #[must_use]
    pub fn is_newer_than(&self, remote_timestamp: u64) -> bool {
        self.updated_at > remote_timestamp
    }
}

/// Kind of a pending operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    /// Apply a note update remotely.
    Update,
}

/// A durably queued network intent, produced when a sync attempt could not
/// complete (offline, or retries exhausted).
///
/// Entries are processed oldest-first during a flush, and the note's
/// current [`Draft`] content supersedes the entry's own payload when
/// further edits happened in between.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Store-assigned id, strictly increasing across restarts.
    pub id: u64,
    /// What the operation does.
    pub kind: OperationKind,
    /// The note the operation targets.
    pub note_id: NoteId,
    /// The payload captured when the operation was queued.
    pub payload: NoteUpdate,
    /// Wall-clock timestamp (ms) when the operation was queued.
    pub enqueued_at: u64,
    /// Number of failed delivery attempts so far.
    pub retry_count: u32,
    /// Message of the last delivery failure, if any.
    pub last_error: Option<String>,
}

/// Returns the current wall-clock time as milliseconds since the epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_id_roundtrip() {
        let id = NoteId::from("abc-123");
        assert_eq!(id.as_str(), "abc-123");
        assert_eq!(id.to_string(), "abc-123");
        assert_eq!(NoteId::new(String::from("abc-123")), id);
    }

    #[test]
    fn draft_payload_snapshot() {
        let draft = Draft {
            note_id: NoteId::from("n1"),
            title: "t".into(),
            content: "c".into(),
            tags: vec!["work".into(), "todo".into()],
            updated_at: 100,
            last_known_remote_version: Some(50),
        };

        let update = draft.update();
        assert_eq!(update.title, "t");
        assert_eq!(update.tags, vec!["work", "todo"]);

        assert!(draft.is_newer_than(50));
        assert!(!draft.is_newer_than(100));
    }

    #[test]
    fn now_millis_advances() {
        let a = now_millis();
        let b = now_millis();
        assert!(b >= a);
    }
}
