//! Change-notification stream emitted by the entry store.
//!
//! Every write to the entry store produces one [`ChangeRecord`] tagged with an
//! explicit [`ChangeKind`]. The relay only forwards [`ChangeKind::Create`]; the
//! tag is what keeps the consumer's own winner writes from feeding back into
//! the topic.
//!
//! # Delivery Semantics
//!
//! The stream is at-least-once. [`ChangeStream::next_batch`] returns records
//! after the last acknowledged [`StreamCheckpoint`], so a batch that is never
//! acknowledged is returned again on the next call.

use crate::entry::{Entry, EntryId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Kind of write that produced a change record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    /// A new entry was inserted.
    Create,
    /// An existing entry was replaced.
    Update,
    /// An existing entry had attributes modified (e.g. the winner write).
    Modify,
    /// An entry was removed.
    Delete,
}

impl ChangeKind {
    /// Stable string form used in storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Modify => "MODIFY",
            Self::Delete => "DELETE",
        }
    }

    /// Parse the storage form.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeStreamError::Malformed`] for an unknown kind.
    pub fn parse(s: &str) -> Result<Self, ChangeStreamError> {
        match s {
            "CREATE" | "INSERT" => Ok(Self::Create),
            "UPDATE" => Ok(Self::Update),
            "MODIFY" => Ok(Self::Modify),
            "DELETE" | "REMOVE" => Ok(Self::Delete),
            other => Err(ChangeStreamError::Malformed(format!(
                "unknown change kind: {other}"
            ))),
        }
    }

    /// Whether records of this kind are forwarded to the topic.
    #[must_use]
    pub const fn is_creation(self) -> bool {
        matches!(self, Self::Create)
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position in the change stream.
///
/// Sequences are strictly increasing within one stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct StreamCheckpoint(pub u64);

impl StreamCheckpoint {
    /// The sequence number this checkpoint points at.
    #[must_use]
    pub const fn sequence(self) -> u64 {
        self.0
    }
}

/// One change notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeRecord {
    /// Stream sequence of this record.
    pub sequence: u64,
    /// Kind of write.
    pub kind: ChangeKind,
    /// Entry the write touched.
    pub entry_id: EntryId,
    /// Entry snapshot after the write (absent for deletes).
    pub new_snapshot: Option<Entry>,
}

impl ChangeRecord {
    /// Change record for a newly created entry.
    #[must_use]
    pub fn created(sequence: u64, entry: Entry) -> Self {
        Self {
            sequence,
            kind: ChangeKind::Create,
            entry_id: entry.id.clone(),
            new_snapshot: Some(entry),
        }
    }
}

/// Ordered batch of change records plus the checkpoint that acknowledges it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeBatch {
    /// Records in stream order.
    pub records: Vec<ChangeRecord>,
    /// Checkpoint covering every record in the batch.
    pub checkpoint: StreamCheckpoint,
}

impl ChangeBatch {
    /// Build a batch; the checkpoint is the last record's sequence.
    ///
    /// Returns `None` for an empty record list.
    #[must_use]
    pub fn from_records(records: Vec<ChangeRecord>) -> Option<Self> {
        let last = records.last()?.sequence;
        Some(Self {
            records,
            checkpoint: StreamCheckpoint(last),
        })
    }

    /// Number of records in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the batch has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Errors that can occur while reading the change stream.
#[derive(Error, Debug, Clone)]
pub enum ChangeStreamError {
    /// The stream backend is temporarily unreachable.
    #[error("Change stream unavailable: {0}")]
    Unavailable(String),

    /// A record could not be interpreted.
    #[error("Malformed change record: {0}")]
    Malformed(String),

    /// Acknowledging a checkpoint failed.
    #[error("Failed to acknowledge checkpoint {checkpoint:?}: {reason}")]
    AcknowledgeFailed {
        /// Checkpoint that was being acknowledged
        checkpoint: StreamCheckpoint,
        /// The reason for failure
        reason: String,
    },
}

impl ChangeStreamError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::AcknowledgeFailed { .. })
    }
}

/// At-least-once feed of entry store changes.
///
/// Implementations must return records in sequence order and must keep
/// returning unacknowledged records until [`ChangeStream::acknowledge`] moves
/// the checkpoint past them.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` so workers can hold an
/// `Arc<dyn ChangeStream>`.
pub trait ChangeStream: Send + Sync {
    /// Fetch up to `max_records` records after the last acknowledged checkpoint.
    ///
    /// Returns `Ok(None)` when there is nothing new.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeStreamError`] if the backend cannot be read.
    fn next_batch(
        &self,
        max_records: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ChangeBatch>, ChangeStreamError>> + Send + '_>>;

    /// Advance the stream cursor past `checkpoint`.
    ///
    /// Acknowledging a checkpoint at or behind the current cursor is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ChangeStreamError::AcknowledgeFailed`] if the cursor cannot be saved.
    fn acknowledge(
        &self,
        checkpoint: StreamCheckpoint,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChangeStreamError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_kind_round_trips_storage_form() {
        for kind in [
            ChangeKind::Create,
            ChangeKind::Update,
            ChangeKind::Modify,
            ChangeKind::Delete,
        ] {
            assert_eq!(ChangeKind::parse(kind.as_str()).ok(), Some(kind));
        }
    }

    #[test]
    fn change_kind_accepts_insert_alias() {
        assert_eq!(ChangeKind::parse("INSERT").ok(), Some(ChangeKind::Create));
        assert_eq!(ChangeKind::parse("REMOVE").ok(), Some(ChangeKind::Delete));
    }

    #[test]
    fn unknown_change_kind_is_malformed() {
        assert!(matches!(
            ChangeKind::parse("TRUNCATE"),
            Err(ChangeStreamError::Malformed(_))
        ));
    }

    #[test]
    fn only_create_is_a_creation() {
        assert!(ChangeKind::Create.is_creation());
        assert!(!ChangeKind::Update.is_creation());
        assert!(!ChangeKind::Modify.is_creation());
        assert!(!ChangeKind::Delete.is_creation());
    }

    #[test]
    fn batch_checkpoint_is_last_sequence() {
        let records = vec![
            ChangeRecord {
                sequence: 4,
                kind: ChangeKind::Delete,
                entry_id: EntryId::new("a"),
                new_snapshot: None,
            },
            ChangeRecord {
                sequence: 9,
                kind: ChangeKind::Delete,
                entry_id: EntryId::new("b"),
                new_snapshot: None,
            },
        ];
        let batch = ChangeBatch::from_records(records);
        assert_eq!(batch.map(|b| b.checkpoint), Some(StreamCheckpoint(9)));
        assert!(ChangeBatch::from_records(Vec::new()).is_none());
    }
}
