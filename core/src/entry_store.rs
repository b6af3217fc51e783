//! Entry store trait: the durable table of raffle entries.
//!
//! The store is shared by the submission endpoint (creates), the relay (reads
//! its change stream) and the consumer (reads and conditional winner updates).
//!
//! # Idempotent Winner Updates
//!
//! [`EntryStore::update_winner`] is conditional: it only writes while
//! `winner` is unset and otherwise reports the already persisted outcome.
//! Duplicate deliveries of the same creation message therefore can never
//! overwrite a decided entry, no matter how they interleave.
//!
//! # Implementations
//!
//! - `PostgresEntryStore` (in `raffle-postgres`): production implementation
//! - `InMemoryEntryStore` (in `raffle-testing`): fast, deterministic testing

use crate::entry::{Entry, EntryId};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during entry store operations.
#[derive(Error, Debug, Clone)]
pub enum EntryStoreError {
    /// No entry with this id exists.
    #[error("Entry not found: {0}")]
    NotFound(EntryId),

    /// An entry with this id already exists.
    #[error("Entry already exists: {0}")]
    AlreadyExists(EntryId),

    /// The store is temporarily unavailable or throttling.
    #[error("Entry store unavailable: {0}")]
    Unavailable(String),

    /// Non-transient database error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A stored record could not be (de)serialized.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl EntryStoreError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Result of a conditional winner update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WinnerUpdate {
    /// The outcome was written; carries the entry after the write.
    Applied(Entry),
    /// A decision was already persisted; carries that outcome. Nothing written.
    AlreadySet(bool),
}

impl WinnerUpdate {
    /// The outcome persisted in the store after this call.
    #[must_use]
    pub fn persisted_outcome(&self) -> Option<bool> {
        match self {
            Self::Applied(entry) => entry.winner,
            Self::AlreadySet(winner) => Some(*winner),
        }
    }
}

/// Trait for entry store implementations.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be shared as `Arc<dyn EntryStore>` between the HTTP handlers and
/// the pipeline workers.
pub trait EntryStore: Send + Sync {
    /// Insert a new entry and emit a `CREATE` change record for it.
    ///
    /// # Errors
    ///
    /// Returns [`EntryStoreError::AlreadyExists`] if the id is taken.
    fn create_entry(
        &self,
        entry: Entry,
    ) -> Pin<Box<dyn Future<Output = Result<Entry, EntryStoreError>> + Send + '_>>;

    /// Point read by id.
    ///
    /// # Errors
    ///
    /// Returns [`EntryStoreError`] if the store cannot be read.
    fn get_entry(
        &self,
        id: &EntryId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Entry>, EntryStoreError>> + Send + '_>>;

    /// Set `winner` only if it is still unset.
    ///
    /// A successful write emits a `MODIFY` change record.
    ///
    /// # Errors
    ///
    /// Returns [`EntryStoreError::NotFound`] if the entry does not exist.
    fn update_winner(
        &self,
        id: &EntryId,
        winner: bool,
    ) -> Pin<Box<dyn Future<Output = Result<WinnerUpdate, EntryStoreError>> + Send + '_>>;
}
