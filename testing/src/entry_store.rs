//! In-memory entry store and change stream.
//!
//! [`InMemoryEntryStore`] behaves like the production store: creates and
//! successful winner updates append change records (`CREATE` and `MODIFY`)
//! to an ordered log, and [`InMemoryChangeStream`] replays that log with an
//! acknowledge cursor. Failure injection makes the retry paths testable.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Only panics on a poisoned lock

use raffle_core::change::{
    ChangeBatch, ChangeKind, ChangeRecord, ChangeStream, ChangeStreamError, StreamCheckpoint,
};
use raffle_core::entry::{Entry, EntryId};
use raffle_core::entry_store::{EntryStore, EntryStoreError, WinnerUpdate};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct StoreState {
    entries: HashMap<EntryId, Entry>,
    changes: Vec<ChangeRecord>,
    next_sequence: u64,
    failing_reads: usize,
    failing_updates: usize,
    update_calls: usize,
}

impl StoreState {
    fn record(&mut self, kind: ChangeKind, entry_id: EntryId, new_snapshot: Option<Entry>) -> u64 {
        self.next_sequence += 1;
        self.changes.push(ChangeRecord {
            sequence: self.next_sequence,
            kind,
            entry_id,
            new_snapshot,
        });
        self.next_sequence
    }
}

/// `HashMap`-backed entry store for fast, deterministic tests.
///
/// Clones share the same underlying table.
///
/// # Example
///
/// ```
/// use raffle_core::entry::{Entry, EntryId};
/// use raffle_core::entry_store::{EntryStore, WinnerUpdate};
/// use raffle_testing::{InMemoryEntryStore, test_clock};
/// use raffle_core::environment::Clock;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryEntryStore::new();
/// let entry = Entry::new(EntryId::new("E1"), "Ada", test_clock().now());
/// store.create_entry(entry).await?;
///
/// let first = store.update_winner(&EntryId::new("E1"), true).await?;
/// assert!(matches!(first, WinnerUpdate::Applied(_)));
///
/// let second = store.update_winner(&EntryId::new("E1"), false).await?;
/// assert_eq!(second, WinnerUpdate::AlreadySet(true));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryEntryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryEntryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Change stream over this store's change log, starting at the beginning.
    #[must_use]
    pub fn change_stream(&self) -> InMemoryChangeStream {
        InMemoryChangeStream {
            state: Arc::clone(&self.state),
            acknowledged: Arc::new(Mutex::new(StreamCheckpoint::default())),
            failing_reads: Arc::new(Mutex::new(0)),
        }
    }

    /// Current copy of an entry.
    #[must_use]
    pub fn entry(&self, id: &EntryId) -> Option<Entry> {
        self.state.lock().unwrap().entries.get(id).cloned()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().unwrap().entries.is_empty()
    }

    /// Every change record emitted so far.
    #[must_use]
    pub fn changes(&self) -> Vec<ChangeRecord> {
        self.state.lock().unwrap().changes.clone()
    }

    /// Append an arbitrary change record (e.g. a `DELETE`) to the log without
    /// touching the table. Returns its sequence.
    pub fn record_change(&self, kind: ChangeKind, entry_id: EntryId, new_snapshot: Option<Entry>) -> u64 {
        self.state.lock().unwrap().record(kind, entry_id, new_snapshot)
    }

    /// Make the next `count` reads fail with [`EntryStoreError::Unavailable`].
    pub fn fail_next_reads(&self, count: usize) {
        self.state.lock().unwrap().failing_reads = count;
    }

    /// Make the next `count` winner updates fail with [`EntryStoreError::Unavailable`].
    pub fn fail_next_updates(&self, count: usize) {
        self.state.lock().unwrap().failing_updates = count;
    }

    /// Number of `update_winner` calls, failed ones included.
    #[must_use]
    pub fn update_calls(&self) -> usize {
        self.state.lock().unwrap().update_calls
    }

    /// Number of winner transitions actually applied.
    #[must_use]
    pub fn winner_transitions(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .changes
            .iter()
            .filter(|c| c.kind == ChangeKind::Modify)
            .count()
    }
}

impl EntryStore for InMemoryEntryStore {
    fn create_entry(
        &self,
        entry: Entry,
    ) -> Pin<Box<dyn Future<Output = Result<Entry, EntryStoreError>> + Send + '_>> {
        let result = {
            let mut state = self.state.lock().unwrap();
            if state.entries.contains_key(&entry.id) {
                Err(EntryStoreError::AlreadyExists(entry.id.clone()))
            } else {
                state.entries.insert(entry.id.clone(), entry.clone());
                state.record(ChangeKind::Create, entry.id.clone(), Some(entry.clone()));
                Ok(entry)
            }
        };
        Box::pin(async move { result })
    }

    fn get_entry(
        &self,
        id: &EntryId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Entry>, EntryStoreError>> + Send + '_>> {
        let result = {
            let mut state = self.state.lock().unwrap();
            if state.failing_reads > 0 {
                state.failing_reads -= 1;
                Err(EntryStoreError::Unavailable("injected read failure".to_string()))
            } else {
                Ok(state.entries.get(id).cloned())
            }
        };
        Box::pin(async move { result })
    }

    fn update_winner(
        &self,
        id: &EntryId,
        winner: bool,
    ) -> Pin<Box<dyn Future<Output = Result<WinnerUpdate, EntryStoreError>> + Send + '_>> {
        let result = {
            let mut state = self.state.lock().unwrap();
            state.update_calls += 1;
            if state.failing_updates > 0 {
                state.failing_updates -= 1;
                Err(EntryStoreError::Unavailable("injected update failure".to_string()))
            } else {
                let current = state.entries.get(id).map(|entry| entry.winner);
                match current {
                    None => Err(EntryStoreError::NotFound(id.clone())),
                    Some(Some(existing)) => Ok(WinnerUpdate::AlreadySet(existing)),
                    Some(None) => {
                        let entry = state.entries.get_mut(id).unwrap();
                        entry.winner = Some(winner);
                        let snapshot = entry.clone();
                        state.record(ChangeKind::Modify, id.clone(), Some(snapshot.clone()));
                        Ok(WinnerUpdate::Applied(snapshot))
                    }
                }
            }
        };
        Box::pin(async move { result })
    }
}

/// Change stream over an [`InMemoryEntryStore`]'s log.
///
/// Unacknowledged records are returned again by the next
/// [`ChangeStream::next_batch`], like a real at-least-once stream.
#[derive(Debug, Clone)]
pub struct InMemoryChangeStream {
    state: Arc<Mutex<StoreState>>,
    acknowledged: Arc<Mutex<StreamCheckpoint>>,
    failing_reads: Arc<Mutex<usize>>,
}

impl InMemoryChangeStream {
    /// Last acknowledged checkpoint.
    #[must_use]
    pub fn acknowledged(&self) -> StreamCheckpoint {
        *self.acknowledged.lock().unwrap()
    }

    /// Make the next `count` batch reads fail with [`ChangeStreamError::Unavailable`].
    pub fn fail_next_reads(&self, count: usize) {
        *self.failing_reads.lock().unwrap() = count;
    }
}

impl ChangeStream for InMemoryChangeStream {
    fn next_batch(
        &self,
        max_records: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ChangeBatch>, ChangeStreamError>> + Send + '_>> {
        let result = {
            let mut failing = self.failing_reads.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                Err(ChangeStreamError::Unavailable("injected stream failure".to_string()))
            } else {
                let after = self.acknowledged.lock().unwrap().sequence();
                let state = self.state.lock().unwrap();
                let records: Vec<ChangeRecord> = state
                    .changes
                    .iter()
                    .filter(|c| c.sequence > after)
                    .take(max_records.max(1))
                    .cloned()
                    .collect();
                Ok(ChangeBatch::from_records(records))
            }
        };
        Box::pin(async move { result })
    }

    fn acknowledge(
        &self,
        checkpoint: StreamCheckpoint,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChangeStreamError>> + Send + '_>> {
        {
            let mut acknowledged = self.acknowledged.lock().unwrap();
            if checkpoint > *acknowledged {
                *acknowledged = checkpoint;
            }
        }
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::test_clock;
    use raffle_core::environment::Clock;

    fn entry(id: &str) -> Entry {
        Entry::new(EntryId::new(id), "Ada", test_clock().now())
    }

    #[tokio::test]
    async fn create_emits_create_change() {
        let store = InMemoryEntryStore::new();
        store.create_entry(entry("E1")).await.unwrap();

        let changes = store.changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Create);
        assert_eq!(changes[0].new_snapshot, Some(entry("E1")));
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let store = InMemoryEntryStore::new();
        store.create_entry(entry("E1")).await.unwrap();
        let result = store.create_entry(entry("E1")).await;
        assert!(matches!(result, Err(EntryStoreError::AlreadyExists(_))));
        assert_eq!(store.changes().len(), 1);
    }

    #[tokio::test]
    async fn winner_update_is_conditional() {
        let store = InMemoryEntryStore::new();
        store.create_entry(entry("E1")).await.unwrap();
        let id = EntryId::new("E1");

        let first = store.update_winner(&id, false).await.unwrap();
        assert_eq!(first.persisted_outcome(), Some(false));
        let second = store.update_winner(&id, true).await.unwrap();
        assert_eq!(second, WinnerUpdate::AlreadySet(false));
        assert_eq!(store.entry(&id).and_then(|e| e.winner), Some(false));
        assert_eq!(store.winner_transitions(), 1);
    }

    #[tokio::test]
    async fn update_of_missing_entry_is_not_found() {
        let store = InMemoryEntryStore::new();
        let result = store.update_winner(&EntryId::new("nope"), true).await;
        assert!(matches!(result, Err(EntryStoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn injected_update_failures_are_transient() {
        let store = InMemoryEntryStore::new();
        store.create_entry(entry("E1")).await.unwrap();
        store.fail_next_updates(1);

        let failed = store.update_winner(&EntryId::new("E1"), true).await;
        assert!(failed.is_err_and(|e| e.is_transient()));
        assert!(store.update_winner(&EntryId::new("E1"), true).await.is_ok());
        assert_eq!(store.update_calls(), 2);
    }

    #[tokio::test]
    async fn unacknowledged_batch_is_redelivered() {
        let store = InMemoryEntryStore::new();
        let stream = store.change_stream();
        store.create_entry(entry("E1")).await.unwrap();
        store.create_entry(entry("E2")).await.unwrap();

        let first = stream.next_batch(10).await.unwrap().unwrap();
        assert_eq!(first.len(), 2);
        let again = stream.next_batch(10).await.unwrap().unwrap();
        assert_eq!(again, first);

        stream.acknowledge(first.checkpoint).await.unwrap();
        assert!(stream.next_batch(10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn batch_size_is_respected() {
        let store = InMemoryEntryStore::new();
        let stream = store.change_stream();
        for id in ["E1", "E2", "E3"] {
            store.create_entry(entry(id)).await.unwrap();
        }

        let batch = stream.next_batch(2).await.unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.checkpoint, StreamCheckpoint(2));
    }

    #[tokio::test]
    async fn acknowledging_backwards_is_a_no_op() {
        let store = InMemoryEntryStore::new();
        let stream = store.change_stream();
        stream.acknowledge(StreamCheckpoint(5)).await.unwrap();
        stream.acknowledge(StreamCheckpoint(2)).await.unwrap();
        assert_eq!(stream.acknowledged(), StreamCheckpoint(5));
    }
}
