//! `PostgreSQL` entry store with a transactional change feed.
//!
//! Every write to `entries` inserts its change record in the same
//! transaction, so the relay never sees a change that was rolled back and
//! never misses one that was committed.

use crate::error::{insert_error, store_error};
use chrono::{DateTime, Utc};
use raffle_core::change::ChangeKind;
use raffle_core::entry::{Entry, EntryId};
use raffle_core::entry_store::{EntryStore, EntryStoreError, WinnerUpdate};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::future::Future;
use std::pin::Pin;

/// Advisory lock held by every change writer until commit.
///
/// `BIGSERIAL` values are handed out before commit, so two concurrent
/// writers could commit out of sequence order and a reader could checkpoint
/// past a record that is not yet visible. Serializing the writers makes
/// commit order equal sequence order.
const CHANGE_FEED_LOCK: i64 = 0x7261_6666_6c65;

/// [`EntryStore`] backed by `PostgreSQL`.
///
/// # Example
///
/// ```no_run
/// use raffle_postgres::PostgresEntryStore;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = PostgresEntryStore::connect("postgres://localhost/raffle", 10).await?;
/// raffle_postgres::migrate(store.pool()).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresEntryStore {
    pool: PgPool,
}

impl PostgresEntryStore {
    /// Use an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect with a pool of up to `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns [`EntryStoreError::Unavailable`] if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, EntryStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| EntryStoreError::Unavailable(format!("Failed to connect: {e}")))?;

        Ok(Self::new(pool))
    }

    /// The underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_entry(row: &PgRow) -> Entry {
        let created_at: DateTime<Utc> = row.get("created_at");
        Entry {
            id: EntryId::new(row.get::<String, _>("id")),
            name: row.get("name"),
            timestamp: created_at,
            winner: row.get("winner"),
        }
    }
}

/// Append one change record inside `tx`.
async fn record_change(
    tx: &mut Transaction<'_, Postgres>,
    kind: ChangeKind,
    entry: &Entry,
) -> Result<(), EntryStoreError> {
    let snapshot =
        serde_json::to_value(entry).map_err(|e| EntryStoreError::SerializationError(e.to_string()))?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(CHANGE_FEED_LOCK)
        .execute(&mut **tx)
        .await
        .map_err(|e| store_error(&e))?;

    sqlx::query("INSERT INTO entry_changes (kind, entry_id, snapshot) VALUES ($1, $2, $3)")
        .bind(kind.as_str())
        .bind(entry.id.as_str())
        .bind(snapshot)
        .execute(&mut **tx)
        .await
        .map_err(|e| store_error(&e))?;

    Ok(())
}

impl EntryStore for PostgresEntryStore {
    fn create_entry(
        &self,
        entry: Entry,
    ) -> Pin<Box<dyn Future<Output = Result<Entry, EntryStoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(|e| store_error(&e))?;

            sqlx::query("INSERT INTO entries (id, name, created_at, winner) VALUES ($1, $2, $3, $4)")
                .bind(entry.id.as_str())
                .bind(&entry.name)
                .bind(entry.timestamp)
                .bind(entry.winner)
                .execute(&mut *tx)
                .await
                .map_err(|e| insert_error(&e, &entry.id))?;

            record_change(&mut tx, ChangeKind::Create, &entry).await?;
            tx.commit().await.map_err(|e| store_error(&e))?;

            tracing::debug!(entry_id = %entry.id, "Entry created");
            metrics::counter!("entry_store_entries_created_total").increment(1);
            Ok(entry)
        })
    }

    fn get_entry(
        &self,
        id: &EntryId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Entry>, EntryStoreError>> + Send + '_>> {
        let id = id.clone();

        Box::pin(async move {
            let row = sqlx::query("SELECT id, name, created_at, winner FROM entries WHERE id = $1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| store_error(&e))?;

            Ok(row.as_ref().map(Self::row_to_entry))
        })
    }

    fn update_winner(
        &self,
        id: &EntryId,
        winner: bool,
    ) -> Pin<Box<dyn Future<Output = Result<WinnerUpdate, EntryStoreError>> + Send + '_>> {
        let id = id.clone();

        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(|e| store_error(&e))?;

            let updated = sqlx::query(
                r"
                UPDATE entries
                SET winner = $2
                WHERE id = $1 AND winner IS NULL
                RETURNING id, name, created_at, winner
                ",
            )
            .bind(id.as_str())
            .bind(winner)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| store_error(&e))?;

            if let Some(row) = updated {
                let entry = Self::row_to_entry(&row);
                record_change(&mut tx, ChangeKind::Modify, &entry).await?;
                tx.commit().await.map_err(|e| store_error(&e))?;

                tracing::debug!(entry_id = %id, winner = winner, "Winner persisted");
                return Ok(WinnerUpdate::Applied(entry));
            }

            let existing: Option<(Option<bool>,)> = sqlx::query_as("SELECT winner FROM entries WHERE id = $1")
                .bind(id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| store_error(&e))?;
            tx.rollback().await.map_err(|e| store_error(&e))?;

            match existing {
                None => Err(EntryStoreError::NotFound(id)),
                Some((Some(persisted),)) => Ok(WinnerUpdate::AlreadySet(persisted)),
                // The row was inserted between the two statements; the
                // next attempt updates it.
                Some((None,)) => Err(EntryStoreError::Unavailable(format!(
                    "entry {id} appeared during the winner update"
                ))),
            }
        })
    }
}
