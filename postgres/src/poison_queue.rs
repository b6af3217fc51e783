//! Persistent queue of poison messages.
//!
//! Keeps every message the winner consumer skipped so an operator can
//! inspect it, fix the entry by hand and mark it resolved, or discard it.

use chrono::{DateTime, Utc};
use raffle_core::entry_store::EntryStoreError;
use raffle_core::message::ConsumedMessage;
use raffle_core::poison::{PoisonReport, PoisonSink};
use sqlx::{PgPool, Row};
use std::future::Future;
use std::pin::Pin;

/// Status of a poison message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoisonStatus {
    /// Waiting for an operator
    Pending,
    /// Handled by hand
    Resolved,
    /// Permanently dropped
    Discarded,
}

impl PoisonStatus {
    /// Database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse the database representation.
    ///
    /// # Errors
    ///
    /// Returns [`EntryStoreError::DatabaseError`] for an unknown status.
    pub fn parse(s: &str) -> Result<Self, EntryStoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(EntryStoreError::DatabaseError(format!("Invalid poison status: {s}"))),
        }
    }
}

/// A stored poison message.
#[derive(Debug, Clone)]
pub struct PoisonRecord {
    /// Queue id
    pub id: i64,
    /// The skipped message and why
    pub report: PoisonReport,
    /// Current status
    pub status: PoisonStatus,
    /// When it was resolved or discarded
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who resolved it
    pub resolved_by: Option<String>,
    /// Resolution or discard notes
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL` poison queue.
///
/// # Example
///
/// ```no_run
/// use raffle_postgres::PostgresPoisonQueue;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let queue = PostgresPoisonQueue::new(pool);
///
/// for record in queue.list_pending(100).await? {
///     println!("{} at offset {}: {}", record.report.message.topic, record.report.message.offset, record.report.reason);
///     queue.mark_discarded(record.id, "reviewed").await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PostgresPoisonQueue {
    pool: PgPool,
}

impl PostgresPoisonQueue {
    /// Create a queue on `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Store a report.
    ///
    /// # Errors
    ///
    /// Returns [`EntryStoreError::DatabaseError`] if the insert fails.
    pub async fn add(&self, report: &PoisonReport) -> Result<i64, EntryStoreError> {
        let message = &report.message;
        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO poison_messages (
                topic, partition_id, message_offset, message_key, payload, reason, reported_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            ",
        )
        .bind(&message.topic)
        .bind(message.partition)
        .bind(message.offset)
        .bind(message.key.as_deref())
        .bind(message.payload.as_deref())
        .bind(&report.reason)
        .bind(report.reported_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| EntryStoreError::DatabaseError(e.to_string()))?;

        metrics::counter!("poison_queue_added_total").increment(1);
        Ok(id)
    }

    /// Oldest pending records first.
    ///
    /// # Errors
    ///
    /// Returns [`EntryStoreError::DatabaseError`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<PoisonRecord>, EntryStoreError> {
        self.list_by_status(PoisonStatus::Pending, limit).await
    }

    /// Records with `status`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`EntryStoreError::DatabaseError`] if the query fails.
    pub async fn list_by_status(&self, status: PoisonStatus, limit: usize) -> Result<Vec<PoisonRecord>, EntryStoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, topic, partition_id, message_offset, message_key, payload, reason,
                   reported_at, status, resolved_at, resolved_by, resolution_notes
            FROM poison_messages
            WHERE status = $1
            ORDER BY reported_at ASC, id ASC
            LIMIT $2
            ",
        )
        .bind(status.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EntryStoreError::DatabaseError(e.to_string()))?;

        rows.iter().map(Self::row_to_record).collect()
    }

    /// One record by id, if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`EntryStoreError::DatabaseError`] if the query fails.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<PoisonRecord>, EntryStoreError> {
        let row = sqlx::query(
            r"
            SELECT id, topic, partition_id, message_offset, message_key, payload, reason,
                   reported_at, status, resolved_at, resolved_by, resolution_notes
            FROM poison_messages
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EntryStoreError::DatabaseError(e.to_string()))?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    /// Mark a record as resolved by `resolved_by`.
    ///
    /// # Errors
    ///
    /// Returns [`EntryStoreError::DatabaseError`] if the update fails.
    pub async fn mark_resolved(&self, id: i64, resolved_by: &str, notes: Option<&str>) -> Result<(), EntryStoreError> {
        sqlx::query(
            r"
            UPDATE poison_messages
            SET status = 'resolved', resolved_at = NOW(), resolved_by = $1, resolution_notes = $2
            WHERE id = $3
            ",
        )
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| EntryStoreError::DatabaseError(e.to_string()))?;

        tracing::info!(poison_id = id, resolved_by = resolved_by, "Poison message resolved");
        metrics::counter!("poison_queue_resolved_total").increment(1);
        Ok(())
    }

    /// Mark a record as permanently discarded.
    ///
    /// # Errors
    ///
    /// Returns [`EntryStoreError::DatabaseError`] if the update fails.
    pub async fn mark_discarded(&self, id: i64, reason: &str) -> Result<(), EntryStoreError> {
        sqlx::query(
            r"
            UPDATE poison_messages
            SET status = 'discarded', resolved_at = NOW(), resolution_notes = $1
            WHERE id = $2
            ",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| EntryStoreError::DatabaseError(e.to_string()))?;

        tracing::warn!(poison_id = id, reason = reason, "Poison message discarded");
        Ok(())
    }

    /// Number of pending records.
    ///
    /// # Errors
    ///
    /// Returns [`EntryStoreError::DatabaseError`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, EntryStoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM poison_messages WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| EntryStoreError::DatabaseError(e.to_string()))?;

        Ok(count)
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<PoisonRecord, EntryStoreError> {
        let status: String = row.get("status");

        Ok(PoisonRecord {
            id: row.get("id"),
            report: PoisonReport {
                message: ConsumedMessage {
                    topic: row.get("topic"),
                    partition: row.get("partition_id"),
                    offset: row.get("message_offset"),
                    key: row.get("message_key"),
                    payload: row.get("payload"),
                },
                reason: row.get("reason"),
                reported_at: row.get("reported_at"),
            },
            status: PoisonStatus::parse(&status)?,
            resolved_at: row.get("resolved_at"),
            resolved_by: row.get("resolved_by"),
            resolution_notes: row.get("resolution_notes"),
        })
    }
}

impl PoisonSink for PostgresPoisonQueue {
    fn report(&self, report: PoisonReport) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            match self.add(&report).await {
                Ok(id) => tracing::debug!(
                    poison_id = id,
                    topic = %report.message.topic,
                    offset = report.message.offset,
                    "Poison message queued"
                ),
                Err(e) => tracing::error!(
                    topic = %report.message.topic,
                    offset = report.message.offset,
                    error = %e,
                    "Failed to queue poison message"
                ),
            }
        })
    }
}
