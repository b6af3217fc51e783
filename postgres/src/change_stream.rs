//! Change stream over the `entry_changes` table.

use crate::error::stream_error;
use raffle_core::change::{ChangeBatch, ChangeKind, ChangeRecord, ChangeStream, ChangeStreamError, StreamCheckpoint};
use raffle_core::entry::{Entry, EntryId};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use std::future::Future;
use std::pin::Pin;

/// [`ChangeStream`] reading `entry_changes` in sequence order.
///
/// Each named stream keeps its own cursor in `change_checkpoints`, so
/// several independent readers can follow the same feed.
#[derive(Clone)]
pub struct PostgresChangeStream {
    pool: PgPool,
    name: String,
}

impl PostgresChangeStream {
    /// Follow the change feed under the cursor `name`.
    #[must_use]
    pub fn new(pool: PgPool, name: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
        }
    }

    /// Cursor name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn row_to_record(row: &PgRow) -> Result<ChangeRecord, ChangeStreamError> {
        let sequence: i64 = row.get("sequence");
        let sequence = u64::try_from(sequence)
            .map_err(|_| ChangeStreamError::Malformed(format!("negative sequence {sequence}")))?;
        let kind = ChangeKind::parse(row.get::<&str, _>("kind"))?;
        let snapshot: Option<serde_json::Value> = row.get("snapshot");
        let new_snapshot = snapshot
            .map(serde_json::from_value::<Entry>)
            .transpose()
            .map_err(|e| ChangeStreamError::Malformed(format!("snapshot at {sequence}: {e}")))?;

        Ok(ChangeRecord {
            sequence,
            kind,
            entry_id: EntryId::new(row.get::<String, _>("entry_id")),
            new_snapshot,
        })
    }
}

impl ChangeStream for PostgresChangeStream {
    fn next_batch(
        &self,
        max_records: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Option<ChangeBatch>, ChangeStreamError>> + Send + '_>> {
        Box::pin(async move {
            let limit = i64::try_from(max_records).unwrap_or(i64::MAX);
            let rows = sqlx::query(
                r"
                SELECT sequence, kind, entry_id, snapshot
                FROM entry_changes
                WHERE sequence > COALESCE(
                    (SELECT sequence FROM change_checkpoints WHERE stream = $1),
                    0
                )
                ORDER BY sequence ASC
                LIMIT $2
                ",
            )
            .bind(&self.name)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| stream_error(&e))?;

            let records = rows
                .iter()
                .map(Self::row_to_record)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ChangeBatch::from_records(records))
        })
    }

    fn acknowledge(
        &self,
        checkpoint: StreamCheckpoint,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChangeStreamError>> + Send + '_>> {
        Box::pin(async move {
            let sequence = i64::try_from(checkpoint.sequence()).map_err(|_| ChangeStreamError::AcknowledgeFailed {
                checkpoint,
                reason: "sequence out of range".to_string(),
            })?;

            sqlx::query(
                r"
                INSERT INTO change_checkpoints (stream, sequence, updated_at)
                VALUES ($1, $2, now())
                ON CONFLICT (stream) DO UPDATE
                SET sequence = GREATEST(change_checkpoints.sequence, EXCLUDED.sequence),
                    updated_at = now()
                ",
            )
            .bind(&self.name)
            .bind(sequence)
            .execute(&self.pool)
            .await
            .map_err(|e| ChangeStreamError::AcknowledgeFailed {
                checkpoint,
                reason: e.to_string(),
            })?;

            tracing::trace!(stream = %self.name, sequence = sequence, "Checkpoint saved");
            Ok(())
        })
    }
}
