//! Mapping of sqlx errors onto the store error types.

use raffle_core::change::ChangeStreamError;
use raffle_core::entry::EntryId;
use raffle_core::entry_store::EntryStoreError;

const UNIQUE_VIOLATION: &str = "23505";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const TOO_MANY_CONNECTIONS: &str = "53300";

/// Whether the database can be expected to accept the same call later.
fn is_transient(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => true,
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED | TOO_MANY_CONNECTIONS)
        ),
        _ => false,
    }
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION))
}

/// Classify a failed entry store query.
pub(crate) fn store_error(error: &sqlx::Error) -> EntryStoreError {
    if is_transient(error) {
        EntryStoreError::Unavailable(error.to_string())
    } else {
        EntryStoreError::DatabaseError(error.to_string())
    }
}

/// Classify a failed insert of `id`.
pub(crate) fn insert_error(error: &sqlx::Error, id: &EntryId) -> EntryStoreError {
    if is_unique_violation(error) {
        EntryStoreError::AlreadyExists(id.clone())
    } else {
        store_error(error)
    }
}

/// Classify a failed change stream read.
pub(crate) fn stream_error(error: &sqlx::Error) -> ChangeStreamError {
    if is_transient(error) {
        ChangeStreamError::Unavailable(error.to_string())
    } else {
        ChangeStreamError::Malformed(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_pool_is_transient() {
        assert!(matches!(store_error(&sqlx::Error::PoolTimedOut), EntryStoreError::Unavailable(_)));
        assert!(matches!(stream_error(&sqlx::Error::PoolTimedOut), ChangeStreamError::Unavailable(_)));
    }

    #[test]
    fn missing_row_is_not_transient() {
        assert!(matches!(store_error(&sqlx::Error::RowNotFound), EntryStoreError::DatabaseError(_)));
    }

    #[test]
    fn non_database_insert_error_is_not_a_conflict() {
        let error = insert_error(&sqlx::Error::PoolClosed, &EntryId::new("E1"));
        assert!(matches!(error, EntryStoreError::Unavailable(_)));
    }
}
