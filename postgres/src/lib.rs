//! `PostgreSQL` storage for the raffle pipeline.
//!
//! - [`PostgresEntryStore`]: the entry table with conditional winner updates
//! - [`PostgresChangeStream`]: the change feed the relay follows
//! - [`PostgresPoisonQueue`]: skipped messages awaiting an operator
//!
//! Schema lives in `migrations/` and is applied with [`migrate`].
//!
//! # Example
//!
//! ```no_run
//! use raffle_postgres::{PostgresChangeStream, PostgresEntryStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresEntryStore::connect("postgres://localhost/raffle", 10).await?;
//! raffle_postgres::migrate(store.pool()).await?;
//!
//! let changes = PostgresChangeStream::new(store.pool().clone(), "relay");
//! # Ok(())
//! # }
//! ```

mod change_stream;
mod entry_store;
mod error;
mod poison_queue;

pub use change_stream::PostgresChangeStream;
pub use entry_store::PostgresEntryStore;
pub use poison_queue::{PoisonRecord, PoisonStatus, PostgresPoisonQueue};

use raffle_core::entry_store::EntryStoreError;
use sqlx::PgPool;

/// Apply the bundled migrations.
///
/// # Errors
///
/// Returns [`EntryStoreError::DatabaseError`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), EntryStoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| EntryStoreError::DatabaseError(format!("Migration failed: {e}")))?;

    tracing::info!("Database migrations applied");
    Ok(())
}
