//! Raffle entry endpoints.
//!
//! Entering the raffle only writes the entry; the winner is decided
//! asynchronously by the pipeline and shows up on the lookup route once
//! persisted.

use crate::error::AppError;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use raffle_core::entry::{Entry, EntryId};
use serde::{Deserialize, Serialize};

/// Query string of the submission route.
#[derive(Debug, Deserialize)]
pub struct SubmitParams {
    /// Participant name.
    pub name: Option<String>,
}

/// An entry as returned by the lookup route.
///
/// Unlike the wire snapshot, `winner` is always present (`null` while
/// undecided).
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryView {
    /// Entry id.
    pub id: String,
    /// Participant name.
    pub name: String,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Persisted outcome.
    pub winner: Option<bool>,
}

impl From<Entry> for EntryView {
    fn from(entry: Entry) -> Self {
        Self {
            id: entry.id.to_string(),
            name: entry.name,
            timestamp: entry.timestamp,
            winner: entry.winner,
        }
    }
}

/// Enter the raffle.
///
/// # Endpoint
///
/// ```text
/// GET /raffle?name=Ada
/// ```
///
/// # Response
///
/// ```json
/// {"id": "5f0c...", "name": "Ada", "timestamp": "2025-01-01T00:00:00Z"}
/// ```
///
/// # Errors
///
/// - 400 when `name` is missing or blank
/// - 503 when the store is throttling
pub async fn submit_entry(
    State(state): State<AppState>,
    Query(params): Query<SubmitParams>,
) -> Result<Json<Entry>, AppError> {
    let name = params
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| AppError::bad_request("name is required"))?;

    let entry = Entry::new(EntryId::generate(), name, state.clock.now());
    let created = state.store.create_entry(entry).await?;

    tracing::info!(entry_id = %created.id, "Raffle entry submitted");
    metrics::counter!("web_entries_submitted_total").increment(1);

    Ok(Json(created))
}

/// Look up an entry and its outcome.
///
/// # Endpoint
///
/// ```text
/// GET /raffle/{id}
/// ```
///
/// # Errors
///
/// - 404 when no entry has this id
pub async fn get_entry(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<EntryView>, AppError> {
    let id = EntryId::new(id);
    let entry = state
        .store
        .get_entry(&id)
        .await?
        .ok_or_else(|| AppError::not_found("Entry", &id))?;

    Ok(Json(entry.into()))
}
