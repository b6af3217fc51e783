//! HTTP surface of the raffle pipeline.
//!
//! The routes only talk to the entry store. Creating an entry emits a
//! `CREATE` change that the relay forwards; the winner consumer later fills
//! in `winner`, which the lookup route reports.
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET /raffle?name=<name>` | enter the raffle |
//! | `GET /raffle/{id}` | entry and outcome (`winner: null` while undecided) |
//! | `GET /health` | liveness |
//!
//! # Example
//!
//! ```
//! use raffle_core::environment::SystemClock;
//! use raffle_testing::InMemoryEntryStore;
//! use raffle_web::{AppState, router};
//! use std::sync::Arc;
//!
//! let state = AppState::new(Arc::new(InMemoryEntryStore::new()), Arc::new(SystemClock));
//! let app = router(state);
//! ```

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

pub use error::AppError;
pub use middleware::{REQUEST_ID_HEADER, RequestId};
pub use state::AppState;

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

/// Build the application router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/raffle", get(handlers::submit_entry))
        .route("/raffle/:id", get(handlers::get_entry))
        .route("/health", get(handlers::health_check))
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(middleware::request_id))
        .with_state(state)
}
