//! Shared handler state.

use raffle_core::entry_store::EntryStore;
use raffle_core::environment::Clock;
use std::sync::Arc;

/// State shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Where entries are created and read.
    pub store: Arc<dyn EntryStore>,
    /// Source of entry timestamps.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    /// Create the state.
    #[must_use]
    pub fn new(store: Arc<dyn EntryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}
