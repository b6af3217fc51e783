//! The winner draw.
//!
//! A [`Decision`] maps an entry snapshot to a boolean outcome. Implementations
//! may be non-deterministic: the consumer only calls it for entries whose
//! `winner` is still unset, and the conditional store update guarantees the
//! first persisted outcome is the one that sticks.

use crate::entry::Entry;

/// Pluggable winner selection.
pub trait Decision: Send + Sync {
    /// Decide whether `entry` wins.
    fn decide(&self, entry: &Entry) -> bool;

    /// Short name for logs and metrics labels.
    fn name(&self) -> &'static str {
        "custom"
    }
}

impl<F> Decision for F
where
    F: Fn(&Entry) -> bool + Send + Sync,
{
    fn decide(&self, entry: &Entry) -> bool {
        self(entry)
    }
}
