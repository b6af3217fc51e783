//! The raffle entry record and its winner lifecycle.
//!
//! An [`Entry`] is created once by the submission endpoint and is immutable
//! except for its `winner` field, which moves from unset to a terminal
//! outcome exactly once:
//!
//! ```text
//! Unset ──► Won
//!   │
//!   └─────► Lost
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque, immutable identifier of a raffle entry.
///
/// Also used as the message key on the topic, so every message for one entry
/// lands on the same partition.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    /// Wrap an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random (v4 UUID) identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identifier as message key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EntryId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for EntryId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Winner state of an entry.
///
/// `Won` and `Lost` are terminal: once an entry leaves `Unset` it never
/// changes again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum WinnerState {
    /// No decision persisted yet.
    #[default]
    Unset,
    /// The entry won the raffle.
    Won,
    /// The entry did not win.
    Lost,
}

impl WinnerState {
    /// Whether a decision has been persisted.
    #[must_use]
    pub const fn is_decided(self) -> bool {
        !matches!(self, Self::Unset)
    }

    /// State for a persisted boolean outcome.
    #[must_use]
    pub const fn from_outcome(winner: bool) -> Self {
        if winner { Self::Won } else { Self::Lost }
    }

    /// The stored representation: `None` while unset.
    #[must_use]
    pub const fn as_option(self) -> Option<bool> {
        match self {
            Self::Unset => None,
            Self::Won => Some(true),
            Self::Lost => Some(false),
        }
    }
}

impl From<Option<bool>> for WinnerState {
    fn from(value: Option<bool>) -> Self {
        value.map_or(Self::Unset, Self::from_outcome)
    }
}

impl fmt::Display for WinnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => f.write_str("UNSET"),
            Self::Won => f.write_str("WON"),
            Self::Lost => f.write_str("LOST"),
        }
    }
}

/// One raffle participant record.
///
/// Serialized as the JSON object `{id, name, timestamp}`; `winner` is only
/// present once decided. Unknown fields are ignored when reading so new
/// optional fields can be added without breaking older readers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Identifier assigned at creation.
    pub id: EntryId,
    /// Participant-supplied name.
    pub name: String,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
    /// Winner outcome, `None` while undecided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<bool>,
}

impl Entry {
    /// Create an undecided entry.
    #[must_use]
    pub fn new(id: EntryId, name: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            name: name.into(),
            timestamp,
            winner: None,
        }
    }

    /// Current winner state.
    #[must_use]
    pub fn winner_state(&self) -> WinnerState {
        WinnerState::from(self.winner)
    }

    /// Snapshot of this entry as it was at creation (winner cleared).
    #[must_use]
    pub fn creation_snapshot(&self) -> Self {
        Self {
            winner: None,
            ..self.clone()
        }
    }
}
