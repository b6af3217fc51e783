//! Built-in winner draws.
//!
//! [`RandomDecision`] is the default: an independent draw per call. It is only
//! idempotent through the store's conditional update, which keeps whichever
//! outcome lands first. [`HashedDecision`] derives the outcome from the
//! immutable entry id, so every redelivery computes the same answer.

use raffle_core::decision::Decision;
use raffle_core::entry::Entry;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Fair coin with a configurable win probability.
#[derive(Debug, Clone, Copy)]
pub struct RandomDecision {
    probability: f64,
}

impl RandomDecision {
    /// Win with the given probability, clamped to `[0, 1]`.
    #[must_use]
    pub fn new(probability: f64) -> Self {
        Self {
            probability: clamp_probability(probability),
        }
    }

    /// Win probability.
    #[must_use]
    pub const fn probability(&self) -> f64 {
        self.probability
    }
}

impl Default for RandomDecision {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl Decision for RandomDecision {
    fn decide(&self, _entry: &Entry) -> bool {
        rand::thread_rng().gen_bool(self.probability)
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

/// Outcome derived from SHA-256 of the entry id.
#[derive(Debug, Clone, Copy)]
pub struct HashedDecision {
    probability: f64,
}

impl HashedDecision {
    /// Win with the given probability across ids, clamped to `[0, 1]`.
    #[must_use]
    pub fn new(probability: f64) -> Self {
        Self {
            probability: clamp_probability(probability),
        }
    }
}

impl Default for HashedDecision {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl Decision for HashedDecision {
    #[allow(clippy::cast_precision_loss)]
    fn decide(&self, entry: &Entry) -> bool {
        let digest = Sha256::digest(entry.id.as_bytes());
        let mut prefix = [0_u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let unit = u64::from_be_bytes(prefix) as f64 / u64::MAX as f64;
        unit < self.probability
    }

    fn name(&self) -> &'static str {
        "hashed"
    }
}

fn clamp_probability(probability: f64) -> f64 {
    if probability.is_nan() {
        0.5
    } else {
        probability.clamp(0.0, 1.0)
    }
}

/// Configured choice of built-in draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecisionStrategy {
    /// [`RandomDecision`]
    #[default]
    Random,
    /// [`HashedDecision`]
    Hashed,
}

impl DecisionStrategy {
    /// Build the draw with the given win probability.
    #[must_use]
    pub fn build(self, probability: f64) -> Arc<dyn Decision> {
        match self {
            Self::Random => Arc::new(RandomDecision::new(probability)),
            Self::Hashed => Arc::new(HashedDecision::new(probability)),
        }
    }
}

/// Unknown strategy name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown decision strategy '{0}' (expected 'random' or 'hashed')")]
pub struct ParseStrategyError(String);

impl FromStr for DecisionStrategy {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "hashed" => Ok(Self::Hashed),
            _ => Err(ParseStrategyError(s.to_string())),
        }
    }
}

impl fmt::Display for DecisionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Random => f.write_str("random"),
            Self::Hashed => f.write_str("hashed"),
        }
    }
}
