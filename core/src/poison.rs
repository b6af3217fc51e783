//! Reporting of poison messages.
//!
//! A poison message is one the consumer can never handle (undecodable payload,
//! key/payload mismatch, or an entry missing from the store). It is skipped so
//! the rest of the partition keeps flowing, and handed to a [`PoisonSink`] so
//! an operator can see it.

use crate::message::ConsumedMessage;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Everything known about a skipped message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoisonReport {
    /// The raw message as read from the topic.
    pub message: ConsumedMessage,
    /// Why the message was skipped.
    pub reason: String,
    /// When the consumer gave up on it.
    pub reported_at: DateTime<Utc>,
}

impl PoisonReport {
    /// Build a report for `message`.
    #[must_use]
    pub fn new(message: ConsumedMessage, reason: impl Into<String>, reported_at: DateTime<Utc>) -> Self {
        Self {
            message,
            reason: reason.into(),
            reported_at,
        }
    }
}

/// Destination for poison reports.
///
/// Reporting is best effort: implementations log their own failures and the
/// consumer never retries or blocks on them.
pub trait PoisonSink: Send + Sync {
    /// Record a skipped message.
    fn report(&self, report: PoisonReport) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}
