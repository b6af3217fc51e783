//! # Raffle Core
//!
//! Core types and traits for the raffle entry pipeline.
//!
//! The pipeline has three stages:
//!
//! ```text
//! ┌─────────────┐  change   ┌─────────┐  message  ┌─────────┐  message  ┌──────────┐
//! │ Entry Store │ ────────► │  Relay  │ ────────► │  Topic  │ ────────► │ Consumer │
//! └──────▲──────┘  stream   └─────────┘  append   └─────────┘   batch   └────┬─────┘
//!        │                                                                   │
//!        └──────────────────── conditional winner update ────────────────────┘
//! ```
//!
//! This crate only defines the vocabulary: the [`entry::Entry`] record, the
//! [`change::ChangeRecord`] emitted by the store, the wire [`message`] codec,
//! and the traits every adapter implements:
//!
//! - [`entry_store::EntryStore`]: point reads, creates and conditional winner updates
//! - [`change::ChangeStream`]: at-least-once feed of store changes with checkpoints
//! - [`topic::TopicProducer`], [`topic::TopicConsumer`], [`topic::TopicAdmin`]:
//!   the partitioned log
//! - [`decision::Decision`]: the winner draw
//! - [`poison::PoisonSink`]: where undecodable messages are reported
//!
//! ## Delivery Semantics
//!
//! Every hop is at-least-once. Correctness comes from idempotent consumption:
//! the consumer checks `winner` before deciding and the store only writes
//! `winner` while it is unset.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod change;
pub mod decision;
pub mod entry;
pub mod entry_store;
pub mod message;
pub mod poison;
pub mod topic;

/// Environment traits injected into workers and handlers.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use raffle_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let now = clock.now();
    /// assert!(now.timestamp() > 0);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock used in production.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use change::{ChangeBatch, ChangeKind, ChangeRecord, ChangeStream, ChangeStreamError, StreamCheckpoint};
pub use decision::Decision;
pub use entry::{Entry, EntryId, WinnerState};
pub use entry_store::{EntryStore, EntryStoreError, WinnerUpdate};
pub use message::{ConsumedMessage, DecodeError, EntryMessage};
pub use poison::{PoisonReport, PoisonSink};
pub use topic::{Delivery, PartitionOffset, TopicAdmin, TopicConsumer, TopicError, TopicProducer, TopicSpec};
