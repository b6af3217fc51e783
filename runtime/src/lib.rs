//! # Raffle Runtime
//!
//! The pipeline workers.
//!
//! ## Core Components
//!
//! - **[`Relay`]**: forwards creation events from the entry store's change
//!   stream to the durable topic, at least once
//! - **[`ensure_topic`] / [`BootstrappingProducer`]**: idempotent topic bootstrap
//! - **[`WinnerConsumer`]**: decides and persists winners, idempotently under
//!   redelivery
//! - **[`retry`]**: bounded exponential backoff used by every worker
//! - **[`LazyResource`]**: per-worker connection handles with explicit teardown
//!
//! ## Example
//!
//! ```
//! use raffle_core::topic::TopicSpec;
//! use raffle_runtime::{ConsumerConfig, LogPoisonSink, RandomDecision, Relay, RelayConfig, WinnerConsumer};
//! use raffle_testing::{InMemoryBroker, InMemoryEntryStore};
//! use std::sync::Arc;
//!
//! let store = InMemoryEntryStore::new();
//! let broker = InMemoryBroker::new().with_topic(&TopicSpec::new("raffle-entries"));
//!
//! let relay = Relay::new(
//!     Arc::new(store.change_stream()),
//!     Arc::new(broker.clone()),
//!     RelayConfig::new("raffle-entries"),
//! );
//! let consumer = WinnerConsumer::new(
//!     Arc::new(broker.consumer("winners", &["raffle-entries"])),
//!     Arc::new(store),
//!     Arc::new(RandomDecision::default()),
//!     Arc::new(LogPoisonSink),
//!     ConsumerConfig::default(),
//! );
//! ```

/// Idempotent topic creation
pub mod bootstrap;

/// Winner selection consumer
pub mod consumer;

/// Built-in winner draws
pub mod decision;

/// Prometheus metrics for observability
pub mod metrics;

/// Logging poison sink
pub mod poison;

/// Change capture relay
pub mod relay;

/// Retry logic with exponential backoff
pub mod retry;

/// Lazily initialized worker resources
pub mod worker;

pub use bootstrap::{BootstrappingProducer, TopicStatus, ensure_topic};
pub use consumer::{BatchReport, ConsumerConfig, ConsumerError, MessageOutcome, WinnerConsumer};
pub use decision::{DecisionStrategy, HashedDecision, RandomDecision};
pub use poison::LogPoisonSink;
pub use relay::{Relay, RelayConfig, RelayError, RelayReport};
pub use retry::RetryPolicy;
pub use worker::LazyResource;
