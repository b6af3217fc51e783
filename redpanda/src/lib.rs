//! Redpanda implementation of the raffle topic traits.
//!
//! Redpanda is Kafka-compatible, so this crate is a thin layer over
//! `rdkafka` (librdkafka):
//!
//! - [`RedpandaProducer`]: keyed appends, acknowledged with partition and offset
//! - [`RedpandaConsumer`]: batch polls, manual commits, seeks
//! - [`RedpandaAdmin`]: topic listing and creation for bootstrap
//!
//! All three are built from one [`RedpandaConfig`], whose broker list comes
//! either from static configuration or from a [`BrokerDiscovery`].
//!
//! # Delivery Semantics
//!
//! The consumer never auto-commits. Progress moves only when the winner
//! consumer commits after its idempotent write, which gives at-least-once
//! processing: a crash before commit redelivers the batch.
//!
//! # Example
//!
//! ```no_run
//! use raffle_redpanda::{RedpandaConfig, RedpandaConsumer, RedpandaProducer, StaticBrokers};
//!
//! # async fn example() -> Result<(), raffle_core::topic::TopicError> {
//! let config = RedpandaConfig::builder()
//!     .producer_acks("all")
//!     .discover(&StaticBrokers::from_csv("localhost:9092"))
//!     .await?;
//!
//! let producer = RedpandaProducer::new(&config)?;
//! let consumer = RedpandaConsumer::new(&config, "raffle-winners", &["raffle-entries"])?;
//! # Ok(())
//! # }
//! ```

mod admin;
mod config;
mod consumer;
mod discovery;
mod error;
mod producer;

pub use admin::RedpandaAdmin;
pub use config::{RedpandaConfig, RedpandaConfigBuilder, SaslCredentials};
pub use consumer::RedpandaConsumer;
pub use discovery::{BrokerDiscovery, StaticBrokers};
pub use producer::RedpandaProducer;
