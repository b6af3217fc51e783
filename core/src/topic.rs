//! Durable topic abstraction: a partitioned, append-only log.
//!
//! The relay is the only producer and the winner consumer the only reader
//! that makes decisions. Three traits split the broker surface the way the
//! workers use it:
//!
//! - [`TopicProducer`]: keyed appends, acknowledged with partition and offset
//! - [`TopicConsumer`]: batch reads, explicit commits, seeks for redelivery
//! - [`TopicAdmin`]: list and create topics during bootstrap
//!
//! # Key Principles
//!
//! - **Key routing**: messages with the same key always land on the same partition
//! - **Ordered within partition**: reads return a partition's messages in append order
//! - **At-least-once**: a message is read again until an offset past it is committed
//!
//! # Implementations
//!
//! - `RedpandaProducer` / `RedpandaConsumer` / `RedpandaAdmin` (in `raffle-redpanda`)
//! - `InMemoryBroker` (in `raffle-testing`)

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

use crate::entry::EntryId;
use crate::message::ConsumedMessage;

/// Errors that can occur during topic operations.
#[derive(Error, Debug, Clone)]
pub enum TopicError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Broker reachable but temporarily unable to serve the request
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// Operation did not complete in time
    #[error("Operation on topic '{topic}' timed out after {timeout:?}")]
    Timeout {
        /// The topic involved
        topic: String,
        /// The bound that elapsed
        timeout: Duration,
    },

    /// Failed to append a message
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Topic does not exist
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    /// Topic creation raced with another initializer
    #[error("Topic already exists: {0}")]
    TopicAlreadyExists(String),

    /// Topic name or layout is invalid
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Failed to read messages
    #[error("Consume failed: {0}")]
    ConsumeFailed(String),

    /// Failed to commit or seek offsets
    #[error("Offset operation failed: {0}")]
    OffsetFailed(String),

    /// Client configuration is unusable
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TopicError {
    /// Whether retrying the same call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_)
                | Self::Timeout { .. }
                | Self::PublishFailed { .. }
                | Self::ConnectionFailed(_)
                | Self::ConsumeFailed(_)
                | Self::OffsetFailed(_)
        )
    }
}

/// Layout of a topic to bootstrap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopicSpec {
    /// Topic name.
    pub name: String,
    /// Number of partitions (at least 1).
    pub partitions: u32,
    /// Replication factor (at least 1).
    pub replication: u32,
}

impl TopicSpec {
    /// Single-partition, single-replica topic.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partitions: 1,
            replication: 1,
        }
    }

    /// Set the partition count.
    #[must_use]
    pub const fn with_partitions(mut self, partitions: u32) -> Self {
        self.partitions = partitions;
        self
    }

    /// Set the replication factor.
    #[must_use]
    pub const fn with_replication(mut self, replication: u32) -> Self {
        self.replication = replication;
        self
    }

    /// Check the layout before sending it to a broker.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError::InvalidTopic`] for an empty name or a zero
    /// partition count or replication factor.
    pub fn validate(&self) -> Result<(), TopicError> {
        if self.name.trim().is_empty() {
            return Err(TopicError::InvalidTopic("topic name is empty".to_string()));
        }
        if self.partitions == 0 {
            return Err(TopicError::InvalidTopic(format!(
                "topic '{}' must have at least one partition",
                self.name
            )));
        }
        if self.replication == 0 {
            return Err(TopicError::InvalidTopic(format!(
                "topic '{}' must have a replication factor of at least one",
                self.name
            )));
        }
        Ok(())
    }
}

/// Broker acknowledgement of an append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Partition the message landed on.
    pub partition: i32,
    /// Offset assigned within the partition.
    pub offset: i64,
}

/// Position within one partition of a topic.
///
/// For commits the offset is the *next* offset to read, following the Kafka
/// convention (`last handled offset + 1`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PartitionOffset {
    /// Topic name.
    pub topic: String,
    /// Partition within the topic.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
}

impl PartitionOffset {
    /// Commit position that acknowledges `message` and everything before it.
    #[must_use]
    pub fn after(message: &ConsumedMessage) -> Self {
        Self {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset + 1,
        }
    }

    /// Position that re-reads `message`.
    #[must_use]
    pub fn at(message: &ConsumedMessage) -> Self {
        Self {
            topic: message.topic.clone(),
            partition: message.partition,
            offset: message.offset,
        }
    }
}

/// Keyed appends to a topic.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so producers can be wrapped
/// and shared as `Arc<dyn TopicProducer>`.
pub trait TopicProducer: Send + Sync {
    /// Append one message and wait for the broker acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError`] if the broker does not acknowledge the append.
    fn append(
        &self,
        topic: &str,
        key: &EntryId,
        value: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<Delivery, TopicError>> + Send + '_>>;
}

/// Batch reads with explicit progress tracking.
///
/// The consumer belongs to one consumer group and is already subscribed to
/// its topics when constructed.
pub trait TopicConsumer: Send + Sync {
    /// Read up to `max_messages`, waiting at most `timeout` for the first one.
    ///
    /// Returns an empty batch when nothing arrived in time.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError::ConsumeFailed`] on transport failure.
    fn poll_batch(
        &self,
        max_messages: usize,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ConsumedMessage>, TopicError>> + Send + '_>>;

    /// Commit progress for the consumer group.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError::OffsetFailed`] if the commit is rejected.
    fn commit(
        &self,
        offsets: &[PartitionOffset],
    ) -> Pin<Box<dyn Future<Output = Result<(), TopicError>> + Send + '_>>;

    /// Move the read position of one partition so the next poll returns
    /// messages from `position.offset` on.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError::OffsetFailed`] if the seek fails.
    fn seek(
        &self,
        position: &PartitionOffset,
    ) -> Pin<Box<dyn Future<Output = Result<(), TopicError>> + Send + '_>>;
}

/// Topic administration used by bootstrap.
pub trait TopicAdmin: Send + Sync {
    /// Names of all existing topics.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError`] if cluster metadata cannot be fetched.
    fn list_topics(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, TopicError>> + Send + '_>>;

    /// Create a topic.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError::TopicAlreadyExists`] if the topic exists.
    fn create_topic(
        &self,
        spec: &TopicSpec,
    ) -> Pin<Box<dyn Future<Output = Result<(), TopicError>> + Send + '_>>;
}
