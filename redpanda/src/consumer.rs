//! Batch reads with manual offset control through a librdkafka `StreamConsumer`.

use crate::config::RedpandaConfig;
use crate::error::{Operation, from_kafka};
use raffle_core::message::ConsumedMessage;
use raffle_core::topic::{PartitionOffset, TopicConsumer, TopicError};
use rdkafka::Message;
use rdkafka::TopicPartitionList;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::Offset;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// [`TopicConsumer`] backed by Redpanda.
///
/// Auto-commit is disabled: the group's progress moves only through
/// [`TopicConsumer::commit`], so a crash before commit redelivers the batch.
pub struct RedpandaConsumer {
    consumer: Arc<StreamConsumer>,
    group: String,
    timeout: Duration,
    batch_linger: Duration,
}

impl RedpandaConsumer {
    /// Create a consumer in `group` subscribed to `topics`.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError::Configuration`] if the client cannot be created
    /// or the subscription is rejected.
    pub fn new(config: &RedpandaConfig, group: &str, topics: &[&str]) -> Result<Self, TopicError> {
        if group.trim().is_empty() {
            return Err(TopicError::Configuration("Consumer group is empty".to_string()));
        }

        let consumer: StreamConsumer = config
            .consumer_config(group)
            .create()
            .map_err(|e| TopicError::Configuration(format!("Failed to create consumer: {e}")))?;

        consumer
            .subscribe(topics)
            .map_err(|e| TopicError::Configuration(format!("Failed to subscribe to {topics:?}: {e}")))?;

        tracing::info!(
            topics = ?topics,
            consumer_group = %group,
            manual_commit = true,
            "Subscribed to topics"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            group: group.to_string(),
            timeout: config.timeout(),
            batch_linger: Duration::from_millis(20),
        })
    }

    /// How long to wait for each further message once a batch has started.
    ///
    /// Default: 20ms
    #[must_use]
    pub const fn with_batch_linger(mut self, linger: Duration) -> Self {
        self.batch_linger = linger;
        self
    }

    /// Consumer group this consumer belongs to.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    async fn next_message(&self, wait: Duration) -> Result<Option<ConsumedMessage>, TopicError> {
        let Ok(received) = tokio::time::timeout(wait, self.consumer.recv()).await else {
            return Ok(None);
        };

        let message = received.map_err(|e| from_kafka(&e, "", self.timeout, Operation::Consume))?;
        Ok(Some(ConsumedMessage {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(<[u8]>::to_vec),
            payload: message.payload().map(<[u8]>::to_vec),
        }))
    }
}

/// Offsets list for a commit, keeping the highest offset per partition.
fn commit_list(offsets: &[PartitionOffset]) -> Result<TopicPartitionList, TopicError> {
    let mut highest: BTreeMap<(&str, i32), i64> = BTreeMap::new();
    for position in offsets {
        let entry = highest
            .entry((position.topic.as_str(), position.partition))
            .or_insert(position.offset);
        *entry = (*entry).max(position.offset);
    }

    let mut list = TopicPartitionList::new();
    for ((topic, partition), offset) in highest {
        list.add_partition_offset(topic, partition, Offset::Offset(offset))
            .map_err(|e| TopicError::OffsetFailed(format!("{topic}/{partition}: {e}")))?;
    }
    Ok(list)
}

impl TopicConsumer for RedpandaConsumer {
    fn poll_batch(
        &self,
        max_messages: usize,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ConsumedMessage>, TopicError>> + Send + '_>> {
        Box::pin(async move {
            let mut batch = Vec::new();
            if max_messages == 0 {
                return Ok(batch);
            }

            let Some(first) = self.next_message(timeout).await? else {
                return Ok(batch);
            };
            batch.push(first);

            while batch.len() < max_messages {
                match self.next_message(self.batch_linger).await {
                    Ok(Some(message)) => batch.push(message),
                    Ok(None) => break,
                    // The messages already read are still handed out; the
                    // error surfaces on the next poll if it persists.
                    Err(e) => {
                        tracing::warn!(error = %e, "Receive failed while filling batch");
                        break;
                    }
                }
            }

            tracing::trace!(consumer_group = %self.group, messages = batch.len(), "Polled batch");
            Ok(batch)
        })
    }

    fn commit(
        &self,
        offsets: &[PartitionOffset],
    ) -> Pin<Box<dyn Future<Output = Result<(), TopicError>> + Send + '_>> {
        let list = commit_list(offsets);

        Box::pin(async move {
            let list = list?;
            if list.count() == 0 {
                return Ok(());
            }
            self.consumer
                .commit(&list, CommitMode::Async)
                .map_err(|e| from_kafka(&e, "", self.timeout, Operation::Offsets))?;
            tracing::debug!(consumer_group = %self.group, partitions = list.count(), "Committed offsets");
            Ok(())
        })
    }

    fn seek(
        &self,
        position: &PartitionOffset,
    ) -> Pin<Box<dyn Future<Output = Result<(), TopicError>> + Send + '_>> {
        let position = position.clone();
        let consumer = Arc::clone(&self.consumer);
        let timeout = self.timeout;

        Box::pin(async move {
            let topic = position.topic.clone();
            // librdkafka's seek blocks until the fetcher acknowledges.
            tokio::task::spawn_blocking(move || {
                consumer.seek(&position.topic, position.partition, Offset::Offset(position.offset), timeout)
            })
            .await
            .map_err(|e| TopicError::OffsetFailed(format!("seek task failed: {e}")))?
            .map_err(|e| from_kafka(&e, &topic, timeout, Operation::Offsets))
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn position(partition: i32, offset: i64) -> PartitionOffset {
        PartitionOffset {
            topic: "raffle-entries".into(),
            partition,
            offset,
        }
    }

    #[test]
    fn commit_list_keeps_highest_offset_per_partition() {
        let list = commit_list(&[position(0, 5), position(1, 2), position(0, 3), position(0, 9)]).unwrap();

        assert_eq!(list.count(), 2);
        let p0 = list.find_partition("raffle-entries", 0).unwrap();
        assert_eq!(p0.offset(), Offset::Offset(9));
        let p1 = list.find_partition("raffle-entries", 1).unwrap();
        assert_eq!(p1.offset(), Offset::Offset(2));
    }

    #[test]
    fn empty_commit_list() {
        assert_eq!(commit_list(&[]).unwrap().count(), 0);
    }

    #[test]
    fn blank_group_is_rejected() {
        let config = RedpandaConfig::builder().brokers("localhost:9092").build().unwrap();
        let result = RedpandaConsumer::new(&config, "  ", &["raffle-entries"]);
        assert!(matches!(result, Err(TopicError::Configuration(_))));
    }

    #[test]
    fn consumer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RedpandaConsumer>();
    }
}
