//! Keyed appends through a librdkafka `FutureProducer`.

use crate::config::RedpandaConfig;
use crate::error::{Operation, from_kafka};
use raffle_core::entry::EntryId;
use raffle_core::topic::{Delivery, TopicError, TopicProducer};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// [`TopicProducer`] backed by Redpanda.
///
/// The entry id is the message key, so every message about one entry lands
/// on the same partition.
pub struct RedpandaProducer {
    producer: FutureProducer,
    timeout: Duration,
}

impl RedpandaProducer {
    /// Create a producer.
    ///
    /// librdkafka connects in the background, so this does not fail on an
    /// unreachable cluster; the first append does.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError::Configuration`] if librdkafka rejects the settings.
    pub fn new(config: &RedpandaConfig) -> Result<Self, TopicError> {
        let producer: FutureProducer = config
            .producer_config()
            .create()
            .map_err(|e| TopicError::Configuration(format!("Failed to create producer: {e}")))?;

        tracing::info!(brokers = %config.brokers(), "Redpanda producer created");

        Ok(Self {
            producer,
            timeout: config.timeout(),
        })
    }
}

impl TopicProducer for RedpandaProducer {
    fn append(
        &self,
        topic: &str,
        key: &EntryId,
        value: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<Delivery, TopicError>> + Send + '_>> {
        let topic = topic.to_string();
        let key = key.clone();
        let value = value.to_vec();

        Box::pin(async move {
            let record = FutureRecord::to(&topic).key(key.as_str()).payload(&value);

            match self.producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        entry_id = %key,
                        partition = partition,
                        offset = offset,
                        "Message appended"
                    );
                    Ok(Delivery { partition, offset })
                }
                Err((kafka_error, _)) => {
                    tracing::warn!(
                        topic = %topic,
                        entry_id = %key,
                        error = %kafka_error,
                        "Append failed"
                    );
                    Err(from_kafka(&kafka_error, &topic, self.timeout, Operation::Publish))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RedpandaProducer>();
    }
}
