//! Change capture relay: entry store change stream → durable topic.
//!
//! The relay reads change batches, forwards every `CREATE` record as one keyed
//! message and only then acknowledges the batch checkpoint. Anything that goes
//! wrong before the acknowledgement leaves the batch to be redelivered, so
//! forwarding is at-least-once and duplicates are expected downstream.
//!
//! ```text
//! next_batch ──► for each record ──► CREATE? ──► append (retry, timeout)
//!                                      │ no
//!                                      └──► filtered
//!            ◄── acknowledge(checkpoint) once every append is acked
//! ```
//!
//! The relay never writes to the entry store.

use crate::metrics::RelayMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use raffle_core::change::{ChangeBatch, ChangeStream, ChangeStreamError, StreamCheckpoint};
use raffle_core::entry::EntryId;
use raffle_core::message::EntryMessage;
use raffle_core::topic::{Delivery, TopicError, TopicProducer};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Errors that stop a batch from being acknowledged.
#[derive(Error, Debug, Clone)]
pub enum RelayError {
    /// Reading or acknowledging the change stream failed.
    #[error("Change stream error: {0}")]
    Stream(#[from] ChangeStreamError),

    /// An append was still failing after the retry budget.
    #[error("Failed to forward entry {entry_id}: {source}")]
    ForwardFailed {
        /// Entry whose message could not be appended
        entry_id: EntryId,
        /// Last append error
        source: TopicError,
    },
}

/// Relay settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Topic to forward creation events to.
    pub topic: String,
    /// Maximum change records fetched per batch.
    pub batch_size: usize,
    /// Pause between polls of an idle stream.
    pub poll_interval: Duration,
    /// Pause after a failed batch before it is fetched again.
    pub retry_delay: Duration,
    /// Bound on a single append; a timed out append counts as failed.
    pub append_timeout: Duration,
    /// Retries around each append.
    pub retry_policy: RetryPolicy,
}

impl RelayConfig {
    /// Defaults for `topic`.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            batch_size: 100,
            poll_interval: Duration::from_millis(500),
            retry_delay: Duration::from_secs(5),
            append_timeout: Duration::from_secs(10),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Set the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the idle poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the delay after a failed batch.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the per-append timeout.
    #[must_use]
    pub const fn with_append_timeout(mut self, timeout: Duration) -> Self {
        self.append_timeout = timeout;
        self
    }

    /// Set the append retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

/// Outcome of one forwarded batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Creation records appended to the topic.
    pub forwarded: usize,
    /// Records dropped because they are not creations.
    pub filtered: usize,
    /// Creation records without a usable snapshot.
    pub skipped: usize,
    /// Checkpoint acknowledged after the batch, if it was acknowledged.
    pub checkpoint: Option<StreamCheckpoint>,
}

/// The relay worker.
pub struct Relay {
    stream: Arc<dyn ChangeStream>,
    producer: Arc<dyn TopicProducer>,
    config: RelayConfig,
}

impl Relay {
    /// Create a relay from `stream` to `producer`.
    #[must_use]
    pub fn new(stream: Arc<dyn ChangeStream>, producer: Arc<dyn TopicProducer>, config: RelayConfig) -> Self {
        Self {
            stream,
            producer,
            config,
        }
    }

    /// Relay settings.
    #[must_use]
    pub const fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Forward every creation record of `batch`. Does not acknowledge.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ForwardFailed`] at the first record whose append
    /// fails after retries; later records are not attempted.
    pub async fn forward_batch(&self, batch: &ChangeBatch) -> Result<RelayReport, RelayError> {
        let mut report = RelayReport::default();

        for record in &batch.records {
            if !record.kind.is_creation() {
                tracing::debug!(
                    sequence = record.sequence,
                    kind = %record.kind,
                    entry_id = %record.entry_id,
                    "Filtered non-creation change"
                );
                report.filtered += 1;
                continue;
            }

            let Some(snapshot) = record.new_snapshot.as_ref() else {
                tracing::error!(
                    sequence = record.sequence,
                    entry_id = %record.entry_id,
                    "Creation change carries no snapshot, entry will never be decided"
                );
                RelayMetrics::record_skipped();
                report.skipped += 1;
                continue;
            };

            let message = match EntryMessage::for_entry(snapshot) {
                Ok(message) => message,
                Err(e) => {
                    tracing::error!(
                        sequence = record.sequence,
                        entry_id = %record.entry_id,
                        error = %e,
                        "Creation snapshot cannot be encoded, entry will never be decided"
                    );
                    RelayMetrics::record_skipped();
                    report.skipped += 1;
                    continue;
                }
            };

            let delivery = self
                .append_with_retry(&message)
                .await
                .map_err(|source| RelayError::ForwardFailed {
                    entry_id: message.key.clone(),
                    source,
                })?;

            tracing::debug!(
                entry_id = %message.key,
                topic = %self.config.topic,
                partition = delivery.partition,
                offset = delivery.offset,
                "Forwarded creation event"
            );
            RelayMetrics::record_forwarded();
            report.forwarded += 1;
        }

        RelayMetrics::record_filtered(report.filtered);
        Ok(report)
    }

    async fn append_with_retry(&self, message: &EntryMessage) -> Result<Delivery, TopicError> {
        let topic = self.config.topic.as_str();
        let timeout = self.config.append_timeout;

        retry_with_predicate(
            &self.config.retry_policy,
            "topic_append",
            || async move {
                let result = match tokio::time::timeout(
                    timeout,
                    self.producer.append(topic, &message.key, &message.value),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(TopicError::Timeout {
                        topic: topic.to_string(),
                        timeout,
                    }),
                };
                if result.is_err() {
                    RelayMetrics::record_append_failure();
                }
                result
            },
            TopicError::is_transient,
        )
        .await
    }

    /// Fetch, forward and acknowledge one batch.
    ///
    /// Returns `Ok(None)` when the stream has nothing new.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError`] if the batch could not be fully forwarded or
    /// acknowledged; it will be returned again by the stream.
    pub async fn process_next(&self) -> Result<Option<RelayReport>, RelayError> {
        let Some(batch) = self.stream.next_batch(self.config.batch_size.max(1)).await? else {
            return Ok(None);
        };

        let mut report = self.forward_batch(&batch).await?;

        retry_with_predicate(
            &self.config.retry_policy,
            "stream_acknowledge",
            || self.stream.acknowledge(batch.checkpoint),
            ChangeStreamError::is_transient,
        )
        .await?;

        report.checkpoint = Some(batch.checkpoint);
        tracing::debug!(
            checkpoint = batch.checkpoint.sequence(),
            forwarded = report.forwarded,
            filtered = report.filtered,
            skipped = report.skipped,
            "Acknowledged change batch"
        );
        Ok(Some(report))
    }

    /// Relay until `shutdown` turns `true` (or its sender is dropped).
    ///
    /// An in-flight batch is abandoned on shutdown without acknowledgement.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            topic = %self.config.topic,
            batch_size = self.config.batch_size,
            "Change relay started"
        );

        while !*shutdown.borrow() {
            let result = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                result = self.process_next() => result,
            };

            let pause = match result {
                Ok(Some(report)) => {
                    if report.forwarded > 0 {
                        tracing::info!(
                            forwarded = report.forwarded,
                            filtered = report.filtered,
                            skipped = report.skipped,
                            "Relayed change batch"
                        );
                    }
                    None
                }
                Ok(None) => Some(self.config.poll_interval),
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        retry_in_ms = u64::try_from(self.config.retry_delay.as_millis()).unwrap_or(u64::MAX),
                        "Change batch not acknowledged, will be redelivered"
                    );
                    Some(self.config.retry_delay)
                }
            };

            if let Some(pause) = pause {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    () = tokio::time::sleep(pause) => {}
                }
            }
        }

        tracing::info!(topic = %self.config.topic, "Change relay stopped");
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use raffle_core::change::{ChangeKind, ChangeRecord};
    use raffle_core::entry::Entry;
    use raffle_core::entry_store::EntryStore;
    use raffle_core::environment::Clock;
    use raffle_core::topic::TopicSpec;
    use raffle_testing::{InMemoryBroker, InMemoryEntryStore, LevelCounter, test_clock};

    const TOPIC: &str = "raffle-entries";

    fn config() -> RelayConfig {
        RelayConfig::new(TOPIC)
            .with_retry_policy(
                RetryPolicy::builder()
                    .max_retries(3)
                    .initial_delay(Duration::from_millis(1))
                    .build(),
            )
            .with_append_timeout(Duration::from_millis(50))
    }

    fn entry(id: &str) -> Entry {
        Entry::new(EntryId::new(id), "Ada", test_clock().now())
    }

    #[tokio::test]
    async fn forwards_creations_and_filters_the_rest() {
        let broker = InMemoryBroker::new().with_topic(&TopicSpec::new(TOPIC));
        let relay = Relay::new(
            Arc::new(InMemoryEntryStore::new().change_stream()),
            Arc::new(broker.clone()),
            config(),
        );
        let batch = ChangeBatch::from_records(vec![
            ChangeRecord::created(1, entry("E1")),
            ChangeRecord {
                sequence: 2,
                kind: ChangeKind::Modify,
                entry_id: EntryId::new("E1"),
                new_snapshot: Some(Entry {
                    winner: Some(true),
                    ..entry("E1")
                }),
            },
            ChangeRecord {
                sequence: 3,
                kind: ChangeKind::Delete,
                entry_id: EntryId::new("E0"),
                new_snapshot: None,
            },
        ])
        .unwrap();

        let report = relay.forward_batch(&batch).await.unwrap();

        assert_eq!(report.forwarded, 1);
        assert_eq!(report.filtered, 2);
        let messages = broker.messages(TOPIC);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key.as_deref(), Some(&b"E1"[..]));
        assert_eq!(messages[0].decode().unwrap(), entry("E1"));
    }

    #[tokio::test]
    async fn creation_without_snapshot_is_skipped_loudly() {
        let errors = LevelCounter::new(tracing::Level::ERROR);
        let _guard = errors.install();
        let broker = InMemoryBroker::new().with_topic(&TopicSpec::new(TOPIC));
        let relay = Relay::new(
            Arc::new(InMemoryEntryStore::new().change_stream()),
            Arc::new(broker.clone()),
            config(),
        );
        let batch = ChangeBatch::from_records(vec![ChangeRecord {
            sequence: 1,
            kind: ChangeKind::Create,
            entry_id: EntryId::new("E1"),
            new_snapshot: None,
        }])
        .unwrap();

        let report = relay.forward_batch(&batch).await.unwrap();

        assert_eq!(report.skipped, 1);
        assert!(broker.messages(TOPIC).is_empty());
        assert_eq!(errors.count(), 1);
    }

    #[tokio::test]
    async fn transient_append_failure_is_retried() {
        let store = InMemoryEntryStore::new();
        let broker = InMemoryBroker::new().with_topic(&TopicSpec::new(TOPIC));
        let relay = Relay::new(Arc::new(store.change_stream()), Arc::new(broker.clone()), config());
        store.create_entry(entry("E1")).await.unwrap();
        broker.fail_next_appends(1);

        let report = relay.process_next().await.unwrap().unwrap();

        assert_eq!(report.forwarded, 1);
        assert_eq!(broker.append_calls(), 2);
        assert_eq!(broker.messages(TOPIC).len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_leave_batch_unacknowledged() {
        let store = InMemoryEntryStore::new();
        let stream = store.change_stream();
        let broker = InMemoryBroker::new().with_topic(&TopicSpec::new(TOPIC));
        let relay = Relay::new(Arc::new(stream.clone()), Arc::new(broker.clone()), config());
        store.create_entry(entry("E1")).await.unwrap();
        broker.fail_next_appends(10);

        let result = relay.process_next().await;

        assert!(matches!(result, Err(RelayError::ForwardFailed { .. })));
        assert_eq!(stream.acknowledged(), StreamCheckpoint(0));
        assert_eq!(broker.append_calls(), 4);
    }

    #[tokio::test]
    async fn timed_out_append_counts_as_failed() {
        let store = InMemoryEntryStore::new();
        let broker = InMemoryBroker::new().with_topic(&TopicSpec::new(TOPIC));
        let relay = Relay::new(
            Arc::new(store.change_stream()),
            Arc::new(broker.clone()),
            config().with_retry_policy(RetryPolicy::no_retry()),
        );
        store.create_entry(entry("E1")).await.unwrap();
        broker.set_append_latency(Duration::from_millis(500));

        let result = relay.process_next().await;

        match result {
            Err(RelayError::ForwardFailed { source, .. }) => {
                assert!(matches!(source, TopicError::Timeout { .. }));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn idle_stream_returns_none() {
        let broker = InMemoryBroker::new().with_topic(&TopicSpec::new(TOPIC));
        let relay = Relay::new(
            Arc::new(InMemoryEntryStore::new().change_stream()),
            Arc::new(broker),
            config(),
        );
        assert!(relay.process_next().await.unwrap().is_none());
    }
}
