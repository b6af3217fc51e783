//! Winner selection consumer.
//!
//! Reads entry-creation messages from the topic, draws a winner outcome for
//! every undecided entry and persists it with the store's conditional update.
//!
//! # Delivery Model
//!
//! Messages arrive at least once. Each message goes through:
//!
//! 1. **Decode**: key and JSON snapshot; failure → poison, skipped
//! 2. **Check**: read the entry; already decided → skipped; missing → poison
//! 3. **Decide**: apply the [`Decision`]
//! 4. **Persist**: `update_winner`, which only writes while `winner` is unset
//!
//! Store calls are retried with backoff. When the budget runs out the
//! partition stops at that message: offsets are committed up to the last
//! handled message and the partition is rewound so the failed message and
//! everything after it are read again. Other partitions of the batch are not
//! affected.
//!
//! Partitions are processed concurrently; messages within one partition
//! strictly in offset order.

use crate::metrics::ConsumerMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use futures::stream::{self, StreamExt};
use raffle_core::decision::Decision;
use raffle_core::entry::EntryId;
use raffle_core::entry_store::{EntryStore, EntryStoreError, WinnerUpdate};
use raffle_core::environment::{Clock, SystemClock};
use raffle_core::message::ConsumedMessage;
use raffle_core::poison::{PoisonReport, PoisonSink};
use raffle_core::topic::{PartitionOffset, TopicConsumer, TopicError};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;

/// Errors that abort a whole batch.
///
/// Per-message failures never surface here; they are either poison or leave
/// their partition for redelivery.
#[derive(Error, Debug, Clone)]
pub enum ConsumerError {
    /// Polling, committing or seeking failed.
    #[error("Topic error: {0}")]
    Topic(#[from] TopicError),
}

/// Consumer settings.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Maximum messages per poll.
    pub max_batch_size: usize,
    /// How long a poll waits for the first message.
    pub poll_timeout: Duration,
    /// Partitions processed at the same time.
    pub concurrency: usize,
    /// Retries around each store call.
    pub retry_policy: RetryPolicy,
    /// Pause before polling again after a partition was rewound or a poll failed.
    pub retry_delay: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            poll_timeout: Duration::from_secs(1),
            concurrency: 4,
            retry_policy: RetryPolicy::default(),
            retry_delay: Duration::from_secs(1),
        }
    }
}

impl ConsumerConfig {
    /// Set the maximum batch size.
    #[must_use]
    pub const fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Set the poll timeout.
    #[must_use]
    pub const fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set partition concurrency.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Set the store retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the delay before re-polling after a failure.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

/// What happened to one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The draw was made and persisted by this consumer.
    Decided {
        /// Entry decided
        entry_id: EntryId,
        /// Outcome written
        winner: bool,
    },
    /// The entry was already decided when read; nothing drawn.
    AlreadyDecided {
        /// Entry skipped
        entry_id: EntryId,
        /// Outcome found in the store
        winner: bool,
    },
    /// A concurrent delivery persisted its outcome first; ours was discarded.
    LostRace {
        /// Entry involved
        entry_id: EntryId,
        /// Outcome that stuck
        winner: bool,
    },
    /// Skipped as poison.
    Poisoned {
        /// Why
        reason: String,
    },
}

impl MessageOutcome {
    /// Label used for the `consumer_messages_total` metric.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Decided { .. } => "decided",
            Self::AlreadyDecided { .. } => "already_decided",
            Self::LostRace { .. } => "lost_race",
            Self::Poisoned { .. } => "poison",
        }
    }
}

/// Summary of one processed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Outcomes of every handled message, partition by partition.
    pub outcomes: Vec<MessageOutcome>,
    /// Messages left for redelivery (failed, or after a failure or shutdown).
    pub deferred: usize,
    /// Positions committed for this batch.
    pub committed: Vec<PartitionOffset>,
    /// Partitions rewound to their first unhandled message.
    pub rewound: Vec<PartitionOffset>,
    /// Whether shutdown interrupted the batch.
    pub interrupted: bool,
}

impl BatchReport {
    /// Number of handled messages with the given outcome label.
    #[must_use]
    pub fn count(&self, label: &str) -> usize {
        self.outcomes.iter().filter(|o| o.label() == label).count()
    }
}

#[derive(Debug, Default)]
struct PartitionResult {
    outcomes: Vec<MessageOutcome>,
    commit: Option<PartitionOffset>,
    rewind: Option<PartitionOffset>,
    deferred: usize,
    interrupted: bool,
}

/// Store call that failed for good; the message stays unacknowledged.
#[derive(Debug)]
struct Unhandled(EntryStoreError);

/// The winner selection worker.
pub struct WinnerConsumer {
    consumer: Arc<dyn TopicConsumer>,
    store: Arc<dyn EntryStore>,
    decision: Arc<dyn Decision>,
    poison: Arc<dyn PoisonSink>,
    clock: Arc<dyn Clock>,
    config: ConsumerConfig,
}

impl WinnerConsumer {
    /// Create a consumer.
    #[must_use]
    pub fn new(
        consumer: Arc<dyn TopicConsumer>,
        store: Arc<dyn EntryStore>,
        decision: Arc<dyn Decision>,
        poison: Arc<dyn PoisonSink>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            consumer,
            store,
            decision,
            poison,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Clock used to timestamp poison reports.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Consumer settings.
    #[must_use]
    pub const fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Poll one batch, process it and commit.
    ///
    /// Returns an empty report when nothing arrived within the poll timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError`] if polling, committing or seeking fails.
    pub async fn poll_once(&self, shutdown: &watch::Receiver<bool>) -> Result<BatchReport, ConsumerError> {
        let messages = self
            .consumer
            .poll_batch(self.config.max_batch_size.max(1), self.config.poll_timeout)
            .await?;
        if messages.is_empty() {
            return Ok(BatchReport::default());
        }
        self.process_batch(messages, shutdown).await
    }

    /// Process an already polled batch, then commit and rewind.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError`] if committing or seeking fails.
    pub async fn process_batch(
        &self,
        messages: Vec<ConsumedMessage>,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<BatchReport, ConsumerError> {
        let started = Instant::now();
        let total = messages.len();

        let mut partitions: BTreeMap<(String, i32), Vec<ConsumedMessage>> = BTreeMap::new();
        for message in messages {
            partitions
                .entry((message.topic.clone(), message.partition))
                .or_default()
                .push(message);
        }

        let results: Vec<PartitionResult> = stream::iter(partitions.into_values())
            .map(|messages| self.process_partition(messages, shutdown))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut report = BatchReport::default();
        for result in results {
            report.outcomes.extend(result.outcomes);
            report.deferred += result.deferred;
            report.interrupted |= result.interrupted;
            report.committed.extend(result.commit);
            report.rewound.extend(result.rewind);
        }

        if !report.committed.is_empty() {
            self.consumer.commit(&report.committed).await?;
        }
        for position in &report.rewound {
            self.consumer.seek(position).await?;
            tracing::debug!(
                topic = %position.topic,
                partition = position.partition,
                offset = position.offset,
                "Rewound partition for redelivery"
            );
        }

        ConsumerMetrics::record_batch(started.elapsed());
        tracing::debug!(
            messages = total,
            handled = report.outcomes.len(),
            deferred = report.deferred,
            "Processed batch"
        );
        Ok(report)
    }

    async fn process_partition(
        &self,
        messages: Vec<ConsumedMessage>,
        shutdown: &watch::Receiver<bool>,
    ) -> PartitionResult {
        let mut result = PartitionResult::default();

        for (index, message) in messages.iter().enumerate() {
            let stopping = *shutdown.borrow();
            if stopping {
                result.interrupted = true;
                result.rewind = Some(PartitionOffset::at(message));
                result.deferred = messages.len() - index;
                break;
            }

            match self.handle_message(message).await {
                Ok(outcome) => {
                    ConsumerMetrics::record_outcome(outcome.label());
                    result.commit = Some(PartitionOffset::after(message));
                    result.outcomes.push(outcome);
                }
                Err(Unhandled(error)) => {
                    tracing::error!(
                        topic = %message.topic,
                        partition = message.partition,
                        offset = message.offset,
                        key = %message.key_lossy(),
                        error = %error,
                        "Message not handled, partition left for redelivery"
                    );
                    ConsumerMetrics::record_store_failure();
                    result.rewind = Some(PartitionOffset::at(message));
                    result.deferred = messages.len() - index;
                    break;
                }
            }
        }

        result
    }

    async fn handle_message(&self, message: &ConsumedMessage) -> Result<MessageOutcome, Unhandled> {
        let entry = match message.decode() {
            Ok(entry) => entry,
            Err(e) => return Ok(self.poison(message, e.to_string()).await),
        };

        let stored = self
            .with_retry("get_entry", || self.store.get_entry(&entry.id))
            .await?;
        let Some(stored) = stored else {
            return Ok(self.poison(message, format!("entry {} not found in store", entry.id)).await);
        };

        if let Some(winner) = stored.winner {
            tracing::debug!(entry_id = %entry.id, winner, "Entry already decided, skipping");
            return Ok(MessageOutcome::AlreadyDecided {
                entry_id: entry.id,
                winner,
            });
        }

        let outcome = self.decision.decide(&entry);

        let update = self
            .with_retry("update_winner", || self.store.update_winner(&entry.id, outcome))
            .await;

        match update {
            Ok(WinnerUpdate::Applied(_)) => {
                tracing::info!(
                    entry_id = %entry.id,
                    winner = outcome,
                    decision = self.decision.name(),
                    partition = message.partition,
                    offset = message.offset,
                    "Winner decided"
                );
                Ok(MessageOutcome::Decided {
                    entry_id: entry.id,
                    winner: outcome,
                })
            }
            Ok(WinnerUpdate::AlreadySet(winner)) => {
                tracing::debug!(
                    entry_id = %entry.id,
                    winner,
                    discarded = outcome,
                    "Concurrent delivery decided first"
                );
                Ok(MessageOutcome::LostRace {
                    entry_id: entry.id,
                    winner,
                })
            }
            Err(Unhandled(EntryStoreError::NotFound(id))) => {
                Ok(self.poison(message, format!("entry {id} disappeared before update")).await)
            }
            Err(unhandled) => Err(unhandled),
        }
    }

    async fn with_retry<F, Fut, T>(&self, operation: &'static str, call: F) -> Result<T, Unhandled>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, EntryStoreError>>,
    {
        retry_with_predicate(&self.config.retry_policy, operation, call, EntryStoreError::is_transient)
            .await
            .map_err(Unhandled)
    }

    async fn poison(&self, message: &ConsumedMessage, reason: String) -> MessageOutcome {
        tracing::warn!(
            topic = %message.topic,
            partition = message.partition,
            offset = message.offset,
            key = %message.key_lossy(),
            reason = %reason,
            "Poison message"
        );
        ConsumerMetrics::record_poison();
        self.poison
            .report(PoisonReport::new(message.clone(), reason.clone(), self.clock.now()))
            .await;
        MessageOutcome::Poisoned { reason }
    }

    /// Consume until `shutdown` turns `true` (or its sender is dropped).
    ///
    /// Shutdown only cancels a poll that is still waiting. Once a batch is in
    /// hand, shutdown is checked between messages; the batch is committed up
    /// to its last handled message and the rest is redelivered on restart.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            max_batch_size = self.config.max_batch_size,
            concurrency = self.config.concurrency,
            decision = self.decision.name(),
            "Winner consumer started"
        );

        // Observed between messages while `shutdown` itself is awaited below.
        let watcher = shutdown.clone();

        while !*shutdown.borrow() {
            let messages = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                messages = self
                    .consumer
                    .poll_batch(self.config.max_batch_size.max(1), self.config.poll_timeout) => messages,
            };

            let polled = match messages {
                Ok(messages) if messages.is_empty() => Ok(BatchReport::default()),
                Ok(messages) => self.process_batch(messages, &watcher).await,
                Err(e) => Err(e.into()),
            };

            let backoff = match polled {
                Ok(report) => {
                    if !report.outcomes.is_empty() {
                        tracing::info!(
                            decided = report.count("decided"),
                            already_decided = report.count("already_decided"),
                            lost_race = report.count("lost_race"),
                            poison = report.count("poison"),
                            deferred = report.deferred,
                            "Batch processed"
                        );
                    }
                    report.deferred > 0 && !report.interrupted
                }
                Err(e) => {
                    tracing::error!(error = %e, "Batch failed");
                    true
                }
            };

            if backoff {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    () = tokio::time::sleep(self.config.retry_delay) => {}
                }
            }
        }

        tracing::info!("Winner consumer stopped");
    }
}
