//! In-memory partitioned broker.
//!
//! [`InMemoryBroker`] implements [`TopicProducer`] and [`TopicAdmin`];
//! [`InMemoryConsumer`] implements [`TopicConsumer`] for one consumer group.
//! Keys are routed with the same murmur2 partitioner the Kafka producer is
//! configured with, committed offsets live on the broker (so a new consumer
//! in the same group resumes where the last one committed), and failures can
//! be injected on appends and topic creation.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Only panics on a poisoned lock

use raffle_core::entry::EntryId;
use raffle_core::message::{ConsumedMessage, partition_for_key};
use raffle_core::topic::{
    Delivery, PartitionOffset, TopicAdmin, TopicConsumer, TopicError, TopicProducer, TopicSpec,
};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
struct StoredMessage {
    key: Vec<u8>,
    value: Vec<u8>,
}

#[derive(Debug, Default)]
struct BrokerState {
    /// topic -> partitions -> messages (index = offset)
    topics: BTreeMap<String, Vec<Vec<StoredMessage>>>,
    /// (group, topic, partition) -> next offset to read
    committed: HashMap<(String, String, i32), i64>,
    failing_appends: usize,
    append_latency: Option<Duration>,
    append_calls: usize,
    list_calls: usize,
    create_calls: usize,
    race_next_create: bool,
    failing_lists: usize,
}

/// In-memory broker for fast, deterministic pipeline tests.
///
/// Clones share the same topics.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    /// Create a broker with no topics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `spec` up front (builder style).
    #[must_use]
    pub fn with_topic(self, spec: &TopicSpec) -> Self {
        self.insert_topic(spec);
        self
    }

    fn insert_topic(&self, spec: &TopicSpec) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.topics.contains_key(&spec.name) {
            return false;
        }
        let partitions = usize::try_from(spec.partitions.max(1)).unwrap_or(1);
        state.topics.insert(spec.name.clone(), vec![Vec::new(); partitions]);
        true
    }

    /// A consumer in `group` subscribed to `topics`.
    ///
    /// It starts from the group's committed offsets (or the beginning).
    #[must_use]
    pub fn consumer(&self, group: impl Into<String>, topics: &[&str]) -> InMemoryConsumer {
        InMemoryConsumer {
            broker: self.clone(),
            group: group.into(),
            topics: topics.iter().map(|t| (*t).to_string()).collect(),
            positions: Mutex::new(HashMap::new()),
        }
    }

    /// Names of existing topics.
    #[must_use]
    pub fn topic_names(&self) -> Vec<String> {
        self.state.lock().unwrap().topics.keys().cloned().collect()
    }

    /// Partition count of a topic.
    #[must_use]
    pub fn partition_count(&self, topic: &str) -> Option<usize> {
        self.state.lock().unwrap().topics.get(topic).map(Vec::len)
    }

    /// All messages of a topic, partition by partition.
    #[must_use]
    pub fn messages(&self, topic: &str) -> Vec<ConsumedMessage> {
        let state = self.state.lock().unwrap();
        let Some(partitions) = state.topics.get(topic) else {
            return Vec::new();
        };
        partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, log)| {
                log.iter()
                    .enumerate()
                    .map(move |(offset, m)| to_consumed(topic, partition, offset, m))
            })
            .collect()
    }

    /// Messages of one partition in offset order.
    #[must_use]
    pub fn partition_messages(&self, topic: &str, partition: i32) -> Vec<ConsumedMessage> {
        self.messages(topic)
            .into_iter()
            .filter(|m| m.partition == partition)
            .collect()
    }

    /// Append a raw message with arbitrary key and value, bypassing failure
    /// injection. Useful for planting poison messages.
    pub fn inject_raw(&self, topic: &str, key: Option<&[u8]>, value: &[u8]) -> Result<Delivery, TopicError> {
        let mut state = self.state.lock().unwrap();
        store_message(&mut state, topic, key.unwrap_or_default(), value)
    }

    /// Committed offset (next offset to read) of a group on one partition.
    #[must_use]
    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.state
            .lock()
            .unwrap()
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// Make the next `count` appends fail with [`TopicError::Unavailable`].
    pub fn fail_next_appends(&self, count: usize) {
        self.state.lock().unwrap().failing_appends = count;
    }

    /// Delay every append by `latency` before acknowledging it.
    pub fn set_append_latency(&self, latency: Duration) {
        self.state.lock().unwrap().append_latency = Some(latency);
    }

    /// Remove any append latency.
    pub fn clear_append_latency(&self) {
        self.state.lock().unwrap().append_latency = None;
    }

    /// Make the next `count` topic listings fail with [`TopicError::Unavailable`].
    pub fn fail_next_lists(&self, count: usize) {
        self.state.lock().unwrap().failing_lists = count;
    }

    /// Simulate another initializer creating the topic between our list and
    /// our create: the next create succeeds on the broker but reports
    /// [`TopicError::TopicAlreadyExists`].
    pub fn race_next_create(&self) {
        self.state.lock().unwrap().race_next_create = true;
    }

    /// Number of append attempts, failed ones included.
    #[must_use]
    pub fn append_calls(&self) -> usize {
        self.state.lock().unwrap().append_calls
    }

    /// Number of `list_topics` calls.
    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.state.lock().unwrap().list_calls
    }

    /// Number of `create_topic` calls.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }
}

fn to_consumed(topic: &str, partition: usize, offset: usize, message: &StoredMessage) -> ConsumedMessage {
    ConsumedMessage {
        topic: topic.to_string(),
        partition: i32::try_from(partition).unwrap_or(i32::MAX),
        offset: i64::try_from(offset).unwrap_or(i64::MAX),
        key: (!message.key.is_empty()).then(|| message.key.clone()),
        payload: Some(message.value.clone()),
    }
}

fn store_message(state: &mut BrokerState, topic: &str, key: &[u8], value: &[u8]) -> Result<Delivery, TopicError> {
    let partitions = state
        .topics
        .get_mut(topic)
        .ok_or_else(|| TopicError::UnknownTopic(topic.to_string()))?;
    let count = u32::try_from(partitions.len()).unwrap_or(1);
    let partition = partition_for_key(key, count);
    let log = &mut partitions[usize::try_from(partition).unwrap_or(0)];
    log.push(StoredMessage {
        key: key.to_vec(),
        value: value.to_vec(),
    });
    Ok(Delivery {
        partition,
        offset: i64::try_from(log.len() - 1).unwrap_or(i64::MAX),
    })
}

impl TopicProducer for InMemoryBroker {
    fn append(
        &self,
        topic: &str,
        key: &EntryId,
        value: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<Delivery, TopicError>> + Send + '_>> {
        let topic = topic.to_string();
        let key = key.as_bytes().to_vec();
        let value = value.to_vec();

        Box::pin(async move {
            let latency = {
                let mut state = self.state.lock().unwrap();
                state.append_calls += 1;
                if state.failing_appends > 0 {
                    state.failing_appends -= 1;
                    return Err(TopicError::Unavailable("injected append failure".to_string()));
                }
                state.append_latency
            };

            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            let mut state = self.state.lock().unwrap();
            store_message(&mut state, &topic, &key, &value)
        })
    }
}

impl TopicAdmin for InMemoryBroker {
    fn list_topics(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, TopicError>> + Send + '_>> {
        let result = {
            let mut state = self.state.lock().unwrap();
            state.list_calls += 1;
            if state.failing_lists > 0 {
                state.failing_lists -= 1;
                Err(TopicError::Unavailable("injected metadata failure".to_string()))
            } else {
                Ok(state.topics.keys().cloned().collect())
            }
        };
        Box::pin(async move { result })
    }

    fn create_topic(
        &self,
        spec: &TopicSpec,
    ) -> Pin<Box<dyn Future<Output = Result<(), TopicError>> + Send + '_>> {
        let raced = {
            let mut state = self.state.lock().unwrap();
            state.create_calls += 1;
            std::mem::take(&mut state.race_next_create)
        };
        let result = if let Err(e) = spec.validate() {
            Err(e)
        } else if self.insert_topic(spec) && !raced {
            Ok(())
        } else {
            Err(TopicError::TopicAlreadyExists(spec.name.clone()))
        };
        Box::pin(async move { result })
    }
}

/// Consumer-group member reading from an [`InMemoryBroker`].
#[derive(Debug)]
pub struct InMemoryConsumer {
    broker: InMemoryBroker,
    group: String,
    topics: Vec<String>,
    /// (topic, partition) -> next offset to read
    positions: Mutex<HashMap<(String, i32), i64>>,
}

impl InMemoryConsumer {
    /// Consumer group this member belongs to.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    fn take_batch(&self, max_messages: usize) -> Vec<ConsumedMessage> {
        let state = self.broker.state.lock().unwrap();
        let mut positions = self.positions.lock().unwrap();

        // One cursor per subscribed partition, starting at the local position,
        // else the group's committed offset, else the beginning.
        let mut cursors: Vec<(String, i32, &Vec<StoredMessage>, i64)> = Vec::new();
        for topic in &self.topics {
            let Some(partitions) = state.topics.get(topic) else {
                continue;
            };
            for (index, log) in partitions.iter().enumerate() {
                let partition = i32::try_from(index).unwrap_or(i32::MAX);
                let start = positions.get(&(topic.clone(), partition)).copied().unwrap_or_else(|| {
                    state
                        .committed
                        .get(&(self.group.clone(), topic.clone(), partition))
                        .copied()
                        .unwrap_or(0)
                });
                cursors.push((topic.clone(), partition, log, start));
            }
        }

        // Round-robin across partitions so none starves; order within a
        // partition is offset order.
        let mut batch = Vec::new();
        let mut progressed = true;
        while batch.len() < max_messages && progressed {
            progressed = false;
            for (topic, partition, log, next) in &mut cursors {
                if batch.len() >= max_messages {
                    break;
                }
                let Ok(index) = usize::try_from(*next) else {
                    continue;
                };
                if let Some(message) = log.get(index) {
                    batch.push(to_consumed(topic, usize::try_from(*partition).unwrap_or(0), index, message));
                    *next += 1;
                    progressed = true;
                }
            }
        }

        for (topic, partition, _, next) in cursors {
            positions.insert((topic, partition), next);
        }
        batch
    }
}

impl TopicConsumer for InMemoryConsumer {
    fn poll_batch(
        &self,
        max_messages: usize,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ConsumedMessage>, TopicError>> + Send + '_>> {
        Box::pin(async move {
            let batch = self.take_batch(max_messages.max(1));
            if batch.is_empty() {
                // Nothing buffered: behave like a broker long-poll that times out.
                tokio::time::sleep(timeout.min(Duration::from_millis(10))).await;
            }
            Ok(batch)
        })
    }

    fn commit(
        &self,
        offsets: &[PartitionOffset],
    ) -> Pin<Box<dyn Future<Output = Result<(), TopicError>> + Send + '_>> {
        {
            let mut state = self.broker.state.lock().unwrap();
            for position in offsets {
                state.committed.insert(
                    (self.group.clone(), position.topic.clone(), position.partition),
                    position.offset,
                );
            }
        }
        Box::pin(async { Ok(()) })
    }

    fn seek(
        &self,
        position: &PartitionOffset,
    ) -> Pin<Box<dyn Future<Output = Result<(), TopicError>> + Send + '_>> {
        self.positions
            .lock()
            .unwrap()
            .insert((position.topic.clone(), position.partition), position.offset);
        Box::pin(async { Ok(()) })
    }
}
