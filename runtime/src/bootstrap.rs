//! Topic bootstrap: make sure the target topic exists before first use.
//!
//! [`ensure_topic`] lists the cluster's topics and creates the target when it
//! is missing. Several workers may start at once and race to create it; the
//! loser's "already exists" is treated as success.
//!
//! [`BootstrappingProducer`] runs that check lazily, once, in front of the
//! first append.

use crate::retry::{RetryPolicy, retry_with_predicate};
use crate::worker::LazyResource;
use raffle_core::entry::EntryId;
use raffle_core::topic::{Delivery, TopicAdmin, TopicError, TopicProducer, TopicSpec};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// What [`ensure_topic`] found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicStatus {
    /// The topic was already there (possibly created by a concurrent initializer).
    Existing,
    /// This call created the topic.
    Created,
}

/// Create `spec` unless it already exists.
///
/// Listing and creation are retried on transient errors.
///
/// # Errors
///
/// - [`TopicError::InvalidTopic`] for a zero partition count or replication
///   factor; this is a configuration error and is never retried
/// - any non-transient or exhausted broker error
pub async fn ensure_topic(
    admin: &dyn TopicAdmin,
    spec: &TopicSpec,
    policy: &RetryPolicy,
) -> Result<TopicStatus, TopicError> {
    spec.validate()?;

    let topics = retry_with_predicate(policy, "list_topics", || admin.list_topics(), TopicError::is_transient).await?;
    if topics.iter().any(|name| name == &spec.name) {
        tracing::debug!(topic = %spec.name, "Topic already exists");
        return Ok(TopicStatus::Existing);
    }

    let created = retry_with_predicate(
        policy,
        "create_topic",
        || admin.create_topic(spec),
        TopicError::is_transient,
    )
    .await;

    match created {
        Ok(()) => {
            tracing::info!(
                topic = %spec.name,
                partitions = spec.partitions,
                replication = spec.replication,
                "Created topic"
            );
            Ok(TopicStatus::Created)
        }
        Err(TopicError::TopicAlreadyExists(_)) => {
            tracing::info!(topic = %spec.name, "Topic created concurrently by another initializer");
            Ok(TopicStatus::Existing)
        }
        Err(e) => Err(e),
    }
}

/// Producer that bootstraps its topic before the first append.
///
/// The bootstrap result is cached in a [`LazyResource`]: it runs once, a
/// failure is not remembered, and [`BootstrappingProducer::reset`] forgets a
/// success. Appends to topics other than the bootstrapped one pass straight
/// through.
pub struct BootstrappingProducer {
    inner: Arc<dyn TopicProducer>,
    admin: Arc<dyn TopicAdmin>,
    spec: TopicSpec,
    policy: RetryPolicy,
    bootstrap: LazyResource<TopicStatus>,
}

impl BootstrappingProducer {
    /// Wrap `inner`, bootstrapping `spec` through `admin`.
    #[must_use]
    pub fn new(inner: Arc<dyn TopicProducer>, admin: Arc<dyn TopicAdmin>, spec: TopicSpec) -> Self {
        Self {
            inner,
            admin,
            spec,
            policy: RetryPolicy::default(),
            bootstrap: LazyResource::new("topic-bootstrap"),
        }
    }

    /// Retry policy for the admin calls.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The topic this producer bootstraps.
    #[must_use]
    pub const fn spec(&self) -> &TopicSpec {
        &self.spec
    }

    /// Run the bootstrap now instead of on the first append.
    ///
    /// # Errors
    ///
    /// Returns the [`ensure_topic`] error; the next call tries again.
    pub async fn ensure_ready(&self) -> Result<TopicStatus, TopicError> {
        let status = self
            .bootstrap
            .get_or_try_init(|| ensure_topic(self.admin.as_ref(), &self.spec, &self.policy))
            .await?;
        Ok(*status)
    }

    /// Forget the bootstrap result; the next append checks the topic again.
    pub async fn reset(&self) {
        self.bootstrap.teardown().await;
    }
}

impl TopicProducer for BootstrappingProducer {
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
            if topic == self.spec.name {
                self.ensure_ready().await?;
            }
            self.inner.append(&topic, &key, &value).await
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use raffle_testing::InMemoryBroker;
    use std::time::Duration;

    const TOPIC: &str = "raffle-entries";

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(3)
            .initial_delay(Duration::from_millis(1))
            .build()
    }

    #[tokio::test]
    async fn creates_missing_topic_with_configured_partitions() {
        let broker = InMemoryBroker::new();
        let spec = TopicSpec::new(TOPIC).with_partitions(3);

        let status = ensure_topic(&broker, &spec, &fast_policy()).await.unwrap();

        assert_eq!(status, TopicStatus::Created);
        assert_eq!(broker.partition_count(TOPIC), Some(3));
    }

    #[tokio::test]
    async fn existing_topic_is_left_alone() {
        let broker = InMemoryBroker::new().with_topic(&TopicSpec::new(TOPIC));

        let status = ensure_topic(&broker, &TopicSpec::new(TOPIC), &fast_policy()).await.unwrap();

        assert_eq!(status, TopicStatus::Existing);
        assert_eq!(broker.create_calls(), 0);
    }

    #[tokio::test]
    async fn lost_creation_race_counts_as_success() {
        let broker = InMemoryBroker::new();
        broker.race_next_create();

        let status = ensure_topic(&broker, &TopicSpec::new(TOPIC), &fast_policy()).await.unwrap();

        assert_eq!(status, TopicStatus::Existing);
        assert_eq!(broker.create_calls(), 1);
    }

    #[tokio::test]
    async fn zero_partitions_fails_without_touching_the_broker() {
        let broker = InMemoryBroker::new();

        let result = ensure_topic(&broker, &TopicSpec::new(TOPIC).with_partitions(0), &fast_policy()).await;

        assert!(matches!(result, Err(TopicError::InvalidTopic(_))));
        assert_eq!(broker.list_calls(), 0);
    }

    #[tokio::test]
    async fn transient_listing_failures_are_retried() {
        let broker = InMemoryBroker::new();
        broker.fail_next_lists(2);

        let status = ensure_topic(&broker, &TopicSpec::new(TOPIC), &fast_policy()).await.unwrap();

        assert_eq!(status, TopicStatus::Created);
        assert_eq!(broker.list_calls(), 3);
    }

    #[tokio::test]
    async fn producer_bootstraps_once_on_first_append() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = BootstrappingProducer::new(broker.clone(), broker.clone(), TopicSpec::new(TOPIC))
            .with_retry_policy(fast_policy());

        producer.append(TOPIC, &EntryId::new("E1"), b"{}").await.unwrap();
        producer.append(TOPIC, &EntryId::new("E2"), b"{}").await.unwrap();

        assert_eq!(broker.list_calls(), 1);
        assert_eq!(broker.messages(TOPIC).len(), 2);
    }

    #[tokio::test]
    async fn failed_bootstrap_is_retried_on_next_append() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = BootstrappingProducer::new(broker.clone(), broker.clone(), TopicSpec::new(TOPIC))
            .with_retry_policy(RetryPolicy::no_retry());
        broker.fail_next_lists(1);

        assert!(producer.append(TOPIC, &EntryId::new("E1"), b"{}").await.is_err());
        assert!(producer.append(TOPIC, &EntryId::new("E1"), b"{}").await.is_ok());
        assert_eq!(broker.list_calls(), 2);
    }

    #[tokio::test]
    async fn reset_checks_the_topic_again() {
        let broker = Arc::new(InMemoryBroker::new());
        let producer = BootstrappingProducer::new(broker.clone(), broker.clone(), TopicSpec::new(TOPIC));

        assert_eq!(producer.ensure_ready().await.unwrap(), TopicStatus::Created);
        producer.reset().await;
        assert_eq!(producer.ensure_ready().await.unwrap(), TopicStatus::Existing);
        assert_eq!(broker.list_calls(), 2);
    }
}
