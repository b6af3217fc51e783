//! Integration tests for the Redpanda adapters against a real Kafka broker.
//!
//! These tests use testcontainers to spin up Kafka and validate:
//! - Topic bootstrap, including the concurrent-creation race
//! - Append/poll round trip with key routing
//! - Redelivery of uncommitted messages to a restarted consumer
//! - Seek back within an assigned partition
//!
//! # Running These Tests
//!
//! Marked `#[ignore]` because they need Docker and take a while to start
//! the broker:
//!
//! ```bash
//! cargo test -p raffle-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use raffle_core::entry::EntryId;
use raffle_core::message::{ConsumedMessage, partition_for_key};
use raffle_core::topic::{PartitionOffset, TopicAdmin, TopicConsumer, TopicError, TopicProducer, TopicSpec};
use raffle_redpanda::{RedpandaAdmin, RedpandaConfig, RedpandaConsumer, RedpandaProducer, StaticBrokers};
use raffle_runtime::{RetryPolicy, TopicStatus, ensure_topic};
use std::time::Duration;
use testcontainers::ContainerAsync;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

async fn start_kafka() -> (ContainerAsync<Kafka>, RedpandaConfig) {
    let kafka = Kafka::default().start().await.expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka.get_host_port_ipv4(KAFKA_PORT).await.expect("Failed to get port");

    let config = RedpandaConfig::builder()
        .timeout(Duration::from_secs(10))
        .discover(&StaticBrokers::new([format!("{host}:{port}")]))
        .await
        .expect("Failed to build config");

    wait_for_kafka_ready(&config).await;
    (kafka, config)
}

/// Poll cluster metadata until the broker answers.
async fn wait_for_kafka_ready(config: &RedpandaConfig) {
    let admin = RedpandaAdmin::new(config).expect("Failed to create admin client");
    for attempt in 1..=60 {
        if admin.list_topics().await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(attempt != 60, "Kafka failed to become ready");
    }
}

async fn bootstrap(config: &RedpandaConfig, spec: &TopicSpec) {
    let admin = RedpandaAdmin::new(config).expect("Failed to create admin client");
    ensure_topic(&admin, spec, &RetryPolicy::default())
        .await
        .expect("Failed to bootstrap topic");
    // Give partition leadership time to settle.
    tokio::time::sleep(Duration::from_secs(2)).await;
}

async fn drain(consumer: &RedpandaConsumer, expected: usize) -> Vec<ConsumedMessage> {
    let mut received = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while received.len() < expected && tokio::time::Instant::now() < deadline {
        let batch = consumer
            .poll_batch(100, Duration::from_secs(1))
            .await
            .expect("Failed to poll");
        received.extend(batch);
    }
    received
}

#[tokio::test]
#[ignore]
async fn bootstrap_creates_topic_once() {
    let (_kafka, config) = start_kafka().await;
    let admin = RedpandaAdmin::new(&config).expect("Failed to create admin client");
    let spec = TopicSpec::new("raffle-bootstrap").with_partitions(3);

    let first = ensure_topic(&admin, &spec, &RetryPolicy::default()).await.expect("first bootstrap");
    let second = ensure_topic(&admin, &spec, &RetryPolicy::default()).await.expect("second bootstrap");

    assert_eq!(first, TopicStatus::Created);
    assert_eq!(second, TopicStatus::Existing);

    let raced = admin.create_topic(&spec).await;
    assert!(matches!(raced, Err(TopicError::TopicAlreadyExists(_))));
}

#[tokio::test]
#[ignore]
async fn appended_entries_are_read_back_on_their_key_partition() {
    let (_kafka, config) = start_kafka().await;
    let spec = TopicSpec::new("raffle-entries").with_partitions(4);
    bootstrap(&config, &spec).await;

    let producer = RedpandaProducer::new(&config).expect("Failed to create producer");
    let mut ids = Vec::new();
    for i in 0..10 {
        let id = EntryId::new(format!("entry-{i}"));
        let delivery = producer
            .append(&spec.name, &id, format!(r#"{{"id":"entry-{i}","name":"n","timestamp":"2024-01-01T00:00:00Z"}}"#).as_bytes())
            .await
            .expect("Failed to append");
        assert_eq!(delivery.partition, partition_for_key(id.as_bytes(), spec.partitions));
        ids.push(id);
    }

    let consumer = RedpandaConsumer::new(&config, "raffle-winners", &[&spec.name]).expect("Failed to create consumer");
    let received = drain(&consumer, ids.len()).await;

    assert_eq!(received.len(), ids.len());
    for message in &received {
        let entry = message.decode().expect("Failed to decode");
        assert_eq!(message.partition, partition_for_key(entry.id.as_bytes(), spec.partitions));
    }
}

#[tokio::test]
#[ignore]
async fn uncommitted_messages_are_redelivered_to_the_group() {
    let (_kafka, config) = start_kafka().await;
    let spec = TopicSpec::new("raffle-redelivery");
    bootstrap(&config, &spec).await;

    let producer = RedpandaProducer::new(&config).expect("Failed to create producer");
    for i in 0..3 {
        producer
            .append(&spec.name, &EntryId::new(format!("E{i}")), b"{}")
            .await
            .expect("Failed to append");
    }

    {
        let consumer = RedpandaConsumer::new(&config, "raffle-crash", &[&spec.name]).expect("consumer");
        let first = drain(&consumer, 3).await;
        assert_eq!(first.len(), 3);
        // Acknowledge only the first message, then "crash".
        consumer.commit(&[PartitionOffset::after(&first[0])]).await.expect("commit");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    let restarted = RedpandaConsumer::new(&config, "raffle-crash", &[&spec.name]).expect("consumer");
    let redelivered = drain(&restarted, 2).await;

    let offsets: Vec<i64> = redelivered.iter().map(|m| m.offset).collect();
    assert_eq!(offsets, vec![1, 2]);
}

#[tokio::test]
#[ignore]
async fn seek_rewinds_an_assigned_partition() {
    let (_kafka, config) = start_kafka().await;
    let spec = TopicSpec::new("raffle-seek");
    bootstrap(&config, &spec).await;

    let producer = RedpandaProducer::new(&config).expect("Failed to create producer");
    for i in 0..2 {
        producer
            .append(&spec.name, &EntryId::new(format!("E{i}")), b"{}")
            .await
            .expect("Failed to append");
    }

    let consumer = RedpandaConsumer::new(&config, "raffle-seek", &[&spec.name]).expect("consumer");
    let first = drain(&consumer, 2).await;
    assert_eq!(first.len(), 2);

    consumer.seek(&PartitionOffset::at(&first[0])).await.expect("seek");
    let again = drain(&consumer, 2).await;

    assert_eq!(again.first().map(|m| m.offset), Some(0));
}
