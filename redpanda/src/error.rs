//! Mapping of librdkafka errors onto [`TopicError`].

use raffle_core::topic::TopicError;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use std::time::Duration;

/// What the failing call was doing, for errors with no more specific mapping.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Operation {
    Publish,
    Consume,
    Offsets,
    Admin,
}

/// Classify a broker error code.
///
/// Codes that say something about the topic or the cluster's health map to
/// the matching variant regardless of the operation.
pub(crate) fn from_code(
    code: RDKafkaErrorCode,
    topic: &str,
    timeout: Duration,
    op: Operation,
    detail: String,
) -> TopicError {
    match code {
        RDKafkaErrorCode::TopicAlreadyExists => TopicError::TopicAlreadyExists(topic.to_string()),
        RDKafkaErrorCode::UnknownTopicOrPartition | RDKafkaErrorCode::UnknownTopic => {
            TopicError::UnknownTopic(topic.to_string())
        }
        RDKafkaErrorCode::InvalidTopic
        | RDKafkaErrorCode::InvalidPartitions
        | RDKafkaErrorCode::InvalidReplicationFactor => TopicError::InvalidTopic(format!("{topic}: {detail}")),
        RDKafkaErrorCode::MessageTimedOut
        | RDKafkaErrorCode::RequestTimedOut
        | RDKafkaErrorCode::OperationTimedOut => TopicError::Timeout {
            topic: topic.to_string(),
            timeout,
        },
        RDKafkaErrorCode::BrokerTransportFailure | RDKafkaErrorCode::AllBrokersDown => {
            TopicError::ConnectionFailed(detail)
        }
        RDKafkaErrorCode::QueueFull
        | RDKafkaErrorCode::LeaderNotAvailable
        | RDKafkaErrorCode::NotLeaderForPartition
        | RDKafkaErrorCode::NotEnoughReplicas => TopicError::Unavailable(detail),
        _ => generic(topic, op, detail),
    }
}

/// Classify a client error.
pub(crate) fn from_kafka(error: &KafkaError, topic: &str, timeout: Duration, op: Operation) -> TopicError {
    match error {
        KafkaError::ClientCreation(reason) | KafkaError::ClientConfig(_, reason, _, _) => {
            TopicError::Configuration(reason.clone())
        }
        _ => match error.rdkafka_error_code() {
            Some(code) => from_code(code, topic, timeout, op, error.to_string()),
            None => generic(topic, op, error.to_string()),
        },
    }
}

fn generic(topic: &str, op: Operation, reason: String) -> TopicError {
    match op {
        Operation::Publish => TopicError::PublishFailed {
            topic: topic.to_string(),
            reason,
        },
        Operation::Consume => TopicError::ConsumeFailed(reason),
        Operation::Offsets => TopicError::OffsetFailed(reason),
        Operation::Admin => TopicError::Unavailable(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn classify(code: RDKafkaErrorCode, op: Operation) -> TopicError {
        from_code(code, "raffle-entries", TIMEOUT, op, code.to_string())
    }

    #[test]
    fn already_exists_is_recognized_for_bootstrap_races() {
        assert!(matches!(
            classify(RDKafkaErrorCode::TopicAlreadyExists, Operation::Admin),
            TopicError::TopicAlreadyExists(topic) if topic == "raffle-entries"
        ));
    }

    #[test]
    fn delivery_timeouts_are_transient() {
        let error = classify(RDKafkaErrorCode::MessageTimedOut, Operation::Publish);
        assert!(matches!(error, TopicError::Timeout { timeout, .. } if timeout == TIMEOUT));
        assert!(error.is_transient());
    }

    #[test]
    fn invalid_layout_is_not_transient() {
        let error = classify(RDKafkaErrorCode::InvalidPartitions, Operation::Admin);
        assert!(matches!(error, TopicError::InvalidTopic(_)));
        assert!(!error.is_transient());
    }

    #[test]
    fn leader_election_is_retried() {
        assert!(classify(RDKafkaErrorCode::LeaderNotAvailable, Operation::Publish).is_transient());
    }

    #[test]
    fn unclassified_codes_follow_the_operation() {
        assert!(matches!(
            classify(RDKafkaErrorCode::MessageSizeTooLarge, Operation::Publish),
            TopicError::PublishFailed { .. }
        ));
        assert!(matches!(
            classify(RDKafkaErrorCode::RebalanceInProgress, Operation::Offsets),
            TopicError::OffsetFailed(_)
        ));
    }

    #[test]
    fn client_creation_failure_is_configuration() {
        let error = from_kafka(
            &KafkaError::ClientCreation("bad sasl mechanism".into()),
            "t",
            TIMEOUT,
            Operation::Consume,
        );
        assert!(matches!(error, TopicError::Configuration(_)));
    }
}
