//! Topic administration through a librdkafka `AdminClient`.

use crate::config::RedpandaConfig;
use crate::error::{Operation, from_code, from_kafka};
use raffle_core::topic::{TopicAdmin, TopicError, TopicSpec};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// [`TopicAdmin`] backed by Redpanda.
pub struct RedpandaAdmin {
    client: Arc<AdminClient<DefaultClientContext>>,
    timeout: Duration,
}

impl RedpandaAdmin {
    /// Create an admin client.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError::Configuration`] if librdkafka rejects the settings.
    pub fn new(config: &RedpandaConfig) -> Result<Self, TopicError> {
        let client: AdminClient<DefaultClientContext> = config
            .client_config()
            .create()
            .map_err(|e| TopicError::Configuration(format!("Failed to create admin client: {e}")))?;

        Ok(Self {
            client: Arc::new(client),
            timeout: config.timeout(),
        })
    }
}

fn new_topic(spec: &TopicSpec) -> Result<NewTopic<'_>, TopicError> {
    spec.validate()?;
    let partitions = i32::try_from(spec.partitions)
        .map_err(|_| TopicError::InvalidTopic(format!("{}: too many partitions", spec.name)))?;
    let replication = i32::try_from(spec.replication)
        .map_err(|_| TopicError::InvalidTopic(format!("{}: replication factor too large", spec.name)))?;
    Ok(NewTopic::new(&spec.name, partitions, TopicReplication::Fixed(replication)))
}

impl TopicAdmin for RedpandaAdmin {
    fn list_topics(&self) -> Pin<Box<dyn Future<Output = Result<Vec<String>, TopicError>> + Send + '_>> {
        let client = Arc::clone(&self.client);
        let timeout = self.timeout;

        Box::pin(async move {
            // Metadata fetches block the calling thread.
            tokio::task::spawn_blocking(move || {
                client.inner().fetch_metadata(None, timeout).map(|metadata| {
                    metadata
                        .topics()
                        .iter()
                        .map(|topic| topic.name().to_string())
                        .collect::<Vec<_>>()
                })
            })
            .await
            .map_err(|e| TopicError::Unavailable(format!("metadata task failed: {e}")))?
            .map_err(|e| from_kafka(&e, "", timeout, Operation::Admin))
        })
    }

    fn create_topic(&self, spec: &TopicSpec) -> Pin<Box<dyn Future<Output = Result<(), TopicError>> + Send + '_>> {
        let spec = spec.clone();

        Box::pin(async move {
            let topic = new_topic(&spec)?;
            let options = AdminOptions::new().operation_timeout(Some(Timeout::After(self.timeout)));

            let results = self
                .client
                .create_topics(&[topic], &options)
                .await
                .map_err(|e| from_kafka(&e, &spec.name, self.timeout, Operation::Admin))?;

            for result in results {
                if let Err((name, code)) = result {
                    return Err(from_code(code, &name, self.timeout, Operation::Admin, code.to_string()));
                }
            }
            Ok(())
        })
    }
}
