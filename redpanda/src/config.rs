//! Client configuration shared by the producer, consumer and admin client.

use crate::discovery::BrokerDiscovery;
use raffle_core::topic::TopicError;
use rdkafka::config::ClientConfig;
use std::time::Duration;

/// SASL credentials for authenticated clusters.
#[derive(Clone)]
pub struct SaslCredentials {
    /// SASL mechanism, e.g. `SCRAM-SHA-256`.
    pub mechanism: String,
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
}

impl std::fmt::Debug for SaslCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaslCredentials")
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Connection settings for a Redpanda (or any Kafka-compatible) cluster.
///
/// Built with [`RedpandaConfig::builder`] from a static broker list, or
/// from a [`BrokerDiscovery`] with [`RedpandaConfigBuilder::discover`].
#[derive(Clone, Debug)]
pub struct RedpandaConfig {
    brokers: String,
    producer_acks: String,
    compression: String,
    timeout: Duration,
    auto_offset_reset: String,
    session_timeout: Duration,
    security_protocol: Option<String>,
    sasl: Option<SaslCredentials>,
}

impl RedpandaConfig {
    /// Create a builder.
    ///
    /// # Example
    ///
    /// ```
    /// use raffle_redpanda::RedpandaConfig;
    /// use std::time::Duration;
    ///
    /// # fn example() -> Result<(), raffle_core::topic::TopicError> {
    /// let config = RedpandaConfig::builder()
    ///     .brokers("localhost:9092")
    ///     .producer_acks("all")
    ///     .timeout(Duration::from_secs(5))
    ///     .build()?;
    /// assert_eq!(config.brokers(), "localhost:9092");
    /// # Ok(())
    /// # }
    /// ```
    #[must_use]
    pub fn builder() -> RedpandaConfigBuilder {
        RedpandaConfigBuilder::default()
    }

    /// Comma-separated bootstrap brokers.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Bound for broker round trips (appends, metadata, admin operations).
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Settings common to every client.
    pub(crate) fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.brokers);
        if let Some(protocol) = &self.security_protocol {
            config.set("security.protocol", protocol);
        }
        if let Some(sasl) = &self.sasl {
            config
                .set("sasl.mechanism", &sasl.mechanism)
                .set("sasl.username", &sasl.username)
                .set("sasl.password", &sasl.password);
        }
        config
    }

    /// Producer settings.
    ///
    /// `murmur2_random` routes keys the same way as the Java client, so the
    /// partition of an entry id does not depend on the producing client.
    pub(crate) fn producer_config(&self) -> ClientConfig {
        let mut config = self.client_config();
        config
            .set("message.timeout.ms", self.timeout.as_millis().to_string())
            .set("acks", &self.producer_acks)
            .set("compression.type", &self.compression)
            .set("partitioner", "murmur2_random");
        config
    }

    /// Consumer settings for `group`. Offsets are committed explicitly.
    pub(crate) fn consumer_config(&self, group: &str) -> ClientConfig {
        let mut config = self.client_config();
        config
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", self.session_timeout.as_millis().to_string())
            .set("enable.partition.eof", "false");
        config
    }
}

/// Builder for [`RedpandaConfig`].
#[derive(Default)]
pub struct RedpandaConfigBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    auto_offset_reset: Option<String>,
    session_timeout: Option<Duration>,
    security_protocol: Option<String>,
    sasl: Option<SaslCredentials>,
}

impl RedpandaConfigBuilder {
    /// Set the broker addresses (comma-separated, e.g. `"localhost:9092"`).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the broker round-trip bound.
    ///
    /// Default: 10 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Where a new consumer group starts reading: `"earliest"` or `"latest"`.
    ///
    /// Default: `"earliest"`, so entries created before the first consumer
    /// started still get a decision.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set the consumer group session timeout.
    ///
    /// Default: 6 seconds
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Set `security.protocol`, e.g. `"SASL_SSL"`.
    #[must_use]
    pub fn security_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.security_protocol = Some(protocol.into());
        self
    }

    /// Authenticate with SASL.
    #[must_use]
    pub fn sasl(
        mut self,
        mechanism: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.sasl = Some(SaslCredentials {
            mechanism: mechanism.into(),
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Resolve the broker list through `discovery`, then build.
    ///
    /// # Errors
    ///
    /// Returns the discovery error, or [`TopicError::Configuration`] if the
    /// resolved list is empty.
    pub async fn discover(self, discovery: &dyn BrokerDiscovery) -> Result<RedpandaConfig, TopicError> {
        let brokers = discovery.discover().await?;
        tracing::info!(brokers = ?brokers, "Resolved bootstrap brokers");
        self.brokers(brokers.join(",")).build()
    }

    /// Build the [`RedpandaConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`TopicError::Configuration`] if:
    /// - brokers are not set or blank
    /// - SASL credentials are set with an empty username or password
    pub fn build(self) -> Result<RedpandaConfig, TopicError> {
        let brokers = self
            .brokers
            .filter(|b| b.split(',').any(|broker| !broker.trim().is_empty()))
            .ok_or_else(|| TopicError::Configuration("Brokers not configured".to_string()))?;

        if let Some(sasl) = &self.sasl {
            if sasl.username.is_empty() || sasl.password.is_empty() {
                return Err(TopicError::Configuration(
                    "SASL requires a username and password".to_string(),
                ));
            }
        }

        Ok(RedpandaConfig {
            brokers,
            producer_acks: self.producer_acks.unwrap_or_else(|| "all".to_string()),
            compression: self.compression.unwrap_or_else(|| "none".to_string()),
            timeout: self.timeout.unwrap_or(Duration::from_secs(10)),
            auto_offset_reset: self.auto_offset_reset.unwrap_or_else(|| "earliest".to_string()),
            session_timeout: self.session_timeout.unwrap_or(Duration::from_secs(6)),
            security_protocol: self.security_protocol,
            sasl: self.sasl,
        })
    }
}
