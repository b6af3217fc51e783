//! Configuration management for the raffle daemon.
//!
//! Loads configuration from environment variables with sensible defaults.
//! `DATABASE_URL` and `REDPANDA_BROKERS` are required; everything else falls
//! back to a default. Malformed values are rejected at startup instead of
//! being silently replaced.

use raffle_runtime::DecisionStrategy;
use raffle_runtime::RetryPolicy;
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable is set but cannot be used.
    #[error("Invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        /// Variable name
        var: &'static str,
        /// Raw value
        value: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// `PostgreSQL` configuration (entry store, change feed, poison queue)
    pub postgres: PostgresSettings,
    /// RedPanda/Kafka configuration
    pub redpanda: RedpandaSettings,
    /// Change capture relay configuration
    pub relay: RelaySettings,
    /// Winner consumer configuration
    pub consumer: ConsumerSettings,
    /// HTTP server configuration
    pub server: ServerSettings,
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone)]
pub struct PostgresSettings {
    /// `PostgreSQL` connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

/// RedPanda/Kafka configuration
#[derive(Clone)]
pub struct RedpandaSettings {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Topic carrying entry creation events
    pub topic: String,
    /// Partitions of the topic when it is created
    pub partitions: u32,
    /// Replication factor of the topic when it is created
    pub replication: u32,
    /// Consumer group of the winner consumer
    pub consumer_group: String,
    /// Security protocol: plaintext, ssl, `sasl_plaintext`, `sasl_ssl`
    pub security_protocol: Option<String>,
    /// SASL mechanism: PLAIN, SCRAM-SHA-256, SCRAM-SHA-512
    pub sasl_mechanism: Option<String>,
    /// SASL username
    pub sasl_username: Option<String>,
    /// SASL password
    pub sasl_password: Option<String>,
    /// Client request timeout
    pub timeout: Duration,
}

impl fmt::Debug for RedpandaSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedpandaSettings")
            .field("brokers", &self.brokers)
            .field("topic", &self.topic)
            .field("partitions", &self.partitions)
            .field("replication", &self.replication)
            .field("consumer_group", &self.consumer_group)
            .field("security_protocol", &self.security_protocol)
            .field("sasl_mechanism", &self.sasl_mechanism)
            .field("sasl_username", &self.sasl_username)
            .field("sasl_password", &self.sasl_password.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Change capture relay configuration
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Change records fetched per batch
    pub batch_size: usize,
    /// Pause between polls of an idle change stream
    pub poll_interval: Duration,
    /// Pause before a failed batch is fetched again
    pub retry_delay: Duration,
    /// Bound on a single topic append
    pub append_timeout: Duration,
    /// Retries around each append
    pub retry_policy: RetryPolicy,
}

/// Winner consumer configuration
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Messages per poll
    pub batch_size: usize,
    /// How long a poll waits for the first message
    pub poll_timeout: Duration,
    /// Partitions processed at the same time
    pub concurrency: usize,
    /// Pause after a partition was rewound
    pub retry_delay: Duration,
    /// Retries around each store call
    pub retry_policy: RetryPolicy,
    /// Built-in draw used to pick winners
    pub decision_strategy: DecisionStrategy,
    /// Probability that an entry wins
    pub win_probability: f64,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Host to bind to
    pub host: IpAddr,
    /// Port of the entry API
    pub port: u16,
    /// Port of the Prometheus scrape endpoint
    pub metrics_port: u16,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
}

impl ServerSettings {
    /// Address of the entry API.
    #[must_use]
    pub const fn bind_address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Address of the metrics endpoint.
    #[must_use]
    pub const fn metrics_address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.metrics_port)
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Call `dotenvy::dotenv()` first to pick up a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required variable is missing or a value
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, which returns the value of a
    /// variable if it is set.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let vars = Vars(&lookup);

        let postgres = PostgresSettings {
            url: vars.required("DATABASE_URL")?,
            max_connections: vars.parse("DATABASE_MAX_CONNECTIONS", 10)?,
        };

        let redpanda = RedpandaSettings {
            brokers: vars.required("REDPANDA_BROKERS")?,
            topic: vars.string("RAFFLE_TOPIC", "raffle-entries"),
            partitions: vars.positive("RAFFLE_TOPIC_PARTITIONS", 1)?,
            replication: vars.positive("RAFFLE_TOPIC_REPLICATION", 1)?,
            consumer_group: vars.string("RAFFLE_CONSUMER_GROUP", "raffle-winners"),
            security_protocol: vars.optional("REDPANDA_SECURITY_PROTOCOL"),
            sasl_mechanism: vars.optional("REDPANDA_SASL_MECHANISM"),
            sasl_username: vars.optional("REDPANDA_SASL_USERNAME"),
            sasl_password: vars.optional("REDPANDA_SASL_PASSWORD"),
            timeout: vars.millis("REDPANDA_TIMEOUT_MS", 10_000)?,
        };
        if redpanda.sasl_username.is_some() != redpanda.sasl_password.is_some() {
            return Err(ConfigError::Invalid {
                var: "REDPANDA_SASL_USERNAME",
                value: redpanda.sasl_username.clone().unwrap_or_default(),
                reason: "SASL username and password must be set together".to_string(),
            });
        }

        let relay = RelaySettings {
            batch_size: vars.positive("RELAY_BATCH_SIZE", 100)?,
            poll_interval: vars.millis("RELAY_POLL_INTERVAL_MS", 500)?,
            retry_delay: vars.millis("RELAY_RETRY_DELAY_MS", 5_000)?,
            append_timeout: vars.millis("RELAY_APPEND_TIMEOUT_MS", 10_000)?,
            retry_policy: vars.retry_policy("RELAY_MAX_RETRIES", "RELAY_INITIAL_BACKOFF_MS", "RELAY_MAX_BACKOFF_MS")?,
        };

        let consumer = ConsumerSettings {
            batch_size: vars.positive("CONSUMER_BATCH_SIZE", 100)?,
            poll_timeout: vars.millis("CONSUMER_POLL_TIMEOUT_MS", 1_000)?,
            concurrency: vars.positive("CONSUMER_CONCURRENCY", 4)?,
            retry_delay: vars.millis("CONSUMER_RETRY_DELAY_MS", 1_000)?,
            retry_policy: vars.retry_policy(
                "CONSUMER_MAX_RETRIES",
                "CONSUMER_INITIAL_BACKOFF_MS",
                "CONSUMER_MAX_BACKOFF_MS",
            )?,
            decision_strategy: vars.parse("DECISION_STRATEGY", DecisionStrategy::Random)?,
            win_probability: vars.probability("WIN_PROBABILITY", 0.5)?,
        };

        let server = ServerSettings {
            host: vars.parse("SERVER_HOST", IpAddr::from([0, 0, 0, 0]))?,
            port: vars.parse("SERVER_PORT", 8080)?,
            metrics_port: vars.parse("METRICS_PORT", 9090)?,
            shutdown_timeout: Duration::from_secs(vars.parse("SHUTDOWN_TIMEOUT_SECS", 30)?),
        };

        Ok(Self {
            postgres,
            redpanda,
            relay,
            consumer,
            server,
        })
    }
}

struct Vars<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn optional(&self, var: &'static str) -> Option<String> {
        (self.0)(var)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.optional(var).ok_or(ConfigError::Missing(var))
    }

    fn string(&self, var: &'static str, default: &str) -> String {
        self.optional(var).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.optional(var) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn positive<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialEq + Default,
        T::Err: fmt::Display,
    {
        let value = self.parse(var, default)?;
        if value == T::default() {
            return Err(ConfigError::Invalid {
                var,
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(value)
    }

    fn millis(&self, var: &'static str, default: u64) -> Result<Duration, ConfigError> {
        self.parse(var, default).map(Duration::from_millis)
    }

    fn probability(&self, var: &'static str, default: f64) -> Result<f64, ConfigError> {
        let value: f64 = self.parse(var, default)?;
        if !(0.0..=1.0).contains(&value) {
            return Err(ConfigError::Invalid {
                var,
                value: value.to_string(),
                reason: "must be between 0 and 1".to_string(),
            });
        }
        Ok(value)
    }

    fn retry_policy(
        &self,
        retries: &'static str,
        initial: &'static str,
        max: &'static str,
    ) -> Result<RetryPolicy, ConfigError> {
        Ok(RetryPolicy::builder()
            .max_retries(self.parse(retries, 3)?)
            .initial_delay(self.millis(initial, 100)?)
            .max_delay(self.millis(max, 30_000)?)
            .build())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("DATABASE_URL", "postgres://localhost/raffle"),
        ("REDPANDA_BROKERS", "localhost:9092"),
    ];

    #[test]
    fn defaults_apply_when_only_required_vars_are_set() {
        let config = load(&REQUIRED).unwrap();

        assert_eq!(config.postgres.max_connections, 10);
        assert_eq!(config.redpanda.topic, "raffle-entries");
        assert_eq!(config.redpanda.partitions, 1);
        assert_eq!(config.redpanda.consumer_group, "raffle-winners");
        assert_eq!(config.redpanda.security_protocol, None);
        assert_eq!(config.relay.batch_size, 100);
        assert_eq!(config.relay.poll_interval, Duration::from_millis(500));
        assert_eq!(config.consumer.concurrency, 4);
        assert_eq!(config.consumer.decision_strategy, DecisionStrategy::Random);
        assert!((config.consumer.win_probability - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.server.bind_address(), "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.server.metrics_address(), "0.0.0.0:9090".parse().unwrap());
        assert_eq!(config.server.shutdown_timeout, Duration::from_secs(30));
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let err = load(&[("REDPANDA_BROKERS", "localhost:9092")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("DATABASE_URL"));
    }

    #[test]
    fn blank_brokers_count_as_missing() {
        let err = load(&[("DATABASE_URL", "postgres://localhost/raffle"), ("REDPANDA_BROKERS", "  ")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("REDPANDA_BROKERS"));
    }

    #[test]
    fn overrides_are_parsed() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("RAFFLE_TOPIC", "entries"),
            ("RAFFLE_TOPIC_PARTITIONS", "6"),
            ("CONSUMER_CONCURRENCY", "2"),
            ("DECISION_STRATEGY", "hashed"),
            ("WIN_PROBABILITY", "0.1"),
            ("RELAY_MAX_RETRIES", "7"),
            ("SERVER_PORT", "3000"),
        ]);

        let config = load(&vars).unwrap();

        assert_eq!(config.redpanda.topic, "entries");
        assert_eq!(config.redpanda.partitions, 6);
        assert_eq!(config.consumer.concurrency, 2);
        assert_eq!(config.consumer.decision_strategy, DecisionStrategy::Hashed);
        assert_eq!(config.relay.retry_policy.max_attempts(), 8);
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn malformed_number_is_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("RELAY_BATCH_SIZE", "lots"));

        let err = load(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "RELAY_BATCH_SIZE", .. }));
    }

    #[test]
    fn zero_partitions_are_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("RAFFLE_TOPIC_PARTITIONS", "0"));

        let err = load(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "RAFFLE_TOPIC_PARTITIONS", .. }));
    }

    #[test]
    fn probability_outside_unit_interval_is_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("WIN_PROBABILITY", "1.5"));

        assert!(load(&vars).is_err());
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("DECISION_STRATEGY", "coin"));

        let err = load(&vars).unwrap_err();
        assert!(err.to_string().contains("DECISION_STRATEGY"));
    }

    #[test]
    fn sasl_needs_username_and_password() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("REDPANDA_SASL_USERNAME", "raffle"));

        assert!(load(&vars).is_err());

        vars.push(("REDPANDA_SASL_PASSWORD", "hunter2"));
        let config = load(&vars).unwrap();
        assert!(!format!("{:?}", config.redpanda).contains("hunter2"));
    }
}
