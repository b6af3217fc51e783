//! Bootstrap broker resolution.
//!
//! Managed clusters publish their bootstrap endpoints through a discovery
//! service; a self-hosted cluster just has a fixed list. Both sit behind
//! [`BrokerDiscovery`] so workers resolve brokers once, before connecting.

use raffle_core::topic::TopicError;
use std::future::Future;
use std::pin::Pin;

/// Resolves the bootstrap broker addresses of a cluster.
pub trait BrokerDiscovery: Send + Sync {
    /// Broker addresses as `host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`TopicError::Configuration`] if no broker is known, or a
    /// transient error if the discovery endpoint is unreachable.
    fn discover(&self) -> Pin<Box<dyn Future<Output = Result<Vec<String>, TopicError>> + Send + '_>>;
}

/// A fixed broker list.
#[derive(Clone, Debug, Default)]
pub struct StaticBrokers {
    brokers: Vec<String>,
}

impl StaticBrokers {
    /// Serve `brokers` as given.
    #[must_use]
    pub fn new<I, S>(brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            brokers: brokers.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a comma-separated list, ignoring blank items.
    #[must_use]
    pub fn from_csv(brokers: &str) -> Self {
        Self::new(
            brokers
                .split(',')
                .map(str::trim)
                .filter(|broker| !broker.is_empty()),
        )
    }
}

impl BrokerDiscovery for StaticBrokers {
    fn discover(&self) -> Pin<Box<dyn Future<Output = Result<Vec<String>, TopicError>> + Send + '_>> {
        Box::pin(async move {
            if self.brokers.is_empty() {
                return Err(TopicError::Configuration("No bootstrap brokers configured".to_string()));
            }
            Ok(self.brokers.clone())
        })
    }
}
