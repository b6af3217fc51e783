//! Prometheus metrics for the pipeline workers.
//!
//! Workers record through the `metrics` facade unconditionally; nothing is
//! exported until [`MetricsServer::start`] installs the Prometheus recorder.
//! The daemon serves [`MetricsServer::render`] over HTTP.
//!
//! # Example
//!
//! ```rust,no_run
//! use raffle_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! let body = server.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder plus the address its scrape endpoint is served on.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a metrics server for `addr` (e.g. `0.0.0.0:9090`).
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address the scrape endpoint should be bound to.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Describe the pipeline metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    /// A recorder that is already installed (e.g. by another test) is not an
    /// error; [`MetricsServer::handle`] then stays `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Handle of the installed recorder.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    // Relay
    describe_counter!(
        "relay_events_forwarded_total",
        "Creation events appended to the topic"
    );
    describe_counter!(
        "relay_events_filtered_total",
        "Change events dropped because they are not creations"
    );
    describe_counter!(
        "relay_events_skipped_total",
        "Creation events that could never be forwarded"
    );
    describe_counter!(
        "relay_append_failures_total",
        "Failed or timed out topic appends, retries included"
    );

    // Consumer
    describe_counter!(
        "consumer_messages_total",
        "Messages handled by the winner consumer, labelled by outcome"
    );
    describe_counter!(
        "consumer_poison_messages_total",
        "Messages skipped as poison"
    );
    describe_histogram!(
        "consumer_batch_duration_seconds",
        "Time taken to process one polled batch"
    );

    // Entry store
    describe_counter!(
        "entry_store_update_failures_total",
        "Store calls that failed after the retry budget"
    );

    // Retry
    describe_counter!(
        "retry_attempts_total",
        "Retries scheduled, labelled by operation"
    );
    describe_counter!(
        "retry_exhausted_total",
        "Operations that used up their retry budget"
    );
}

/// Relay metrics recorder.
pub struct RelayMetrics;

impl RelayMetrics {
    /// Record a creation event appended to the topic.
    pub fn record_forwarded() {
        counter!("relay_events_forwarded_total").increment(1);
    }

    /// Record change events that were not forwarded because of their kind.
    pub fn record_filtered(count: usize) {
        counter!("relay_events_filtered_total").increment(u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// Record a creation event that carried nothing to forward.
    pub fn record_skipped() {
        counter!("relay_events_skipped_total").increment(1);
    }

    /// Record a failed or timed out append attempt.
    pub fn record_append_failure() {
        counter!("relay_append_failures_total").increment(1);
    }
}

/// Winner consumer metrics recorder.
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    /// Record one handled message by outcome label.
    pub fn record_outcome(outcome: &'static str) {
        counter!("consumer_messages_total", "outcome" => outcome).increment(1);
    }

    /// Record a poison message.
    pub fn record_poison() {
        counter!("consumer_poison_messages_total").increment(1);
    }

    /// Record the processing time of one batch.
    pub fn record_batch(duration: Duration) {
        histogram!("consumer_batch_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a store call that failed after retries.
    pub fn record_store_failure() {
        counter!("entry_store_update_failures_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn server_starts_without_handle() {
        let server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    fn records_pipeline_metrics() {
        let mut server = MetricsServer::new("127.0.0.1:0".parse().unwrap());
        server.start().unwrap();

        RelayMetrics::record_forwarded();
        RelayMetrics::record_filtered(2);
        ConsumerMetrics::record_outcome("decided");
        ConsumerMetrics::record_batch(Duration::from_millis(5));

        // Another test may have installed the recorder first; metrics are
        // still recorded, only this handle is missing.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("relay_events_forwarded_total"));
            assert!(rendered.contains("consumer_messages_total"));
        }
    }
}
