//! Poison sink that only logs.

use raffle_core::poison::{PoisonReport, PoisonSink};
use std::future::Future;
use std::pin::Pin;

/// Keeps poison reports in the log only.
///
/// Used when no persistent queue is configured. The consumer already warns
/// about every poison message; this adds the payload size at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPoisonSink;

impl PoisonSink for LogPoisonSink {
    fn report(&self, report: PoisonReport) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        tracing::debug!(
            topic = %report.message.topic,
            partition = report.message.partition,
            offset = report.message.offset,
            key = %report.message.key_lossy(),
            payload_bytes = report.message.payload.as_ref().map_or(0, Vec::len),
            reason = %report.reason,
            "Poison message not persisted"
        );
        Box::pin(async {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use raffle_core::message::ConsumedMessage;

    #[tokio::test]
    async fn log_sink_accepts_reports() {
        let message = ConsumedMessage {
            topic: "raffle-entries".into(),
            partition: 0,
            offset: 3,
            key: Some(b"E1".to_vec()),
            payload: None,
        };
        LogPoisonSink
            .report(PoisonReport::new(message, "missing payload", Utc::now()))
            .await;
    }
}
