//! Publishes processed records to the output topic and rejected payloads to
//! the dead-letter topic.
//!
//! Delivery failures are logged and counted, never retried and never
//! propagated. A record whose send fails is dropped.

use crate::error::RecordError;
use crate::kafka::{MessageSink, OutboundMessage};
use crate::metrics::{Channel, PipelineMetrics};
use crate::record::Record;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

/// Header carrying the dead-letter reason label.
pub const DLQ_REASON_HEADER: &str = "dlq-reason";
/// Header carrying the detail behind the reason.
pub const DLQ_DETAIL_HEADER: &str = "dlq-detail";

/// Outcome of a single publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Dropped,
}

pub struct Router {
    output: Arc<dyn MessageSink>,
    dead_letter: Arc<dyn MessageSink>,
    output_topic: String,
    dlq_topic: String,
    metrics: Arc<PipelineMetrics>,
}

impl Router {
    pub fn new(
        output: Arc<dyn MessageSink>,
        dead_letter: Arc<dyn MessageSink>,
        output_topic: impl Into<String>,
        dlq_topic: impl Into<String>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            output,
            dead_letter,
            output_topic: output_topic.into(),
            dlq_topic: dlq_topic.into(),
            metrics,
        }
    }

    pub fn output_topic(&self) -> &str {
        &self.output_topic
    }

    pub fn dlq_topic(&self) -> &str {
        &self.dlq_topic
    }

    /// Serialize `record` and publish it to the output topic.
    pub async fn forward(&self, record: &Record, key: Option<Vec<u8>>) -> Delivery {
        let payload = match record.to_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                error!(topic = %self.output_topic, error = %e, "Failed to serialize record");
                self.metrics.record_send_failure(Channel::Output);
                return Delivery::Dropped;
            }
        };

        let message = OutboundMessage::new(&self.output_topic, payload).with_key(key);
        match self.output.send(message).await {
            Ok(()) => Delivery::Delivered,
            Err(e) => {
                error!(topic = %self.output_topic, error = %e, "Failed to forward record");
                self.metrics.record_send_failure(Channel::Output);
                Delivery::Dropped
            }
        }
    }

    /// Publish the original raw payload to the dead-letter topic, tagged with the reason.
    pub async fn dead_letter(
        &self,
        payload: &[u8],
        key: Option<Vec<u8>>,
        reason: &RecordError,
    ) -> Delivery {
        warn!(
            topic = %self.dlq_topic,
            reason = reason.label(),
            detail = %reason.detail(),
            "Sending message to dead-letter topic"
        );

        let message = OutboundMessage::new(&self.dlq_topic, payload.to_vec())
            .with_key(key)
            .with_header(DLQ_REASON_HEADER, reason.label())
            .with_header(DLQ_DETAIL_HEADER, reason.detail());

        match self.dead_letter.send(message).await {
            Ok(()) => Delivery::Delivered,
            Err(e) => {
                error!(
                    topic = %self.dlq_topic,
                    reason = reason.label(),
                    error = %e,
                    "Failed to send message to dead-letter topic"
                );
                self.metrics.record_send_failure(Channel::DeadLetter);
                Delivery::Dropped
            }
        }
    }

    /// Flush both producers concurrently, each with the full `timeout`.
    pub async fn flush(&self, timeout: Duration) -> Result<()> {
        let (output, dead_letter) = tokio::join!(
            self.output.flush(timeout),
            self.dead_letter.flush(timeout)
        );
        output.and(dead_letter)
    }
}
