//! Prometheus metrics export.

use crate::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Per-record processing latency buckets in seconds.
const PROCESSING_BUCKETS: [f64; 9] = [0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.1, 0.5, 2.5];

/// Outbound channel a send failure happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Output topic
    Output,
    /// Dead-letter topic
    DeadLetter,
}

impl Channel {
    /// Get the label value for Prometheus export.
    pub fn as_label(&self) -> &'static str {
        match self {
            Channel::Output => "output",
            Channel::DeadLetter => "dlq",
        }
    }
}

/// Pipeline counters and histograms backed by a private registry.
#[derive(Clone)]
pub struct PipelineMetrics {
    registry: Registry,
    messages_consumed: IntCounter,
    records_forwarded: IntCounter,
    records_dead_lettered: IntCounterVec,
    messages_skipped: IntCounter,
    send_failures: IntCounterVec,
    poll_errors: IntCounter,
    partition_eofs: IntCounter,
    commit_failures: IntCounter,
    processing_seconds: Histogram,
}

impl PipelineMetrics {
    /// Create metrics registered on a fresh registry.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let messages_consumed = IntCounter::with_opts(Opts::new(
            "k2k_messages_consumed_total",
            "Messages received from the input topic",
        ))?;
        let records_forwarded = IntCounter::with_opts(Opts::new(
            "k2k_records_forwarded_total",
            "Records published to the output topic",
        ))?;
        let records_dead_lettered = IntCounterVec::new(
            Opts::new(
                "k2k_records_dead_lettered_total",
                "Payloads published to the dead-letter topic",
            ),
            &["reason"],
        )?;
        let messages_skipped = IntCounter::with_opts(Opts::new(
            "k2k_messages_skipped_total",
            "Messages without a payload",
        ))?;
        let send_failures = IntCounterVec::new(
            Opts::new("k2k_send_failures_total", "Failed deliveries by channel"),
            &["channel"],
        )?;
        let poll_errors = IntCounter::with_opts(Opts::new(
            "k2k_poll_errors_total",
            "Transport errors while polling",
        ))?;
        let partition_eofs = IntCounter::with_opts(Opts::new(
            "k2k_partition_eof_total",
            "End-of-partition events",
        ))?;
        let commit_failures = IntCounter::with_opts(Opts::new(
            "k2k_offset_commit_failures_total",
            "Failed offset commits",
        ))?;
        let processing_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "k2k_record_processing_seconds",
                "Time from receipt to routing decision delivered",
            )
            .buckets(PROCESSING_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(messages_consumed.clone()))?;
        registry.register(Box::new(records_forwarded.clone()))?;
        registry.register(Box::new(records_dead_lettered.clone()))?;
        registry.register(Box::new(messages_skipped.clone()))?;
        registry.register(Box::new(send_failures.clone()))?;
        registry.register(Box::new(poll_errors.clone()))?;
        registry.register(Box::new(partition_eofs.clone()))?;
        registry.register(Box::new(commit_failures.clone()))?;
        registry.register(Box::new(processing_seconds.clone()))?;

        Ok(Self {
            registry,
            messages_consumed,
            records_forwarded,
            records_dead_lettered,
            messages_skipped,
            send_failures,
            poll_errors,
            partition_eofs,
            commit_failures,
            processing_seconds,
        })
    }

    pub fn record_consumed(&self) {
        self.messages_consumed.inc();
    }

    pub fn record_forwarded(&self) {
        self.records_forwarded.inc();
    }

    pub fn record_dead_lettered(&self, reason: &str) {
        self.records_dead_lettered
            .with_label_values(&[reason])
            .inc();
    }

    pub fn record_skipped(&self) {
        self.messages_skipped.inc();
    }

    pub fn record_send_failure(&self, channel: Channel) {
        self.send_failures
            .with_label_values(&[channel.as_label()])
            .inc();
    }

    pub fn record_poll_error(&self) {
        self.poll_errors.inc();
    }

    pub fn record_partition_eof(&self) {
        self.partition_eofs.inc();
    }

    pub fn record_commit_failure(&self) {
        self.commit_failures.inc();
    }

    pub fn observe_processing(&self, elapsed: Duration) {
        self.processing_seconds.observe(elapsed.as_secs_f64());
    }

    pub fn messages_consumed(&self) -> u64 {
        self.messages_consumed.get()
    }

    pub fn records_forwarded(&self) -> u64 {
        self.records_forwarded.get()
    }

    pub fn records_dead_lettered(&self, reason: &str) -> u64 {
        self.records_dead_lettered.with_label_values(&[reason]).get()
    }

    pub fn messages_skipped(&self) -> u64 {
        self.messages_skipped.get()
    }

    pub fn send_failures(&self, channel: Channel) -> u64 {
        self.send_failures
            .with_label_values(&[channel.as_label()])
            .get()
    }

    pub fn poll_errors(&self) -> u64 {
        self.poll_errors.get()
    }

    pub fn partition_eofs(&self) -> u64 {
        self.partition_eofs.get()
    }

    pub fn commit_failures(&self) -> u64 {
        self.commit_failures.get()
    }

    pub fn processing_observations(&self) -> u64 {
        self.processing_seconds.get_sample_count()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn export_prometheus_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| crate::Error::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = PipelineMetrics::new().unwrap();

        metrics.record_consumed();
        metrics.record_consumed();
        metrics.record_forwarded();
        metrics.record_dead_lettered("missing required fields");
        metrics.record_send_failure(Channel::DeadLetter);
        metrics.record_poll_error();
        metrics.record_partition_eof();

        assert_eq!(metrics.messages_consumed(), 2);
        assert_eq!(metrics.records_forwarded(), 1);
        assert_eq!(metrics.records_dead_lettered("missing required fields"), 1);
        assert_eq!(metrics.records_dead_lettered("deserialization error"), 0);
        assert_eq!(metrics.send_failures(Channel::DeadLetter), 1);
        assert_eq!(metrics.send_failures(Channel::Output), 0);
        assert_eq!(metrics.poll_errors(), 1);
        assert_eq!(metrics.partition_eofs(), 1);
        assert_eq!(metrics.commit_failures(), 0);
    }

    #[test]
    fn test_processing_histogram() {
        let metrics = PipelineMetrics::new().unwrap();
        metrics.observe_processing(Duration::from_micros(800));
        metrics.observe_processing(Duration::from_millis(30));
        assert_eq!(metrics.processing_observations(), 2);
    }

    #[test]
    fn test_export_prometheus_text() {
        let metrics = PipelineMetrics::new().unwrap();
        metrics.record_forwarded();
        metrics.record_dead_lettered("schema validation failed");

        let text = metrics.export_prometheus_text().unwrap();
        assert!(text.contains("# TYPE k2k_records_forwarded_total counter"));
        assert!(text.contains("k2k_records_forwarded_total 1"));
        assert!(text
            .contains("k2k_records_dead_lettered_total{reason=\"schema validation failed\"} 1"));
        assert!(text.contains("k2k_record_processing_seconds_bucket"));
    }

    #[test]
    fn test_instances_are_independent() {
        let a = PipelineMetrics::new().unwrap();
        let b = PipelineMetrics::new().unwrap();
        a.record_forwarded();
        assert_eq!(a.records_forwarded(), 1);
        assert_eq!(b.records_forwarded(), 0);
    }
}
