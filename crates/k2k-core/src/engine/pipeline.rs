//! The consume, process and route loop.
//!
//! One message is handled at a time:
//!
//! ```text
//! poll -> reconcile -> validate -> transform -> route -> commit -> poll
//! ```
//!
//! Per-record failures end on the dead-letter topic. Transport errors are
//! logged and polling continues. A closed consumer or a shutdown signal
//! stops the loop, after which the consumer is closed and both producers are
//! flushed within the shutdown timeout.

use crate::config::Config;
use crate::health::{self, HealthCheck};
use crate::kafka::{
    KafkaConsumerBuilder, KafkaMessage, KafkaSink, MessageSink, MessageSource, PollResult,
};
use crate::metrics::PipelineMetrics;
use crate::processing::{self, ProcessingOutcome, RecordTransform, TimestampNormalizer};
use crate::router::{Delivery, Router};
use crate::schema::{provider_from_config, Schema};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Running totals kept by one engine.
///
/// `forwarded` counts every record handed to the output producer, including
/// records whose send then failed and were dropped. `summaries` counts the
/// progress logs emitted every `summary_interval` forwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunningStats {
    forwarded: u64,
    summaries: u64,
}

impl RunningStats {
    /// Count one forwarded record.
    ///
    /// Returns the new total when it lands on a multiple of `summary_interval`.
    pub fn record_forward(&mut self, summary_interval: u64) -> Option<u64> {
        self.forwarded += 1;
        if summary_interval > 0 && self.forwarded % summary_interval == 0 {
            self.summaries += 1;
            Some(self.forwarded)
        } else {
            None
        }
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    pub fn summaries(&self) -> u64 {
        self.summaries
    }
}

/// Loop tuning taken from configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub poll_timeout: Duration,
    pub summary_interval: u64,
    pub poll_error_backoff: bool,
    pub shutdown_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(1),
            summary_interval: 10,
            poll_error_backoff: false,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_timeout: Duration::from_millis(config.kafka.poll_timeout_ms),
            summary_interval: config.pipeline.summary_interval.max(1),
            poll_error_backoff: config.pipeline.poll_error_backoff,
            shutdown_timeout: Duration::from_secs(config.pipeline.shutdown_timeout_seconds),
        }
    }
}

/// What the loop does after handling one poll result.
#[derive(Debug)]
enum Step {
    Continue,
    Backoff(Duration),
    Stop(Error),
}

/// The record pipeline.
pub struct PipelineEngine {
    schema: Arc<Schema>,
    source: Arc<dyn MessageSource>,
    router: Router,
    transform: Box<dyn RecordTransform>,
    settings: PipelineSettings,
    stats: RunningStats,
    metrics: Arc<PipelineMetrics>,
    health: Arc<HealthCheck>,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl PipelineEngine {
    /// Resolve the schema and connect to Kafka as configured.
    ///
    /// A schema that cannot be fetched is fatal.
    pub async fn connect(config: Config) -> Result<Self> {
        config.validate()?;

        let health = Arc::new(HealthCheck::for_pipeline());
        let metrics = Arc::new(PipelineMetrics::new()?);

        let provider = provider_from_config(&config)?;
        let subject = config
            .schema_registry
            .subject_for(&config.kafka.input_topic);
        let schema = match provider.latest_schema(&subject).await {
            Ok(schema) => {
                health.mark_healthy(health::SCHEMA_REGISTRY);
                info!(
                    subject = %subject,
                    source = %provider.location(),
                    schema = %schema.name(),
                    fields = schema.len(),
                    "Schema resolved"
                );
                schema
            }
            Err(e) => {
                health.mark_unhealthy(health::SCHEMA_REGISTRY, &e.to_string());
                error!(subject = %subject, error = %e, "Failed to fetch schema");
                return Err(e);
            }
        };

        let transform = TimestampNormalizer::from_config(&config.pipeline)?;

        let output = KafkaSink::new(&config.kafka, "output")?;
        let dead_letter = KafkaSink::new(&config.kafka, "dlq")?;
        Self::probe_producer(&output, &health).await;

        let source = KafkaConsumerBuilder::new(config.kafka.clone()).build()?;

        let engine = PipelineEngineBuilder::new(schema)
            .source(Arc::new(source))
            .sinks(Arc::new(output), Arc::new(dead_letter))
            .topics(&config.kafka.output_topic, &config.kafka.dlq_topic)
            .transform(Box::new(transform))
            .settings(PipelineSettings::from_config(&config))
            .metrics(metrics)
            .health(health)
            .build()?;

        Ok(engine)
    }

    async fn probe_producer(sink: &KafkaSink, health: &HealthCheck) {
        let sink = sink.clone();
        let probe =
            tokio::task::spawn_blocking(move || sink.check_connection(Duration::from_secs(10)))
                .await;

        match probe {
            Ok(Ok(())) => health.mark_healthy(health::PRODUCER),
            Ok(Err(e)) => {
                warn!(error = %e, "Kafka brokers not reachable yet");
                health.mark_degraded(health::PRODUCER, &e.to_string());
            }
            Err(e) => {
                warn!(error = %e, "Kafka connectivity probe failed");
                health.mark_degraded(health::PRODUCER, &e.to_string());
            }
        }
    }

    /// Run until a shutdown signal or an unrecoverable consumer error.
    ///
    /// Shutdown always runs before returning. The error that stopped the
    /// loop, if any, is returned afterwards.
    pub async fn run(&mut self) -> Result<()> {
        self.health.pipeline_started();
        info!(
            schema = %self.schema.name(),
            output = %self.router.output_topic(),
            dlq = %self.router.dlq_topic(),
            transform = %self.transform.name(),
            "Pipeline started"
        );

        let poll_timeout = self.settings.poll_timeout;
        let stopped_by = loop {
            let polled = tokio::select! {
                biased;

                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break None;
                }

                polled = self.source.poll(poll_timeout) => polled,
            };

            match self.handle_poll(polled).await {
                Step::Continue => {}
                Step::Backoff(delay) => {
                    debug!(delay_ms = delay.as_millis() as u64, "Backing off before next poll");
                    tokio::select! {
                        biased;

                        _ = self.shutdown_rx.recv() => {
                            info!("Shutdown signal received");
                            break None;
                        }

                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Step::Stop(e) => {
                    error!(error = %e, "Pipeline stopping on unexpected error");
                    break Some(e);
                }
            }
        };

        self.shutdown().await;
        self.health.pipeline_stopped();

        match stopped_by {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    async fn handle_poll(&mut self, polled: PollResult) -> Step {
        match polled {
            PollResult::Message(message) => {
                self.health.mark_healthy(health::KAFKA);
                self.handle_message(&message).await;
                Step::Continue
            }
            PollResult::Timeout => Step::Continue,
            PollResult::PartitionEof { partition } => {
                info!(partition, "Reached end of partition");
                self.metrics.record_partition_eof();
                Step::Continue
            }
            PollResult::Error {
                error,
                backoff,
                should_retry,
            } => {
                error!(error = %error, "Kafka poll error");
                self.metrics.record_poll_error();
                if should_retry {
                    self.health.mark_degraded(health::KAFKA, &error.to_string());
                } else {
                    self.health.mark_unhealthy(health::KAFKA, &error.to_string());
                }

                if self.settings.poll_error_backoff {
                    Step::Backoff(backoff)
                } else {
                    Step::Continue
                }
            }
            PollResult::Closed(e) => {
                self.health.mark_unhealthy(health::KAFKA, &e.to_string());
                Step::Stop(e)
            }
        }
    }

    /// Process, route and commit one consumed message.
    pub async fn handle_message(&mut self, message: &KafkaMessage) -> ProcessingOutcome {
        let started = Instant::now();
        self.metrics.record_consumed();

        let outcome = self.route(message).await;

        self.metrics.observe_processing(started.elapsed());
        debug!(
            position = %message.position(),
            outcome = outcome.label(),
            "Message handled"
        );

        if let Err(e) = self.source.commit(message).await {
            warn!(position = %message.position(), error = %e, "Offset commit failed");
            self.metrics.record_commit_failure();
        }

        outcome
    }

    async fn route(&mut self, message: &KafkaMessage) -> ProcessingOutcome {
        let Some(payload) = message.value.as_deref() else {
            info!(position = %message.position(), "Skipping message without payload");
            self.metrics.record_skipped();
            return ProcessingOutcome::Skipped("empty payload".to_string());
        };

        match processing::run_stages(payload, &self.schema, self.transform.as_ref()) {
            Ok(record) => {
                let delivery = self.router.forward(&record, message.key.clone()).await;
                self.note_delivery(delivery);

                self.metrics.record_forwarded();
                if let Some(total) = self.stats.record_forward(self.settings.summary_interval) {
                    info!(total_forwarded = total, "Pipeline progress");
                }
                ProcessingOutcome::Forwarded
            }
            Err(reason) => {
                let delivery = self
                    .router
                    .dead_letter(payload, message.key.clone(), &reason)
                    .await;
                self.note_delivery(delivery);

                self.metrics.record_dead_lettered(reason.label());
                ProcessingOutcome::DeadLettered(reason)
            }
        }
    }

    fn note_delivery(&self, delivery: Delivery) {
        match delivery {
            Delivery::Delivered => self.health.mark_healthy(health::PRODUCER),
            Delivery::Dropped => self
                .health
                .mark_degraded(health::PRODUCER, "last delivery failed"),
        }
    }

    async fn shutdown(&mut self) {
        let timeout = self.settings.shutdown_timeout;
        info!(timeout_secs = timeout.as_secs(), "Shutting down pipeline");

        let result = tokio::time::timeout(timeout, async {
            self.source.close().await;
            self.router.flush(timeout).await
        })
        .await;

        match result {
            Ok(Ok(())) => info!(
                total_forwarded = self.stats.forwarded(),
                "Consumer closed and producers flushed"
            ),
            Ok(Err(e)) => warn!(error = %e, "Shutdown completed with errors"),
            Err(_) => warn!(
                timeout_secs = timeout.as_secs(),
                "Shutdown timeout exceeded, unflushed messages may be lost"
            ),
        }
    }

    pub fn stats(&self) -> RunningStats {
        self.stats
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn health(&self) -> &Arc<HealthCheck> {
        &self.health
    }

    /// Sender that stops [`PipelineEngine::run`] at the next poll.
    pub fn shutdown_signal(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }
}

/// Assembles a [`PipelineEngine`] from its parts.
pub struct PipelineEngineBuilder {
    schema: Arc<Schema>,
    source: Option<Arc<dyn MessageSource>>,
    output: Option<Arc<dyn MessageSink>>,
    dead_letter: Option<Arc<dyn MessageSink>>,
    output_topic: String,
    dlq_topic: String,
    transform: Option<Box<dyn RecordTransform>>,
    settings: PipelineSettings,
    metrics: Option<Arc<PipelineMetrics>>,
    health: Option<Arc<HealthCheck>>,
}

impl PipelineEngineBuilder {
    pub fn new(schema: Schema) -> Self {
        let defaults = crate::config::KafkaConfig::default();
        Self {
            schema: Arc::new(schema),
            source: None,
            output: None,
            dead_letter: None,
            output_topic: defaults.output_topic,
            dlq_topic: defaults.dlq_topic,
            transform: None,
            settings: PipelineSettings::default(),
            metrics: None,
            health: None,
        }
    }

    pub fn source(mut self, source: Arc<dyn MessageSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn sinks(mut self, output: Arc<dyn MessageSink>, dead_letter: Arc<dyn MessageSink>) -> Self {
        self.output = Some(output);
        self.dead_letter = Some(dead_letter);
        self
    }

    pub fn topics(mut self, output_topic: &str, dlq_topic: &str) -> Self {
        self.output_topic = output_topic.to_string();
        self.dlq_topic = dlq_topic.to_string();
        self
    }

    /// Defaults to a [`TimestampNormalizer`] on `timestamp` in the local zone.
    pub fn transform(mut self, transform: Box<dyn RecordTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn health(mut self, health: Arc<HealthCheck>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> Result<PipelineEngine> {
        let source = self
            .source
            .ok_or_else(|| Error::Config("Pipeline needs a message source".into()))?;
        let output = self
            .output
            .ok_or_else(|| Error::Config("Pipeline needs an output sink".into()))?;
        let dead_letter = self
            .dead_letter
            .ok_or_else(|| Error::Config("Pipeline needs a dead-letter sink".into()))?;

        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(PipelineMetrics::new()?),
        };
        let health = self
            .health
            .unwrap_or_else(|| Arc::new(HealthCheck::for_pipeline()));
        let transform = self.transform.unwrap_or_else(|| {
            Box::new(TimestampNormalizer::new(
                "timestamp",
                processing::Zone::Local,
            ))
        });

        let mut settings = self.settings;
        settings.summary_interval = settings.summary_interval.max(1);

        let router = Router::new(
            output,
            dead_letter,
            self.output_topic,
            self.dlq_topic,
            metrics.clone(),
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        Ok(PipelineEngine {
            schema: self.schema,
            source,
            router,
            transform,
            settings,
            stats: RunningStats::default(),
            metrics,
            health,
            shutdown_tx,
            shutdown_rx,
        })
    }
}
