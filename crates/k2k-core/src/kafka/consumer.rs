//! Kafka consumer for the input topic.
//!
//! Offsets are committed manually after each message has been routed, which
//! gives at-least-once delivery. Partition EOF events are enabled and
//! surfaced as [`PollResult::PartitionEof`] rather than as errors.
//!
//! The consumer counts consecutive poll failures and attaches a
//! [`PollBackoff`] delay to each error. Callers decide whether to wait.

use super::message::KafkaMessage;
use super::MessageSource;
use crate::config::KafkaConfig;
use crate::{Error, KafkaError, Result};
use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError as RdKafkaError;
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delay suggested after consecutive poll failures.
///
/// The delay doubles with each failure, starting at `initial` and capped at
/// `ceiling`. After `persistent_after` failures in a row the error is
/// reported as persistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBackoff {
    pub initial: Duration,
    pub ceiling: Duration,
    pub persistent_after: u32,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(100),
            ceiling: Duration::from_secs(30),
            persistent_after: 10,
        }
    }
}

impl PollBackoff {
    /// Delay after the `failures`-th consecutive failure (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let doublings = failures.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1u32 << doublings)
            .map_or(self.ceiling, |delay| delay.min(self.ceiling))
    }

    pub fn is_persistent(&self, failures: u32) -> bool {
        failures >= self.persistent_after
    }
}

/// Result of a single bounded poll.
#[derive(Debug)]
pub enum PollResult {
    /// A message was received.
    Message(KafkaMessage),
    /// Nothing arrived within the poll timeout.
    Timeout,
    /// Reached the end of a partition; informational.
    PartitionEof { partition: i32 },
    /// Transport error; polling may continue.
    Error {
        error: Error,
        /// Suggested delay before the next poll.
        backoff: Duration,
        /// False once failures are persistent.
        should_retry: bool,
    },
    /// The consumer cannot deliver any more messages.
    Closed(Error),
}

/// Builder for the input-topic consumer.
pub struct KafkaConsumerBuilder {
    config: KafkaConfig,
}

impl KafkaConsumerBuilder {
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }

    /// librdkafka properties for the consumer.
    pub fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", self.config.bootstrap_servers.join(","))
            .set("group.id", &self.config.consumer_group)
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "true")
            .set("auto.offset.reset", self.config.auto_offset_reset.as_str())
            .set(
                "session.timeout.ms",
                self.config.session_timeout_ms.to_string(),
            )
            .set(
                "heartbeat.interval.ms",
                self.config.heartbeat_interval_ms.to_string(),
            )
            .set(
                "max.poll.interval.ms",
                self.config.max_poll_interval_ms.to_string(),
            );

        super::apply_security(&mut client_config, &self.config);
        client_config
    }

    /// Create the consumer and subscribe to the input topic.
    pub fn build(self) -> Result<KafkaConsumer> {
        let consumer: StreamConsumer = self.client_config().create().map_err(|e| {
            Error::Kafka(KafkaError::ConnectionFailed {
                broker: self.config.bootstrap_servers.join(","),
                message: e.to_string(),
            })
        })?;

        consumer
            .subscribe(&[&self.config.input_topic])
            .map_err(|e| Error::Kafka(KafkaError::ConsumerGroup(e.to_string())))?;

        info!(
            topic = %self.config.input_topic,
            group = %self.config.consumer_group,
            servers = %self.config.bootstrap_servers.join(","),
            "Kafka consumer subscribed"
        );

        Ok(KafkaConsumer {
            consumer,
            topic: self.config.input_topic,
            backoff: PollBackoff::default(),
            failures_in_row: AtomicU32::new(0),
        })
    }
}

/// Consumer of the input topic.
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    topic: String,
    backoff: PollBackoff,
    failures_in_row: AtomicU32,
}

impl KafkaConsumer {
    /// Poll once, waiting at most `timeout`.
    pub async fn poll(&self, timeout: Duration) -> PollResult {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => PollResult::Timeout,
            Ok(Ok(msg)) => {
                self.failures_in_row.store(0, Ordering::Relaxed);
                PollResult::Message(convert_message(&msg))
            }
            Ok(Err(RdKafkaError::PartitionEOF(partition))) => {
                PollResult::PartitionEof { partition }
            }
            Ok(Err(e @ RdKafkaError::MessageConsumptionFatal(_))) => {
                PollResult::Closed(Error::Kafka(KafkaError::ConsumerGroup(e.to_string())))
            }
            Ok(Err(e)) => {
                let failures = self.note_failure();
                PollResult::Error {
                    error: Error::Kafka(KafkaError::ConsumerGroup(e.to_string())),
                    backoff: self.backoff.delay_for(failures),
                    should_retry: !self.backoff.is_persistent(failures),
                }
            }
        }
    }

    /// Commit the offset following `message`.
    pub fn commit_offset(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        // Committed offset is the next offset to read.
        tpl.add_partition_offset(topic, partition, Offset::Offset(offset + 1))
            .map_err(|e| Error::Kafka(KafkaError::OffsetCommit(e.to_string())))?;

        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| Error::Kafka(KafkaError::OffsetCommit(e.to_string())))?;

        debug!(
            topic = %topic,
            partition = %partition,
            offset = %offset,
            "Offset committed"
        );
        Ok(())
    }

    /// Leave the consumer group.
    pub fn unsubscribe(&self) {
        self.consumer.unsubscribe();
        info!(topic = %self.topic, "Kafka consumer unsubscribed");
    }

    fn note_failure(&self) -> u32 {
        let failures = self.failures_in_row.fetch_add(1, Ordering::Relaxed) + 1;
        if failures == self.backoff.persistent_after {
            warn!(failures, "Kafka poll keeps failing");
        }
        failures
    }
}

#[async_trait]
impl MessageSource for KafkaConsumer {
    async fn poll(&self, timeout: Duration) -> PollResult {
        KafkaConsumer::poll(self, timeout).await
    }

    async fn commit(&self, message: &KafkaMessage) -> Result<()> {
        self.commit_offset(&message.topic, message.partition, message.offset)
    }

    async fn close(&self) {
        self.unsubscribe();
    }
}

fn convert_message(msg: &BorrowedMessage<'_>) -> KafkaMessage {
    KafkaMessage {
        key: msg.key().map(|k| k.to_vec()),
        value: msg.payload().map(|v| v.to_vec()),
        topic: msg.topic().to_string(),
        partition: msg.partition(),
        offset: msg.offset(),
    }
}
