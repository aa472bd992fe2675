//! Kafka producer used for the output and dead-letter topics.

use super::message::OutboundMessage;
use super::MessageSink;
use crate::config::KafkaConfig;
use crate::{Error, KafkaError, Result};
use async_trait::async_trait;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use std::time::Duration;
use tracing::{debug, info};

/// Producer wrapper that waits for each delivery report.
#[derive(Clone)]
pub struct KafkaSink {
    producer: FutureProducer,
    name: String,
    queue_timeout: Duration,
}

impl KafkaSink {
    /// librdkafka properties for a producer.
    pub fn client_config(config: &KafkaConfig) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", config.bootstrap_servers.join(","))
            .set("message.timeout.ms", config.message_timeout_ms.to_string());

        super::apply_security(&mut client_config, config);
        client_config
    }

    /// Create a producer. `name` only labels log lines.
    pub fn new(config: &KafkaConfig, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let producer: FutureProducer = Self::client_config(config).create().map_err(|e| {
            Error::Kafka(KafkaError::ConnectionFailed {
                broker: config.bootstrap_servers.join(","),
                message: e.to_string(),
            })
        })?;

        info!(producer = %name, "Kafka producer created");

        Ok(Self {
            producer,
            name,
            queue_timeout: Duration::from_millis(u64::from(config.message_timeout_ms)),
        })
    }

    /// Fetch cluster metadata to prove the brokers are reachable.
    pub fn check_connection(&self, timeout: Duration) -> Result<()> {
        let metadata = self
            .producer
            .client()
            .fetch_metadata(None, timeout)
            .map_err(|e| {
                Error::Kafka(KafkaError::ConnectionFailed {
                    broker: self.name.clone(),
                    message: e.to_string(),
                })
            })?;

        debug!(
            producer = %self.name,
            topics = metadata.topics().len(),
            "Kafka metadata fetched"
        );
        Ok(())
    }
}

#[async_trait]
impl MessageSink for KafkaSink {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        let headers = message
            .headers
            .iter()
            .fold(OwnedHeaders::new(), |headers, (key, value)| {
                headers.insert(Header {
                    key: key.as_str(),
                    value: Some(value.as_bytes()),
                })
            });

        let mut record = FutureRecord::to(&message.topic)
            .payload(&message.payload)
            .headers(headers);
        if let Some(ref key) = message.key {
            record = record.key(key);
        }

        let (partition, offset) = self
            .producer
            .send(record, self.queue_timeout)
            .await
            .map_err(|(e, _)| {
                Error::Kafka(KafkaError::Delivery {
                    topic: message.topic.clone(),
                    message: e.to_string(),
                })
            })?;

        debug!(
            producer = %self.name,
            topic = %message.topic,
            partition,
            offset,
            "Message delivered"
        );
        Ok(())
    }

    async fn flush(&self, timeout: Duration) -> Result<()> {
        let producer = self.producer.clone();
        // librdkafka flush blocks the calling thread.
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| Error::Kafka(KafkaError::Flush(e.to_string())))?
            .map_err(|e| Error::Kafka(KafkaError::Flush(e.to_string())))?;

        info!(producer = %self.name, "Kafka producer flushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KafkaSecurityConfig;

    #[test]
    fn test_client_config_properties() {
        let config = KafkaConfig {
            message_timeout_ms: 7500,
            security: KafkaSecurityConfig {
                protocol: Some("SASL_SSL".into()),
                sasl_mechanism: Some("PLAIN".into()),
                sasl_username: Some("svc".into()),
                sasl_password: Some("secret".into()),
                ..KafkaSecurityConfig::default()
            },
            ..KafkaConfig::default()
        };
        let client = KafkaSink::client_config(&config);

        assert_eq!(client.get("bootstrap.servers"), Some("localhost:29092"));
        assert_eq!(client.get("message.timeout.ms"), Some("7500"));
        assert_eq!(client.get("security.protocol"), Some("SASL_SSL"));
        assert_eq!(client.get("sasl.username"), Some("svc"));
    }
}
