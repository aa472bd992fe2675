//! Kafka input and output channels.
//!
//! The engine only sees the [`MessageSource`] and [`MessageSink`] traits.
//! [`KafkaConsumer`] and [`KafkaSink`] implement them on top of rdkafka;
//! the [`memory`] module provides broker-free stand-ins.

mod consumer;
pub mod memory;
mod message;
mod producer;

pub use consumer::{KafkaConsumer, KafkaConsumerBuilder, PollBackoff, PollResult};
pub use message::{KafkaMessage, OutboundMessage, Position};
pub use producer::KafkaSink;

use crate::config::KafkaConfig;
use crate::Result;
use async_trait::async_trait;
use rdkafka::ClientConfig;
use std::time::Duration;

/// Where the pipeline reads messages from.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait at most `timeout` for the next event.
    async fn poll(&self, timeout: Duration) -> PollResult;

    /// Mark `message` as consumed.
    async fn commit(&self, message: &KafkaMessage) -> Result<()>;

    /// Release the subscription. No further polls follow.
    async fn close(&self);
}

/// Where the pipeline publishes messages to.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Publish one message and wait for its delivery report.
    async fn send(&self, message: OutboundMessage) -> Result<()>;

    /// Wait for all outstanding deliveries.
    async fn flush(&self, timeout: Duration) -> Result<()>;
}

/// Copy the security settings onto a client configuration.
pub(crate) fn apply_security(client_config: &mut ClientConfig, config: &KafkaConfig) {
    let security = &config.security;

    if let Some(ref protocol) = security.protocol {
        client_config.set("security.protocol", protocol);
    }
    if let Some(ref mechanism) = security.sasl_mechanism {
        client_config.set("sasl.mechanism", mechanism);
    }
    if let Some(ref username) = security.sasl_username {
        client_config.set("sasl.username", username);
    }
    if let Some(ref password) = security.sasl_password {
        client_config.set("sasl.password", password);
    }
    if let Some(ref path) = security.ssl_ca_location {
        client_config.set("ssl.ca.location", path.to_string_lossy().as_ref());
    }
    if let Some(ref path) = security.ssl_cert_location {
        client_config.set("ssl.certificate.location", path.to_string_lossy().as_ref());
    }
    if let Some(ref path) = security.ssl_key_location {
        client_config.set("ssl.key.location", path.to_string_lossy().as_ref());
    }
}
