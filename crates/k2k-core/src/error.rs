//! Error types for k2k core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.
//! Per-record failures are not part of this hierarchy: they are carried as
//! [`RecordError`] values and end up on the dead-letter topic instead of
//! unwinding the pipeline.

use thiserror::Error;

/// Result type alias for k2k operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for k2k.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Kafka-related error
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// Schema-related error
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Kafka-specific errors.
#[derive(Error, Debug)]
pub enum KafkaError {
    /// Failed to connect to broker
    #[error("Connection failed to {broker}: {message}")]
    ConnectionFailed { broker: String, message: String },

    /// Consumer group error
    #[error("Consumer group error: {0}")]
    ConsumerGroup(String),

    /// Offset commit failed
    #[error("Offset commit failed: {0}")]
    OffsetCommit(String),

    /// Producer delivery failed
    #[error("Delivery to {topic} failed: {message}")]
    Delivery { topic: String, message: String },

    /// Producer flush failed
    #[error("Flush failed: {0}")]
    Flush(String),

    /// Consumer closed
    #[error("Consumer closed")]
    ConsumerClosed,
}

/// Schema retrieval and parsing errors.
#[derive(Error, Debug)]
pub enum SchemaError {
    /// Registry could not be reached or answered with an error status
    #[error("Registry request to {url} failed: {message}")]
    Registry { url: String, message: String },

    /// Subject has no registered versions
    #[error("Subject not found: {0}")]
    SubjectNotFound(String),

    /// Schema document is not a usable record schema
    #[error("Invalid schema: {0}")]
    Invalid(String),
}

/// Why a single record could not be processed.
///
/// These never abort the pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordError {
    /// Payload is not a JSON object
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// One or more schema fields were absent
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    /// Record does not conform to the schema
    #[error("Schema validation failed: {0}")]
    Validation(String),

    /// A transform step failed
    #[error("Processing error: {0}")]
    Processing(String),
}

impl RecordError {
    /// Stable reason label attached to dead-lettered messages and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            RecordError::Deserialization(_) => "deserialization error",
            RecordError::MissingFields(_) => "missing required fields",
            RecordError::Validation(_) => "schema validation failed",
            RecordError::Processing(_) => "processing error",
        }
    }

    /// Human-readable detail behind the label.
    pub fn detail(&self) -> String {
        match self {
            RecordError::Deserialization(detail)
            | RecordError::Validation(detail)
            | RecordError::Processing(detail) => detail.clone(),
            RecordError::MissingFields(fields) => fields.join(", "),
        }
    }
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
