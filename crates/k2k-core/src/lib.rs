//! K2K Core - Kafka to Kafka record pipeline
//!
//! Consumes JSON records from an input topic and, for each one:
//!
//! - fills and checks schema fields against a registry-provided Avro schema
//! - validates value types
//! - normalizes the epoch timestamp into a readable local time
//! - forwards it to the output topic, or sends the raw payload to a
//!   dead-letter topic with the rejection reason

pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod kafka;
pub mod metrics;
pub mod processing;
pub mod record;
pub mod router;
pub mod schema;

// Re-export commonly used types
pub use config::Config;
pub use engine::{PipelineEngine, PipelineEngineBuilder};
pub use error::{Error, Result};
pub use error::{KafkaError, RecordError, SchemaError};
pub use processing::ProcessingOutcome;
pub use record::Record;
pub use schema::Schema;
