//! Owned message types exchanged with the Kafka clients.

use std::fmt;

/// A consumed Kafka message with all metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct KafkaMessage {
    /// Message key (optional)
    pub key: Option<Vec<u8>>,

    /// Message value; `None` for tombstones
    pub value: Option<Vec<u8>>,

    /// Topic name
    pub topic: String,

    /// Partition number
    pub partition: i32,

    /// Offset within the partition
    pub offset: i64,
}

impl KafkaMessage {
    /// Message with only a value, as produced by most upstream clients.
    pub fn with_value(topic: impl Into<String>, partition: i32, offset: i64, value: &[u8]) -> Self {
        Self {
            key: None,
            value: Some(value.to_vec()),
            topic: topic.into(),
            partition,
            offset,
        }
    }

    pub fn position(&self) -> Position<'_> {
        Position {
            topic: &self.topic,
            partition: self.partition,
            offset: self.offset,
        }
    }
}

/// `topic[partition]@offset`, used as a log field.
#[derive(Debug, Clone, Copy)]
pub struct Position<'a> {
    pub topic: &'a str,
    pub partition: i32,
    pub offset: i64,
}

impl fmt::Display for Position<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// A message to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            payload,
            headers: Vec::new(),
        }
    }

    pub fn with_key(mut self, key: Option<Vec<u8>>) -> Self {
        self.key = key;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// First header with the given key.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_value_position() {
        let msg = KafkaMessage::with_value("user-login", 2, 100, b"value");

        assert_eq!(msg.key, None);
        assert_eq!(msg.value.as_deref(), Some(b"value".as_slice()));
        assert_eq!(msg.position().to_string(), "user-login[2]@100");
    }

    #[test]
    fn test_outbound_headers() {
        let out = OutboundMessage::new("user-login-dlq", b"{}".to_vec())
            .with_header("dlq-reason", "deserialization error")
            .with_header("dlq-detail", "EOF");
        assert_eq!(out.header("dlq-reason"), Some("deserialization error"));
        assert_eq!(out.header("missing"), None);
        assert_eq!(out.key, None);
    }
}
