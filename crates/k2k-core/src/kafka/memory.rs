//! In-memory source and sink used to drive the pipeline without a broker.

use super::consumer::PollResult;
use super::message::{KafkaMessage, OutboundMessage};
use super::{MessageSink, MessageSource};
use crate::{Error, KafkaError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Replays scripted poll results.
///
/// Once the script is drained the source either reports itself closed or,
/// with [`InMemorySource::idle_when_drained`], keeps timing out.
#[derive(Default)]
pub struct InMemorySource {
    events: Mutex<VecDeque<PollResult>>,
    committed: Mutex<Vec<(String, i32, i64)>>,
    idle_when_drained: bool,
    closed: AtomicBool,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Source that yields one message per payload on `topic` partition 0.
    pub fn from_payloads<I, P>(topic: &str, payloads: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        let source = Self::new();
        for (offset, payload) in payloads.into_iter().enumerate() {
            source.push_message(KafkaMessage::with_value(
                topic,
                0,
                offset as i64,
                payload.as_ref(),
            ));
        }
        source
    }

    pub fn idle_when_drained(mut self) -> Self {
        self.idle_when_drained = true;
        self
    }

    pub fn push(&self, event: PollResult) {
        self.events.lock().push_back(event);
    }

    pub fn push_message(&self, message: KafkaMessage) {
        self.push(PollResult::Message(message));
    }

    /// Offsets committed so far as `(topic, partition, offset)`.
    pub fn committed(&self) -> Vec<(String, i32, i64)> {
        self.committed.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSource for InMemorySource {
    async fn poll(&self, timeout: Duration) -> PollResult {
        let next = self.events.lock().pop_front();
        match next {
            Some(event) => event,
            None if self.idle_when_drained => {
                tokio::time::sleep(timeout).await;
                PollResult::Timeout
            }
            None => PollResult::Closed(Error::Kafka(KafkaError::ConsumerClosed)),
        }
    }

    async fn commit(&self, message: &KafkaMessage) -> Result<()> {
        self.committed
            .lock()
            .push((message.topic.clone(), message.partition, message.offset));
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Collects every message sent to it.
#[derive(Default)]
pub struct InMemorySink {
    sent: Mutex<Vec<OutboundMessage>>,
    fail_sends: AtomicBool,
    flushes: AtomicUsize,
    flush_delay: Duration,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink whose every send fails with a delivery error.
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.fail_sends.store(true, Ordering::SeqCst);
        sink
    }

    /// Make every flush take `delay` before it completes.
    pub fn with_flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay = delay;
        self
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSink for InMemorySink {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Kafka(KafkaError::Delivery {
                topic: message.topic,
                message: "Local: Message timed out".to_string(),
            }));
        }
        self.sent.lock().push(message);
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> Result<()> {
        if !self.flush_delay.is_zero() {
            tokio::time::sleep(self.flush_delay).await;
        }
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
