//! Publish/subscribe transport interface.
//!
//! The relay needs exactly two primitives from a broker: publish a payload on
//! a topic, and receive messages matching a subscription pattern. Connection
//! management stays inside the implementation.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::warn;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Transport configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Publish failed
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Subscribe failed
    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    /// Transport stopped
    #[error("Transport is stopped")]
    Stopped,
}

/// Message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Stream of inbound messages for one subscription.
pub type MessageStream = Pin<Box<dyn Stream<Item = InboundMessage> + Send>>;

/// Broker-facing publish/subscribe primitives.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish without waiting for any delivery acknowledgment.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> TransportResult<()>;

    /// Subscribe to a topic pattern (MQTT `+`/`#` wildcards).
    async fn subscribe(&self, pattern: &str) -> TransportResult<MessageStream>;
}

/// Match a topic against an MQTT subscription pattern.
///
/// `+` matches exactly one level, `#` matches the remaining levels
/// (including none) and must be last.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    let mut pattern_parts = pattern.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (pattern_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return pattern_parts.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(p), Some(t)) if p == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Turn a broadcast receiver into a stream filtered by `pattern`.
pub(crate) fn filtered_stream(
    mut rx: broadcast::Receiver<InboundMessage>,
    pattern: String,
) -> MessageStream {
    Box::pin(async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    if topic_matches(&pattern, &message.topic) {
                        yield message;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(pattern = %pattern, skipped, "Subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// In-process loopback broker.
///
/// Every published message is delivered to every subscription whose pattern
/// matches its topic. Used for local runs and tests.
#[derive(Clone)]
pub struct MemoryTransport {
    tx: broadcast::Sender<InboundMessage>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> TransportResult<()> {
        // No subscribers is fine: nobody was listening, same as a broker.
        let _ = self.tx.send(InboundMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> TransportResult<MessageStream> {
        if pattern.is_empty() {
            return Err(TransportError::Subscribe("empty topic pattern".to_string()));
        }
        Ok(filtered_stream(self.tx.subscribe(), pattern.to_string()))
    }
}
