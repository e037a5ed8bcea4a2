//! Device communication for the Templine sensor relay.
//!
//! ## Features
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `mqtt` | ✅ | MQTT transport (rumqttc) |
//!
//! ## Architecture
//!
//! Request/response over a publish/subscribe transport:
//! - **CorrelationRegistry**: in-flight requests keyed by correlation id
//! - **CommandPublisher**: device-addressed commands on a topic template
//! - **ResponseListener**: wildcard subscription routing responses to the registry
//! - **ReadingService**: live read with deadline and cache fallback
//! - **Transport**: broker interface (`MqttTransport`, `MemoryTransport`)

pub mod correlation;
pub mod listener;
pub mod protocol;
pub mod publisher;
pub mod service;
pub mod transport;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use correlation::{CorrelationError, CorrelationRegistry, PendingReply, RegistryError};
pub use listener::{ListenOutcome, ResponseListener};
pub use protocol::{CommandMessage, DecodeError, ResponseMessage, TopicTemplate};
pub use publisher::CommandPublisher;
pub use service::{ReadingError, ReadingResult, ReadingService};
pub use transport::{
    topic_matches, InboundMessage, MemoryTransport, MessageStream, Transport, TransportError,
    TransportResult,
};

#[cfg(feature = "mqtt")]
pub use mqtt::{BrokerEndpoint, MqttTransport};
