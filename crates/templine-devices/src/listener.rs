//! Response listener.
//!
//! Consumes every device response from one wildcard subscription and hands
//! each decodable payload to the correlation registry. Unknown, late and
//! malformed messages are expected traffic and never stop the loop.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::correlation::CorrelationRegistry;
use crate::protocol::{DecodeError, ResponseMessage};
use crate::transport::{Transport, TransportResult};

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenOutcome {
    /// Fulfilled a pending request
    Matched { req_id: String },
    /// Decoded, but nothing was waiting for it
    Unmatched { req_id: String },
    /// Payload could not be decoded and was dropped
    DecodeFailed(DecodeError),
}

/// Routes device responses to pending requests.
#[derive(Clone)]
pub struct ResponseListener {
    registry: CorrelationRegistry<ResponseMessage>,
}

impl ResponseListener {
    pub fn new(registry: CorrelationRegistry<ResponseMessage>) -> Self {
        Self { registry }
    }

    /// Handle one inbound message.
    pub fn handle_message(&self, topic: &str, payload: &[u8]) -> ListenOutcome {
        let response = match ResponseMessage::decode(payload) {
            Ok(response) => response,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Bad response payload");
                return ListenOutcome::DecodeFailed(e);
            }
        };

        let req_id = response.req_id.clone();
        if self.registry.resolve(&req_id, response) {
            debug!(topic = %topic, req_id = %req_id, "Response matched pending request");
            ListenOutcome::Matched { req_id }
        } else {
            ListenOutcome::Unmatched { req_id }
        }
    }

    /// Subscribe to `pattern` and spawn the listener loop.
    ///
    /// The subscription is made before this returns, so commands published
    /// afterwards cannot race it.
    pub async fn start(
        self,
        transport: Arc<dyn Transport>,
        pattern: &str,
    ) -> TransportResult<JoinHandle<()>> {
        let mut messages = transport.subscribe(pattern).await?;
        info!(pattern = %pattern, "Listening for device responses");

        let pattern = pattern.to_string();
        Ok(tokio::spawn(async move {
            while let Some(message) = messages.next().await {
                self.handle_message(&message.topic, &message.payload);
            }
            info!(pattern = %pattern, "Response subscription closed");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn listener() -> (CorrelationRegistry<ResponseMessage>, ResponseListener) {
        let registry = CorrelationRegistry::new();
        (registry.clone(), ResponseListener::new(registry))
    }

    #[tokio::test(start_paused = true)]
    async fn test_matching_response_resolves() {
        let (registry, listener) = listener();
        let reply = registry.register("t1", Duration::from_secs(5)).unwrap();

        let outcome = listener.handle_message(
            "devices/kit-001/resp",
            br#"{"req_id":"t1","device":"kit-001","temp_f":72.3}"#,
        );
        assert_eq!(
            outcome,
            ListenOutcome::Matched {
                req_id: "t1".to_string()
            }
        );
        assert_eq!(reply.await.unwrap().fahrenheit(), Some(72.3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_response_is_unmatched() {
        let (registry, listener) = listener();
        let reply = registry.register("t1", Duration::from_secs(5)).unwrap();

        let first = listener.handle_message("devices/a/resp", br#"{"req_id":"t1","temp_f":70}"#);
        let second = listener.handle_message("devices/a/resp", br#"{"req_id":"t1","temp_f":99}"#);

        assert!(matches!(first, ListenOutcome::Matched { .. }));
        assert!(matches!(second, ListenOutcome::Unmatched { .. }));
        assert_eq!(reply.await.unwrap().fahrenheit(), Some(70.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_leaves_pending_untouched() {
        let (registry, listener) = listener();
        let _reply = registry.register("t1", Duration::from_secs(5)).unwrap();

        assert!(matches!(
            listener.handle_message("devices/a/resp", b"{not json"),
            ListenOutcome::DecodeFailed(DecodeError::InvalidJson(_))
        ));
        assert_eq!(
            listener.handle_message("devices/a/resp", br#"{"temp_f":70}"#),
            ListenOutcome::DecodeFailed(DecodeError::MissingCorrelationId)
        );
        assert!(registry.contains("t1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_field_does_not_route() {
        let (registry, listener) = listener();
        let reply = registry.register("t1", Duration::from_secs(5)).unwrap();

        // Arrives on another device's topic with another device name
        let outcome = listener.handle_message(
            "devices/kit-999/resp",
            br#"{"req_id":"t1","device":"kit-999","temp_f":65}"#,
        );
        assert!(matches!(outcome, ListenOutcome::Matched { .. }));
        assert_eq!(reply.await.unwrap().device.as_deref(), Some("kit-999"));
    }
}
