//! Device command publisher.

use std::sync::Arc;

use tracing::debug;

use crate::protocol::{CommandMessage, TopicTemplate};
use crate::transport::{Transport, TransportError, TransportResult};

/// Publishes device-addressed commands.
///
/// Fire-and-forget: delivery is never confirmed here. A command that goes
/// nowhere is caught by the correlation registry's deadline.
#[derive(Clone)]
pub struct CommandPublisher {
    transport: Arc<dyn Transport>,
    template: TopicTemplate,
}

impl CommandPublisher {
    pub fn new(transport: Arc<dyn Transport>, template: TopicTemplate) -> Self {
        Self {
            transport,
            template,
        }
    }

    /// Build a publisher from a raw template string.
    pub fn from_template(
        transport: Arc<dyn Transport>,
        template: impl Into<String>,
    ) -> TransportResult<Self> {
        let template = TopicTemplate::new(template).map_err(TransportError::Configuration)?;
        Ok(Self::new(transport, template))
    }

    /// Topic a command for `device_id` is published on.
    pub fn topic_for(&self, device_id: &str) -> String {
        self.template.render(device_id)
    }

    pub async fn publish(&self, device_id: &str, command: &CommandMessage) -> TransportResult<()> {
        let topic = self.topic_for(device_id);
        let payload =
            serde_json::to_vec(command).map_err(|e| TransportError::Publish(e.to_string()))?;

        debug!(
            device_id = %device_id,
            topic = %topic,
            cmd = %command.cmd,
            req_id = %command.req_id,
            "Publishing device command"
        );
        self.transport.publish(&topic, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_publish_renders_topic_and_body() {
        let transport = Arc::new(MemoryTransport::new());
        let mut commands = transport.subscribe("devices/+/cmd").await.unwrap();

        let publisher = CommandPublisher::from_template(transport.clone(), "devices/{device_id}/cmd")
            .unwrap();
        publisher
            .publish("kit-001", &CommandMessage::read_temp("t1"))
            .await
            .unwrap();

        let message = commands.next().await.unwrap();
        assert_eq!(message.topic, "devices/kit-001/cmd");
        let body: CommandMessage = serde_json::from_slice(&message.payload).unwrap();
        assert_eq!(body, CommandMessage::read_temp("t1"));
    }

    #[test]
    fn test_invalid_template_rejected() {
        let transport = Arc::new(MemoryTransport::new());
        let result = CommandPublisher::from_template(transport, "devices/cmd");
        assert!(matches!(result, Err(TransportError::Configuration(_))));
    }
}
