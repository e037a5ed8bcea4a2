//! Shared fixture: full relay stack over the in-memory transport.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::json;

use templine_core::{ProfileStore, ReadingCache};
use templine_devices::{
    CommandMessage, CommandPublisher, CorrelationRegistry, MemoryTransport, ReadingService,
    ResponseListener, Transport,
};
use templine_storage::MemoryStore;

use templine_api::{AppState, Assistant};

pub const CALLER: &str = "+15551234567";
pub const DEVICE: &str = "kit-001";
pub const READ_TIMEOUT: Duration = Duration::from_millis(5000);

pub struct Fixture {
    pub transport: Arc<MemoryTransport>,
    pub store: Arc<MemoryStore>,
    pub readings: Arc<ReadingService>,
}

impl Fixture {
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        store.register_caller(CALLER, DEVICE).await.unwrap();
        Self::with_stores(store.clone(), store).await
    }

    pub async fn with_stores(store: Arc<MemoryStore>, cache: Arc<dyn ReadingCache>) -> Self {
        let transport = Arc::new(MemoryTransport::new());
        let registry = CorrelationRegistry::new();
        ResponseListener::new(registry.clone())
            .start(transport.clone(), "devices/+/resp")
            .await
            .unwrap();

        let publisher =
            CommandPublisher::from_template(transport.clone(), "devices/{device_id}/cmd").unwrap();
        let readings = Arc::new(ReadingService::new(
            registry,
            publisher,
            cache,
            READ_TIMEOUT,
        ));

        Self {
            transport,
            store,
            readings,
        }
    }

    pub fn assistant(&self) -> Assistant {
        self.assistant_with_profiles(self.store.clone())
    }

    pub fn assistant_with_profiles(&self, profiles: Arc<dyn ProfileStore>) -> Assistant {
        Assistant::new(profiles, self.readings.clone())
    }

    pub fn app_state(&self) -> AppState {
        AppState::new(self.assistant())
    }

    /// Device that answers every command with `temp_f`.
    pub async fn spawn_device(&self, temp_f: f64) {
        let mut commands = self.transport.subscribe("devices/+/cmd").await.unwrap();
        let transport = self.transport.clone();
        tokio::spawn(async move {
            while let Some(message) = commands.next().await {
                let command: CommandMessage = serde_json::from_slice(&message.payload).unwrap();
                let device = message.topic.split('/').nth(1).unwrap().to_string();
                let body = json!({"req_id": command.req_id, "device": device, "temp_f": temp_f});
                transport
                    .publish(&format!("devices/{device}/resp"), body.to_string().into_bytes())
                    .await
                    .unwrap();
            }
        });
    }
}
