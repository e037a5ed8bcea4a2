//! Process-local store.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use templine_core::{CachedReading, ProfileStore, ReadingCache, StoreResult};

/// Reading cache and profile store kept in maps. Contents are lost on exit.
#[derive(Default)]
pub struct MemoryStore {
    readings: RwLock<HashMap<String, CachedReading>>,
    attendees: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of devices with a cached reading.
    pub fn reading_count(&self) -> usize {
        self.readings.read().len()
    }
}

#[async_trait]
impl ReadingCache for MemoryStore {
    async fn upsert(&self, reading: &CachedReading) -> StoreResult<()> {
        self.readings
            .write()
            .insert(reading.device_id.clone(), reading.clone());
        Ok(())
    }

    async fn get_latest(&self, device_id: &str) -> StoreResult<Option<CachedReading>> {
        Ok(self.readings.read().get(device_id).cloned())
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn device_for_caller(&self, caller: &str) -> StoreResult<Option<String>> {
        Ok(self.attendees.read().get(caller).cloned())
    }

    async fn register_caller(&self, caller: &str, device_id: &str) -> StoreResult<()> {
        self.attendees
            .write()
            .insert(caller.to_string(), device_id.to_string());
        Ok(())
    }
}
