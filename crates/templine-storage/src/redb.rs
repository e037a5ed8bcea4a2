//! Redb storage backend.
//!
//! Two tables in one database file:
//! - `readings_latest`: device id → JSON-encoded [`CachedReading`]
//! - `attendees`: caller id → device id

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ::redb::{Database, ReadableTable, TableDefinition};
use async_trait::async_trait;
use tracing::{debug, info};

use templine_core::{CachedReading, ProfileStore, ReadingCache, StoreResult};

use crate::{Error, Result};

const READINGS_LATEST: TableDefinition<&str, &[u8]> = TableDefinition::new("readings_latest");
const ATTENDEES: TableDefinition<&str, &str> = TableDefinition::new("attendees");

/// Path reported for temp-file databases.
pub const MEMORY_PATH: &str = ":memory:";

/// redb-backed reading cache and profile store.
pub struct RedbStore {
    db: Arc<Database>,
    /// Storage path (":memory:" for temporary databases).
    path: String,
    /// Backing file of a temporary database, removed on drop.
    temp_path: Option<PathBuf>,
}

impl RedbStore {
    /// Open or create a database file, creating parent directories.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::create(path)?;
        Self::init(db, path.display().to_string(), None)
    }

    /// Database on a temporary file that is deleted when the store drops.
    ///
    /// redb has no true in-memory mode.
    pub fn memory() -> Result<Self> {
        let temp_path =
            std::env::temp_dir().join(format!("templine_{}.redb", uuid::Uuid::new_v4()));
        let db = Database::create(&temp_path)?;
        Self::init(db, MEMORY_PATH.to_string(), Some(temp_path))
    }

    fn init(db: Database, path: String, temp_path: Option<PathBuf>) -> Result<Self> {
        let txn = db.begin_write()?;
        {
            txn.open_table(READINGS_LATEST)?;
            txn.open_table(ATTENDEES)?;
        }
        txn.commit()?;

        info!(path = %path, "Opened redb store");
        Ok(Self {
            db: Arc::new(db),
            path,
            temp_path,
        })
    }

    /// Get the storage path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Run a blocking database operation off the async runtime.
    async fn blocking<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let result = tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(Error::from)?;
        Ok(result?)
    }
}

fn write_reading(db: &Database, reading: &CachedReading) -> Result<()> {
    let bytes = serde_json::to_vec(reading)?;
    let txn = db.begin_write()?;
    {
        let mut table = txn.open_table(READINGS_LATEST)?;
        table.insert(reading.device_id.as_str(), bytes.as_slice())?;
    }
    txn.commit()?;
    Ok(())
}

fn read_reading(db: &Database, device_id: &str) -> Result<Option<CachedReading>> {
    let txn = db.begin_read()?;
    let table = txn.open_table(READINGS_LATEST)?;
    let value = table.get(device_id)?;
    let reading = match value {
        Some(bytes) => Some(serde_json::from_slice(bytes.value())?),
        None => None,
    };
    Ok(reading)
}

fn write_attendee(db: &Database, caller: &str, device_id: &str) -> Result<()> {
    let txn = db.begin_write()?;
    {
        let mut table = txn.open_table(ATTENDEES)?;
        table.insert(caller, device_id)?;
    }
    txn.commit()?;
    Ok(())
}

fn read_attendee(db: &Database, caller: &str) -> Result<Option<String>> {
    let txn = db.begin_read()?;
    let table = txn.open_table(ATTENDEES)?;
    let value = table.get(caller)?;
    Ok(value.map(|device| device.value().to_string()))
}

#[async_trait]
impl ReadingCache for RedbStore {
    async fn upsert(&self, reading: &CachedReading) -> StoreResult<()> {
        let reading = reading.clone();
        debug!(device_id = %reading.device_id, temp_f = reading.temp_f, "Caching reading");
        self.blocking(move |db| write_reading(db, &reading)).await
    }

    async fn get_latest(&self, device_id: &str) -> StoreResult<Option<CachedReading>> {
        let device_id = device_id.to_string();
        self.blocking(move |db| read_reading(db, &device_id)).await
    }
}

#[async_trait]
impl ProfileStore for RedbStore {
    async fn device_for_caller(&self, caller: &str) -> StoreResult<Option<String>> {
        let caller = caller.to_string();
        self.blocking(move |db| read_attendee(db, &caller)).await
    }

    async fn register_caller(&self, caller: &str, device_id: &str) -> StoreResult<()> {
        let caller = caller.to_string();
        let device_id = device_id.to_string();
        self.blocking(move |db| write_attendee(db, &caller, &device_id))
            .await
    }
}

impl Drop for RedbStore {
    fn drop(&mut self) {
        if let Some(temp_path) = &self.temp_path {
            if let Err(e) = std::fs::remove_file(temp_path) {
                debug!(
                    "Failed to remove temporary database file {}: {}",
                    temp_path.display(),
                    e
                );
            }
        }
    }
}
