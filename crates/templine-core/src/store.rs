//! Store traits for the relay's collaborators.
//!
//! The reading cache and the caller profile store are plain key lookups. The
//! relay only sees these traits; `templine-storage` provides the backends.

use async_trait::async_trait;
use thiserror::Error;

use crate::reading::CachedReading;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Store error types.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend (database) failure.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Stored data could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The store cannot be reached at all.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Latest-reading cache used for fallback values.
#[async_trait]
pub trait ReadingCache: Send + Sync {
    /// Insert or replace the latest reading for `reading.device_id`.
    async fn upsert(&self, reading: &CachedReading) -> StoreResult<()>;

    /// Most recent reading stored for a device.
    async fn get_latest(&self, device_id: &str) -> StoreResult<Option<CachedReading>>;
}

/// Caller identity to device lookup.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Device registered for a caller (e.g. a phone number), if any.
    async fn device_for_caller(&self, caller: &str) -> StoreResult<Option<String>>;

    /// Register or replace the device for a caller.
    async fn register_caller(&self, caller: &str, device_id: &str) -> StoreResult<()>;
}
