//! Reading Service - live sensor reads with cache fallback
//!
//! This service provides a single awaitable operation, "current reading for
//! device D", on top of the correlation registry:
//! - Register a correlation id and publish a `read_temp` command
//! - Wait for the correlated response within the read timeout
//! - Fall back to the latest cached reading when the live path fails
//! - Write fresh live readings through to the cache

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use templine_core::{ReadingCache, ReadingSnapshot, StoreError};

use crate::correlation::{CorrelationError, CorrelationRegistry, RegistryError};
use crate::protocol::{CommandMessage, ResponseMessage};
use crate::publisher::CommandPublisher;

/// Result type for reading operations.
pub type ReadingResult<T> = Result<T, ReadingError>;

/// Error type for reading operations.
#[derive(Debug, Error)]
pub enum ReadingError {
    /// No correlated response before the deadline
    #[error("Live read timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// A response arrived but its Fahrenheit value is not a finite number
    #[error("Invalid reading: {0}")]
    InvalidReading(String),

    /// Neither a live nor a cached reading exists
    #[error("No data available for device {device_id}")]
    NoDataAvailable { device_id: String },

    /// Correlation identifier collision (logic fault)
    #[error("Duplicate correlation identifier: {0}")]
    DuplicateIdentifier(String),

    /// The command could not be handed to the transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// The pending request was dropped without a result
    #[error("Live read cancelled")]
    Cancelled,

    /// The reading cache could not be queried
    #[error("Cache error: {0}")]
    Store(#[from] StoreError),
}

impl ReadingError {
    /// Whether the cache fallback applies to this live-path failure.
    pub fn is_live_failure(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::InvalidReading(_) | Self::Transport(_) | Self::Cancelled
        )
    }
}

impl From<CorrelationError> for ReadingError {
    fn from(e: CorrelationError) -> Self {
        match e {
            CorrelationError::Timeout { timeout_ms } => Self::Timeout { timeout_ms },
            CorrelationError::Cancelled => Self::Cancelled,
        }
    }
}

impl From<RegistryError> for ReadingError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::DuplicateIdentifier(id) => Self::DuplicateIdentifier(id),
        }
    }
}

/// Live reading orchestrator.
pub struct ReadingService {
    registry: CorrelationRegistry<ResponseMessage>,
    publisher: CommandPublisher,
    cache: Arc<dyn ReadingCache>,
    default_timeout: Duration,
    /// Cache writes still in flight.
    write_backs: Mutex<JoinSet<()>>,
}

impl ReadingService {
    pub fn new(
        registry: CorrelationRegistry<ResponseMessage>,
        publisher: CommandPublisher,
        cache: Arc<dyn ReadingCache>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            publisher,
            cache,
            default_timeout,
            write_backs: Mutex::new(JoinSet::new()),
        }
    }

    /// Registry shared with the response listener.
    pub fn registry(&self) -> &CorrelationRegistry<ResponseMessage> {
        &self.registry
    }

    /// Current reading for a device, live if possible, cached otherwise.
    ///
    /// `timeout` overrides the configured wait window for this call.
    pub async fn get_reading(
        &self,
        device_id: &str,
        timeout: Option<Duration>,
    ) -> ReadingResult<ReadingSnapshot> {
        let timeout = timeout.unwrap_or(self.default_timeout);

        match self.live_reading(device_id, timeout).await {
            Ok(snapshot) => {
                info!(device_id = %device_id, temp_f = snapshot.temp_f, "Live reading received");
                self.write_through(&snapshot);
                Ok(snapshot)
            }
            Err(e) if e.is_live_failure() => {
                match &e {
                    ReadingError::InvalidReading(reason) => {
                        warn!(device_id = %device_id, reason = %reason, "Device sent invalid reading; using cache")
                    }
                    _ => warn!(device_id = %device_id, error = %e, "Live reading failed; using cache"),
                }
                self.cached_reading(device_id).await
            }
            Err(e) => {
                error!(device_id = %device_id, error = %e, "Live reading aborted");
                Err(e)
            }
        }
    }

    /// One round trip to the device: register, publish, await.
    async fn live_reading(&self, device_id: &str, timeout: Duration) -> ReadingResult<ReadingSnapshot> {
        let req_id = Uuid::new_v4().to_string();
        let reply = self.registry.register(req_id.clone(), timeout)?;

        // On failure `reply` is dropped here, which removes the pending entry.
        self.publisher
            .publish(device_id, &CommandMessage::read_temp(&req_id))
            .await
            .map_err(|e| ReadingError::Transport(e.to_string()))?;

        let response = reply.await?;
        if response.device.as_deref().is_some_and(|d| d != device_id) {
            debug!(
                device_id = %device_id,
                reported = ?response.device,
                req_id = %req_id,
                "Response reports a different device name"
            );
        }

        let temp_f = response.fahrenheit().ok_or_else(|| {
            ReadingError::InvalidReading(format!("temp_f is not a finite number: {}", response.temp_f))
        })?;
        Ok(ReadingSnapshot::live(device_id, temp_f, response.celsius()))
    }

    async fn cached_reading(&self, device_id: &str) -> ReadingResult<ReadingSnapshot> {
        match self.cache.get_latest(device_id).await? {
            Some(cached) => {
                debug!(device_id = %device_id, updated_at = %cached.updated_at, "Serving cached reading");
                Ok(cached.into())
            }
            None => Err(ReadingError::NoDataAvailable {
                device_id: device_id.to_string(),
            }),
        }
    }

    /// Best-effort cache update; failures only reach the log.
    ///
    /// The write runs in the background. Call [`flush`](Self::flush) before
    /// shutting down so it is not lost with the runtime.
    fn write_through(&self, snapshot: &ReadingSnapshot) {
        let cache = self.cache.clone();
        let record = snapshot.to_cached();
        let mut write_backs = self.write_backs.lock();
        while write_backs.try_join_next().is_some() {}
        write_backs.spawn(async move {
            if let Err(e) = cache.upsert(&record).await {
                warn!(device_id = %record.device_id, error = %e, "Failed to cache live reading");
            }
        });
    }

    /// Wait for every cache write started so far.
    pub async fn flush(&self) {
        let mut pending = std::mem::take(&mut *self.write_backs.lock());
        if !pending.is_empty() {
            debug!(writes = pending.len(), "Flushing cache writes");
        }
        while let Some(finished) = pending.join_next().await {
            if let Err(e) = finished {
                error!(error = %e, "Cache write task failed");
            }
        }
    }
}
