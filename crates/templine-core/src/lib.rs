//! Templine core types.
//!
//! Shared building blocks for the sensor relay:
//! - **config**: environment/TOML configuration and defaults
//! - **error**: crate-wide error type
//! - **reading**: reading snapshots and cached readings
//! - **store**: collaborator store traits (reading cache, caller profiles)

pub mod config;
pub mod error;
pub mod reading;
pub mod store;

pub use config::{MqttConfig, ReadingConfig, RelayConfig, ServerConfig, StorageConfig};
pub use error::{Error, Result};
pub use reading::{CachedReading, Freshness, ReadingSnapshot};
pub use store::{ProfileStore, ReadingCache, StoreError, StoreResult};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
