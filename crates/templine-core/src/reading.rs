//! Temperature readings as seen by callers and the cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a reading came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Freshness {
    /// Round-tripped to the device within the wait window
    Live { observed_at: DateTime<Utc> },
    /// Most recent persisted value, served because the live read failed
    Cached { updated_at: DateTime<Utc> },
}

/// Result of a live or cached read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingSnapshot {
    pub device_id: String,
    pub temp_f: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_c: Option<f64>,
    pub freshness: Freshness,
}

impl ReadingSnapshot {
    pub fn live(device_id: impl Into<String>, temp_f: f64, temp_c: Option<f64>) -> Self {
        Self {
            device_id: device_id.into(),
            temp_f,
            temp_c,
            freshness: Freshness::Live {
                observed_at: Utc::now(),
            },
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.freshness, Freshness::Live { .. })
    }

    /// Record suitable for the reading cache.
    pub fn to_cached(&self) -> CachedReading {
        let updated_at = match self.freshness {
            Freshness::Live { observed_at } => observed_at,
            Freshness::Cached { updated_at } => updated_at,
        };
        CachedReading {
            device_id: self.device_id.clone(),
            temp_f: self.temp_f,
            temp_c: self.temp_c,
            updated_at,
        }
    }
}

/// Latest reading persisted for a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedReading {
    pub device_id: String,
    pub temp_f: f64,
    #[serde(default)]
    pub temp_c: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl From<CachedReading> for ReadingSnapshot {
    fn from(cached: CachedReading) -> Self {
        Self {
            device_id: cached.device_id,
            temp_f: cached.temp_f,
            temp_c: cached.temp_c,
            freshness: Freshness::Cached {
                updated_at: cached.updated_at,
            },
        }
    }
}
