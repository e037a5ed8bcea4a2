//! Conversational turn handling.
//!
//! A turn is one caller utterance: resolve the caller's registered sensor,
//! classify the request, read the sensor and phrase the answer.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use templine_core::{ProfileStore, ReadingSnapshot};
use templine_devices::{ReadingError, ReadingService};

const TEMPERATURE_PHRASES: &[&str] = &[
    "what's the temperature",
    "whats the temperature",
    "what is the temperature",
    "temperature",
    "temp",
];

const LOOKUP_FAILED: &str = "Sorry, I had trouble looking up your sensor.";
const NOT_REGISTERED: &str =
    "I don't see a registered sensor for this phone. Please register first.";
const USAGE_HINT: &str = "You can ask, “What is the temperature?” to read your sensor live.";

/// What the caller is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    ReadTemperature,
    Unknown,
}

impl Intent {
    /// Keyword match on the lower-cased utterance.
    pub fn classify(utterance: &str) -> Self {
        let text = utterance.to_lowercase();
        if TEMPERATURE_PHRASES.iter().any(|phrase| text.contains(phrase)) {
            Self::ReadTemperature
        } else {
            Self::Unknown
        }
    }
}

/// Turn failures that have no spoken reply.
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("Reading failed: {0}")]
    Reading(#[from] ReadingError),
}

/// Answers caller turns from the profile store and the reading service.
pub struct Assistant {
    profiles: Arc<dyn ProfileStore>,
    readings: Arc<ReadingService>,
}

impl Assistant {
    pub fn new(profiles: Arc<dyn ProfileStore>, readings: Arc<ReadingService>) -> Self {
        Self { profiles, readings }
    }

    pub fn readings(&self) -> &Arc<ReadingService> {
        &self.readings
    }

    /// Produce the reply for one utterance.
    ///
    /// `caller` is the identity announced on the connection, if any.
    pub async fn handle_turn(
        &self,
        caller: Option<&str>,
        utterance: &str,
    ) -> Result<String, AssistantError> {
        let Some(caller) = caller else {
            info!("Turn without caller identity");
            return Ok(NOT_REGISTERED.to_string());
        };

        let device_id = match self.profiles.device_for_caller(caller).await {
            Ok(Some(device_id)) => device_id,
            Ok(None) => {
                info!(caller = %caller, "No sensor registered for caller");
                return Ok(NOT_REGISTERED.to_string());
            }
            Err(e) => {
                error!(caller = %caller, error = %e, "Caller lookup failed");
                return Ok(LOOKUP_FAILED.to_string());
            }
        };

        if Intent::classify(utterance) != Intent::ReadTemperature {
            return Ok(USAGE_HINT.to_string());
        }

        match self.readings.get_reading(&device_id, None).await {
            Ok(snapshot) => Ok(describe(&snapshot)),
            Err(ReadingError::NoDataAvailable { device_id }) => Ok(format!(
                "I couldn't get a live reading and I don't have any cached data yet for {}. \
                 Make sure your kit is on Wi-Fi.",
                device_id
            )),
            Err(e) => Err(e.into()),
        }
    }
}

fn describe(snapshot: &ReadingSnapshot) -> String {
    if snapshot.is_live() {
        format!(
            "Your sensor {} reads {:.1} degrees Fahrenheit.",
            snapshot.device_id, snapshot.temp_f
        )
    } else {
        format!(
            "I couldn't get a live reading. The most recent value for {} was {:.1} degrees Fahrenheit.",
            snapshot.device_id, snapshot.temp_f
        )
    }
}
