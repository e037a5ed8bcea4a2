//! Wire format for device commands and responses.
//!
//! ## Topic Format
//!
//! Commands: rendered from a template, default `devices/{device_id}/cmd`
//! Responses: wildcard subscription, default `devices/+/resp`
//!
//! ## Payloads
//!
//! ```text
//! command  → {"cmd":"read_temp","req_id":"t1"}
//! response ← {"req_id":"t1","device":"kit-001","temp_c":22.4,"temp_f":72.3,"ts":1448}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use templine_core::config::{check_command_template, DEVICE_ID_PLACEHOLDER};

/// Command name for a live temperature read.
pub const READ_TEMP: &str = "read_temp";

/// Command sent to a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandMessage {
    pub cmd: String,
    pub req_id: String,
}

impl CommandMessage {
    pub fn new(cmd: impl Into<String>, req_id: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            req_id: req_id.into(),
        }
    }

    pub fn read_temp(req_id: impl Into<String>) -> Self {
        Self::new(READ_TEMP, req_id)
    }
}

/// Why an inbound response payload was discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Missing correlation id")]
    MissingCorrelationId,
}

/// Response published by a device.
///
/// Only `req_id` is required to decode. The reported values are kept as raw
/// JSON so that a non-numeric reading still reaches its requester, which
/// decides whether it is usable.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMessage {
    pub req_id: String,
    pub device: Option<String>,
    pub temp_c: Value,
    pub temp_f: Value,
    pub ts: Option<f64>,
}

#[derive(Deserialize)]
struct RawResponse {
    #[serde(default)]
    req_id: Option<String>,
    #[serde(default)]
    device: Option<String>,
    #[serde(default)]
    temp_c: Value,
    #[serde(default)]
    temp_f: Value,
    #[serde(default)]
    ts: Option<f64>,
}

impl ResponseMessage {
    /// Decode an untrusted payload.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| DecodeError::InvalidJson(e.to_string()))?;
        // Serde would otherwise accept arrays positionally.
        if !value.is_object() {
            return Err(DecodeError::InvalidJson("expected a JSON object".to_string()));
        }
        let raw: RawResponse =
            serde_json::from_value(value).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

        let req_id = raw
            .req_id
            .filter(|id| !id.is_empty())
            .ok_or(DecodeError::MissingCorrelationId)?;

        Ok(Self {
            req_id,
            device: raw.device,
            temp_c: raw.temp_c,
            temp_f: raw.temp_f,
            ts: raw.ts,
        })
    }

    /// Fahrenheit value, if it is a finite number.
    pub fn fahrenheit(&self) -> Option<f64> {
        finite_number(&self.temp_f)
    }

    /// Celsius value, if it is a finite number.
    pub fn celsius(&self) -> Option<f64> {
        finite_number(&self.temp_c)
    }
}

/// Numbers and numeric strings count; anything else does not.
fn finite_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

/// Command topic template with a single `{device_id}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicTemplate {
    template: String,
}

impl TopicTemplate {
    pub fn new(template: impl Into<String>) -> Result<Self, String> {
        let template = template.into();
        check_command_template(&template).map_err(|e| e.to_string())?;
        Ok(Self { template })
    }

    pub fn render(&self, device_id: &str) -> String {
        self.template.replacen(DEVICE_ID_PLACEHOLDER, device_id, 1)
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }
}
