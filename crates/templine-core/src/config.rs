//! Configuration loading.
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then environment variables. The environment variable names match the ones
//! deployments already set for the relay (`MQTT_URL`, `READ_TIMEOUT_MS`, ...).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Placeholder substituted with the device identifier in command topics.
pub const DEVICE_ID_PLACEHOLDER: &str = "{device_id}";

/// Default values.
pub mod defaults {
    pub const HOST: &str = "0.0.0.0";
    pub const PORT: u16 = 3000;
    pub const COMMAND_TEMPLATE: &str = "devices/{device_id}/cmd";
    pub const RESPONSE_PATTERN: &str = "devices/+/resp";
    pub const READ_TIMEOUT_MS: u64 = 5000;
    pub const DATA_PATH: &str = "data/templine.redb";
    pub const MQTT_KEEP_ALIVE_SECS: u64 = 60;
    pub const MQTT_RECONNECT_INTERVAL_MS: u64 = 1000;
}

/// Environment variable names.
pub mod env_vars {
    pub const HOST: &str = "HOST";
    pub const PORT: &str = "PORT";
    pub const MQTT_URL: &str = "MQTT_URL";
    pub const MQTT_USER: &str = "MQTT_USER";
    pub const MQTT_PASS: &str = "MQTT_PASS";
    pub const MQTT_CMD_TEMPLATE: &str = "MQTT_CMD_TEMPLATE";
    pub const MQTT_RESP_WILDCARD: &str = "MQTT_RESP_WILDCARD";
    pub const READ_TIMEOUT_MS: &str = "READ_TIMEOUT_MS";
    pub const DATA_PATH: &str = "TEMPLINE_DATA_PATH";
    /// Fallback log filter when `RUST_LOG` is unset.
    pub const LOG_LEVEL: &str = "LOG_LEVEL";
    /// `true` switches log output to JSON.
    pub const LOG_JSON: &str = "TEMPLINE_LOG_JSON";
}

/// Top-level relay configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub mqtt: MqttConfig,
    pub readings: ReadingConfig,
    pub storage: StorageConfig,
}

/// HTTP/WebSocket server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: defaults::HOST.to_string(),
            port: defaults::PORT,
        }
    }
}

impl ServerConfig {
    /// `host:port` bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// MQTT broker and topic settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker URL, e.g. `mqtts://broker.local:8883`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Client ID (auto-generated if not provided)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    /// Command topic template with one `{device_id}` placeholder
    pub command_template: String,

    /// Wildcard pattern covering every device's response topic
    pub response_pattern: String,

    /// Keep-alive interval in seconds
    pub keep_alive_secs: u64,

    /// Delay before polling the event loop again after a connection error
    pub reconnect_interval_ms: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            password: None,
            client_id: None,
            command_template: defaults::COMMAND_TEMPLATE.to_string(),
            response_pattern: defaults::RESPONSE_PATTERN.to_string(),
            keep_alive_secs: defaults::MQTT_KEEP_ALIVE_SECS,
            reconnect_interval_ms: defaults::MQTT_RECONNECT_INTERVAL_MS,
        }
    }
}

/// Check that a command topic template has exactly one `{device_id}`.
pub fn check_command_template(template: &str) -> Result<()> {
    match template.matches(DEVICE_ID_PLACEHOLDER).count() {
        1 => Ok(()),
        n => Err(Error::Validation(format!(
            "command template must contain exactly one {} placeholder, found {}: {}",
            DEVICE_ID_PLACEHOLDER, n, template
        ))),
    }
}

/// Live reading settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadingConfig {
    /// Default wait window for a device reply, in milliseconds
    pub timeout_ms: u64,
}

impl Default for ReadingConfig {
    fn default() -> Self {
        Self {
            timeout_ms: defaults::READ_TIMEOUT_MS,
        }
    }
}

impl ReadingConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Persistent storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the redb database file
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: defaults::DATA_PATH.to_string(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from an optional TOML file plus the process
    /// environment, then validate it.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply overrides from a key lookup (normally the process environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(env_vars::HOST) {
            self.server.host = host;
        }
        if let Some(port) = lookup(env_vars::PORT) {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("{} is not a port: {}", env_vars::PORT, port)))?;
        }
        if let Some(url) = lookup(env_vars::MQTT_URL) {
            self.mqtt.url = Some(url);
        }
        if let Some(user) = lookup(env_vars::MQTT_USER) {
            self.mqtt.username = Some(user);
        }
        if let Some(pass) = lookup(env_vars::MQTT_PASS) {
            self.mqtt.password = Some(pass);
        }
        if let Some(template) = lookup(env_vars::MQTT_CMD_TEMPLATE) {
            self.mqtt.command_template = template;
        }
        if let Some(pattern) = lookup(env_vars::MQTT_RESP_WILDCARD) {
            self.mqtt.response_pattern = pattern;
        }
        if let Some(timeout) = lookup(env_vars::READ_TIMEOUT_MS) {
            self.readings.timeout_ms = timeout.trim().parse().map_err(|_| {
                Error::Config(format!(
                    "{} is not a number of milliseconds: {}",
                    env_vars::READ_TIMEOUT_MS,
                    timeout
                ))
            })?;
        }
        if let Some(path) = lookup(env_vars::DATA_PATH) {
            self.storage.path = path;
        }
        Ok(())
    }

    /// Check invariants the relay depends on at startup.
    pub fn validate(&self) -> Result<()> {
        check_command_template(&self.mqtt.command_template)?;
        if self.mqtt.response_pattern.trim().is_empty() {
            return Err(Error::Validation("response pattern is empty".to_string()));
        }
        if self.readings.timeout_ms == 0 {
            return Err(Error::Validation(
                "read timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.mqtt.command_template, "devices/{device_id}/cmd");
        assert_eq!(config.mqtt.response_pattern, "devices/+/resp");
        assert_eq!(config.readings.default_timeout(), Duration::from_millis(5000));
        assert!(config.mqtt.url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = RelayConfig::default();
        config
            .apply_overrides(lookup_from(&[
                ("PORT", "8080"),
                ("MQTT_URL", "mqtts://broker.local:8883"),
                ("MQTT_USER", "kit"),
                ("MQTT_PASS", "secret"),
                ("MQTT_CMD_TEMPLATE", "kits/{device_id}/command"),
                ("MQTT_RESP_WILDCARD", "kits/+/reply"),
                ("READ_TIMEOUT_MS", "2500"),
            ]))
            .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.mqtt.url.as_deref(), Some("mqtts://broker.local:8883"));
        assert_eq!(config.mqtt.username.as_deref(), Some("kit"));
        assert_eq!(config.mqtt.password.as_deref(), Some("secret"));
        assert_eq!(config.mqtt.command_template, "kits/{device_id}/command");
        assert_eq!(config.mqtt.response_pattern, "kits/+/reply");
        assert_eq!(config.readings.timeout_ms, 2500);
    }

    #[test]
    fn test_bad_timeout_override() {
        let mut config = RelayConfig::default();
        let err = config
            .apply_overrides(lookup_from(&[("READ_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("READ_TIMEOUT_MS"));
    }

    #[test]
    fn test_template_requires_one_placeholder() {
        let mut config = RelayConfig::default();
        config.mqtt.command_template = "devices/cmd".to_string();
        assert!(matches!(config.validate(), Err(Error::Validation(_))));

        config.mqtt.command_template = "{device_id}/{device_id}".to_string();
        assert!(matches!(config.validate(), Err(Error::Validation(_))));

        assert!(check_command_template("kits/{device_id}/command").is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = RelayConfig::default();
        config.readings.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml_partial() {
        let config = RelayConfig::from_toml(
            r#"
            [server]
            port = 9000

            [mqtt]
            url = "mqtt://localhost"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.mqtt.url.as_deref(), Some("mqtt://localhost"));
        assert_eq!(config.mqtt.response_pattern, "devices/+/resp");
        assert_eq!(config.readings.timeout_ms, 5000);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("templine.toml");
        std::fs::write(&path, "[readings]\ntimeout_ms = 1200\n").unwrap();

        let config = RelayConfig::from_file(&path).unwrap();
        assert_eq!(config.readings.timeout_ms, 1200);
    }
}
