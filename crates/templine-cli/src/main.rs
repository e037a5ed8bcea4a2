//! Command-line interface for the Templine sensor relay.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use templine_api::{shutdown_signal, AppState, Assistant};
use templine_core::config::env_vars;
use templine_core::{ProfileStore, ReadingCache, RelayConfig};
use templine_devices::{
    CommandPublisher, CorrelationRegistry, MqttTransport, ReadingService, ResponseListener,
    Transport,
};
use templine_storage::RedbStore;

/// Templine - live sensor readings for voice callers over MQTT.
#[derive(Parser, Debug)]
#[command(name = "templine")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file (TOML). Environment variables override it.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start the relay server.
    Serve {
        /// Host to bind to.
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Read a device once and print the result.
    Read {
        /// Device identifier.
        device_id: String,
        /// Wait window for the live reading.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Register a caller's device.
    Register {
        /// Caller identity (phone number).
        caller: String,
        /// Device identifier.
        device_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = RelayConfig::load(args.config.as_deref()).context("invalid configuration")?;

    match args.command {
        Command::Serve { host, port } => run_server(config, host, port).await,
        Command::Read {
            device_id,
            timeout_ms,
        } => run_read(config, &device_id, timeout_ms).await,
        Command::Register { caller, device_id } => run_register(config, &caller, &device_id).await,
    }
}

fn init_logging(verbose: bool) {
    // JSON format for production/container environments
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = if verbose {
            "debug".to_string()
        } else {
            std::env::var(env_vars::LOG_LEVEL).unwrap_or_else(|_| "info".to_string())
        };
        tracing_subscriber::EnvFilter::new(format!("templine={}", level))
            .add_directive(tracing::Level::WARN.into())
    });

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .compact()
            .init();
    }
}

/// Response listener, publisher and reading service over one transport.
async fn reading_service(
    config: &RelayConfig,
    transport: Arc<dyn Transport>,
    cache: Arc<dyn ReadingCache>,
) -> Result<Arc<ReadingService>> {
    let registry = CorrelationRegistry::new();
    ResponseListener::new(registry.clone())
        .start(transport.clone(), &config.mqtt.response_pattern)
        .await
        .context("failed to subscribe to device responses")?;

    let publisher = CommandPublisher::from_template(transport, &config.mqtt.command_template)
        .context("invalid command topic template")?;

    Ok(Arc::new(ReadingService::new(
        registry,
        publisher,
        cache,
        config.readings.default_timeout(),
    )))
}

fn open_store(config: &RelayConfig) -> Result<Arc<RedbStore>> {
    let store = RedbStore::open(&config.storage.path)
        .with_context(|| format!("failed to open store at {}", config.storage.path))?;
    Ok(Arc::new(store))
}

async fn run_server(mut config: RelayConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let store = open_store(&config)?;
    let mqtt = Arc::new(MqttTransport::connect(&config.mqtt).context("failed to start MQTT client")?);
    let readings = reading_service(&config, mqtt.clone(), store.clone()).await?;

    info!(
        command_template = %config.mqtt.command_template,
        response_pattern = %config.mqtt.response_pattern,
        timeout_ms = config.readings.timeout_ms,
        "Reading service ready"
    );

    let state = AppState::new(Assistant::new(store, readings.clone()));
    let result = templine_api::serve(&config.server, state, shutdown_signal()).await;

    readings.flush().await;
    mqtt.disconnect().await;
    result
}

async fn run_read(config: RelayConfig, device_id: &str, timeout_ms: Option<u64>) -> Result<()> {
    let store = open_store(&config)?;
    let mqtt = Arc::new(MqttTransport::connect(&config.mqtt).context("failed to start MQTT client")?);
    let readings = reading_service(&config, mqtt.clone(), store).await?;

    let result = readings
        .get_reading(device_id, timeout_ms.map(Duration::from_millis))
        .await;
    readings.flush().await;
    mqtt.disconnect().await;

    let snapshot = result.with_context(|| format!("no reading for {}", device_id))?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn run_register(config: RelayConfig, caller: &str, device_id: &str) -> Result<()> {
    let store = open_store(&config)?;
    store
        .register_caller(caller, device_id)
        .await
        .context("failed to register caller")?;
    println!("Registered {} -> {}", caller, device_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_read() {
        let args =
            Args::try_parse_from(["templine", "read", "kit-001", "--timeout-ms", "1500"]).unwrap();
        match args.command {
            Command::Read {
                device_id,
                timeout_ms,
            } => {
                assert_eq!(device_id, "kit-001");
                assert_eq!(timeout_ms, Some(1500));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_flags() {
        let args = Args::try_parse_from([
            "templine",
            "serve",
            "--port",
            "8080",
            "--config",
            "templine.toml",
            "-v",
        ])
        .unwrap();
        assert!(args.verbose);
        assert_eq!(args.config, Some(PathBuf::from("templine.toml")));
        assert!(matches!(
            args.command,
            Command::Serve {
                host: None,
                port: Some(8080)
            }
        ));
    }

    #[test]
    fn test_register_requires_device() {
        assert!(Args::try_parse_from(["templine", "register", "+15551234567"]).is_err());
    }
}
