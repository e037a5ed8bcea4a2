//! MQTT transport using rumqttc.
//!
//! One broker connection per process. Incoming publishes are fanned out to
//! every subscription stream through a broadcast channel; subscriptions are
//! remembered and re-sent after every reconnect.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use templine_core::MqttConfig;

use crate::transport::{
    filtered_stream, InboundMessage, MessageStream, Transport, TransportError, TransportResult,
};

/// Broker address parsed from a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerEndpoint {
    /// Parse `mqtt://`, `tcp://`, `mqtts://`, `ssl://` or bare `host[:port]`.
    pub fn parse(url: &str) -> TransportResult<Self> {
        let (tls, rest) = match url.split_once("://") {
            Some(("mqtt" | "tcp", rest)) => (false, rest),
            Some(("mqtts" | "ssl", rest)) => (true, rest),
            Some((scheme, _)) => {
                return Err(TransportError::Configuration(format!(
                    "unsupported broker scheme: {}",
                    scheme
                )));
            }
            None => (false, url),
        };

        let authority = rest.split('/').next().unwrap_or_default();
        let default_port = if tls { 8883 } else { 1883 };
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| {
                    TransportError::Configuration(format!("invalid broker port: {}", port))
                })?;
                (host, port)
            }
            None => (authority, default_port),
        };

        if host.is_empty() {
            return Err(TransportError::Configuration(format!(
                "broker URL has no host: {}",
                url
            )));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// MQTT broker connection implementing [`Transport`].
pub struct MqttTransport {
    client: AsyncClient,
    inbound_tx: broadcast::Sender<InboundMessage>,
    subscriptions: Arc<RwLock<HashSet<String>>>,
    running: Arc<AtomicBool>,
}

impl MqttTransport {
    /// Create the client and spawn its event loop.
    ///
    /// The connection itself is established by the event loop; publishes and
    /// subscriptions made before the CONNACK are queued.
    pub fn connect(config: &MqttConfig) -> TransportResult<Self> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| TransportError::Configuration("MQTT URL is not set".to_string()))?;
        let endpoint = BrokerEndpoint::parse(url)?;

        if config.username.is_none() || config.password.is_none() {
            warn!("MQTT credentials missing; set MQTT_USER and MQTT_PASS");
        }

        let client_id = config
            .client_id
            .clone()
            .unwrap_or_else(|| format!("templine-{}", Uuid::new_v4()));
        let mut options = MqttOptions::new(client_id, &endpoint.host, endpoint.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }
        if endpoint.tls {
            options.set_transport(rumqttc::Transport::tls_with_default_config());
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        let (inbound_tx, _) = broadcast::channel(1024);

        let transport = Self {
            client,
            inbound_tx,
            subscriptions: Arc::new(RwLock::new(HashSet::new())),
            running: Arc::new(AtomicBool::new(true)),
        };

        tokio::spawn(run_event_loop(
            eventloop,
            transport.client.clone(),
            transport.inbound_tx.clone(),
            transport.subscriptions.clone(),
            transport.running.clone(),
            endpoint.addr(),
            Duration::from_millis(config.reconnect_interval_ms),
        ));

        info!(broker = %endpoint.addr(), tls = endpoint.tls, "MQTT client started");
        Ok(transport)
    }

    /// Stop the event loop and disconnect from the broker.
    pub async fn disconnect(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "MQTT disconnect request failed");
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> TransportResult<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(TransportError::Stopped);
        }
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    async fn subscribe(&self, pattern: &str) -> TransportResult<MessageStream> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(TransportError::Stopped);
        }
        // Receiver first, so nothing published after the SUBSCRIBE is missed.
        let rx = self.inbound_tx.subscribe();
        self.client
            .subscribe(pattern, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        self.subscriptions.write().await.insert(pattern.to_string());

        info!(pattern = %pattern, "MQTT subscribed");
        Ok(filtered_stream(rx, pattern.to_string()))
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    inbound_tx: broadcast::Sender<InboundMessage>,
    subscriptions: Arc<RwLock<HashSet<String>>>,
    running: Arc<AtomicBool>,
    broker: String,
    reconnect_interval: Duration,
) {
    let mut connected_once = false;
    let mut error_count: u64 = 0;

    while running.load(Ordering::SeqCst) {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let _ = inbound_tx.send(InboundMessage {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                });
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                error_count = 0;
                info!(broker = %broker, "MQTT connected");
                if connected_once {
                    // try_subscribe: this task drives the request queue, so
                    // awaiting capacity here could never complete.
                    for pattern in subscriptions.read().await.iter() {
                        if let Err(e) = client.try_subscribe(pattern.as_str(), QoS::AtLeastOnce) {
                            error!(pattern = %pattern, error = %e, "MQTT resubscribe failed");
                        }
                    }
                }
                connected_once = true;
            }
            Ok(_) => {}
            Err(e) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                error_count += 1;
                warn!(broker = %broker, attempt = error_count, error = %e, "MQTT connection error");
                tokio::time::sleep(reconnect_interval).await;
            }
        }
    }

    info!(broker = %broker, "MQTT event loop stopped");
}
