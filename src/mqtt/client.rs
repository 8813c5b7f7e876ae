//! `rumqttc` connection: the publishing handle and the event loop task.

use std::time::Duration;

use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};

use super::router::{CommandRouter, Routed};
use super::{BridgeError, Publisher};
use crate::config::MqttConfig;
use crate::logutil::escape_log;

/// Requests buffered between the client handle and the event loop.
const CLIENT_CAPACITY: usize = 256;

pub fn mqtt_options(cfg: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&cfg.client_id, &cfg.host, cfg.port);
    options.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs.max(5)));
    if let Some(username) = &cfg.username {
        options.set_credentials(username, cfg.password.as_deref().unwrap_or_default());
    }
    options
}

/// Publishing handle. Cloning shares the underlying connection.
#[derive(Clone)]
pub struct MqttClient {
    client: AsyncClient,
}

impl MqttClient {
    /// Create the client. Nothing touches the network until the returned
    /// event loop is polled (see [`MqttEventLoop`]).
    pub fn new(cfg: &MqttConfig) -> (Self, EventLoop) {
        let (client, event_loop) = AsyncClient::new(mqtt_options(cfg), CLIENT_CAPACITY);
        (Self { client }, event_loop)
    }

    pub fn inner(&self) -> &AsyncClient {
        &self.client
    }
}

impl Publisher for MqttClient {
    fn publish(
        &self,
        topic: &str,
        payload: String,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BridgeError> {
        self.client
            .try_publish(topic, qos, retain, payload.into_bytes())
            .map_err(BridgeError::from)
    }
}

/// Drives the connection, (re)subscribes on every connect and hands inbound
/// publishes to the command router.
pub struct MqttEventLoop {
    event_loop: EventLoop,
    client: AsyncClient,
    router: CommandRouter,
    qos: QoS,
}

impl MqttEventLoop {
    pub fn new(
        event_loop: EventLoop,
        client: &MqttClient,
        router: CommandRouter,
        qos: QoS,
    ) -> Self {
        Self {
            event_loop,
            client: client.inner().clone(),
            router,
            qos,
        }
    }

    /// Poll until the broker accepts the first connection, then subscribe.
    /// A refused or failed connection is returned, not retried; only drops
    /// after this point are retried by [`run`](Self::run).
    pub async fn connect(&mut self, timeout: Duration) -> Result<(), BridgeError> {
        let event_loop = &mut self.event_loop;
        let first_connack = async {
            loop {
                match event_loop.poll().await? {
                    Event::Incoming(Packet::ConnAck(_)) => return Ok::<(), BridgeError>(()),
                    other => debug!("MQTT event before connect: {:?}", other),
                }
            }
        };
        tokio::time::timeout(timeout, first_connack)
            .await
            .map_err(|_| BridgeError::ConnectTimeout(timeout))??;
        self.subscribe();
        Ok(())
    }

    fn subscribe(&self) {
        let subscription = self.router.subscription();
        info!("Connected to MQTT broker, subscribing to {}", subscription);
        if let Err(e) = self.client.try_subscribe(subscription.as_str(), self.qos) {
            error!("Subscribe to {} failed: {}", subscription, e);
        }
    }

    pub async fn run(mut self) {
        loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => self.subscribe(),
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.dispatch(&publish.topic, &publish.payload);
                }
                Ok(Event::Incoming(Packet::SubAck(_))) => debug!("Subscription acknowledged"),
                Ok(_) => {}
                Err(e) => {
                    // The next poll reconnects.
                    warn!("MQTT connection error: {}; retrying in 1s", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    fn dispatch(&self, topic: &str, payload: &[u8]) {
        match self.router.handle(topic, payload) {
            Ok(Routed::Ignored) => {}
            Ok(routed) => debug!("mqtt <- {}: {:?}", topic, routed),
            Err(e) => warn!(
                "Rejected command on {} ({}): {}",
                topic,
                escape_log(&String::from_utf8_lossy(payload)),
                e
            ),
        }
    }
}
