//! # Broker Bridge
//!
//! Everything between the gateway and the MQTT broker:
//!
//! - [`topics`]: topic layout for publications, commands and gateway actions
//! - [`envelope`]: the JSON document published for each device event
//! - [`client`]: the `rumqttc` connection and its event loop
//! - [`router`]: turns inbound MQTT commands into gate traffic
//!
//! Publishing goes through the [`Publisher`] trait so the reply processor and
//! the scheduler can run against an in-memory recorder in tests. Publishes
//! never block: a full client queue is reported as an error, logged and
//! counted, and the caller moves on.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use rumqttc::QoS;
use thiserror::Error;

use crate::device::{DeviceClass, DeviceId};
use crate::gate::StatusByte;
use crate::metrics;
use crate::modules::ValuePairs;

pub mod client;
pub mod envelope;
pub mod router;
pub mod topics;

pub use client::{MqttClient, MqttEventLoop};
pub use envelope::{Envelope, JsonValue};
pub use router::CommandRouter;
pub use topics::{GateAction, InboundTarget, TopicScheme};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("mqtt client error: {0}")]
    Client(#[from] rumqttc::ClientError),
    #[error("mqtt connection failed: {0}")]
    Connect(#[from] rumqttc::ConnectionError),
    #[error("broker did not accept the connection within {0:?}")]
    ConnectTimeout(Duration),
    #[error("invalid qos level {0} (expected 0, 1 or 2)")]
    InvalidQos(u8),
}

/// Sink for outgoing broker messages.
pub trait Publisher: Send + Sync {
    fn publish(
        &self,
        topic: &str,
        payload: String,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BridgeError>;
}

pub fn qos_from_level(level: u8) -> Result<QoS, BridgeError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(BridgeError::InvalidQos(other)),
    }
}

/// Composes device publications and hands them to a [`Publisher`].
#[derive(Clone)]
pub struct BrokerBridge {
    publisher: Arc<dyn Publisher>,
    topics: TopicScheme,
    qos: QoS,
    retain: bool,
}

impl BrokerBridge {
    pub fn new(publisher: Arc<dyn Publisher>, topics: TopicScheme, qos: QoS, retain: bool) -> Self {
        Self {
            publisher,
            topics,
            qos,
            retain,
        }
    }

    fn send(&self, topic: String, payload: String) -> Result<(), BridgeError> {
        match self.publisher.publish(&topic, payload, self.qos, self.retain) {
            Ok(()) => {
                metrics::inc_published();
                debug!("mqtt -> {}", topic);
                Ok(())
            }
            Err(e) => {
                metrics::inc_publish_failed();
                warn!("Publish to {} failed: {}", topic, e);
                Err(e)
            }
        }
    }

    /// Module data decoded from an individual reply.
    pub fn publish_data(
        &self,
        id: DeviceId,
        module: &str,
        data: &ValuePairs,
        rssi: i16,
        status: StatusByte,
    ) -> Result<(), BridgeError> {
        let payload = Envelope::new(id, data).with_radio(rssi, status).render();
        self.send(self.topics.device_topic(id, module), payload)
    }

    /// A gateway event (list entry, join, failure) about one device.
    pub fn publish_event(
        &self,
        id: DeviceId,
        name: &str,
        data: &ValuePairs,
    ) -> Result<(), BridgeError> {
        let payload = Envelope::new(id, data).render();
        self.send(self.topics.device_topic(id, name), payload)
    }

    pub fn publish_list_entry(
        &self,
        id: DeviceId,
        app_id: u64,
        last_seen: u16,
        class: DeviceClass,
    ) -> Result<(), BridgeError> {
        let mut data = ValuePairs::new();
        let _ = data.add("appid64", format!("{:016x}", app_id));
        let _ = data.add("last_seen", last_seen);
        let _ = data.add("nodeclass", class.code());
        self.publish_event(id, topics::LIST_TOPIC, &data)
    }

    pub fn publish_joined(&self, id: DeviceId, class: DeviceClass) -> Result<(), BridgeError> {
        let mut data = ValuePairs::new();
        let _ = data.add("joined", 1);
        let _ = data.add("class", class.code());
        self.publish_event(id, topics::JOIN_TOPIC, &data)
    }

    pub fn publish_kicked(&self, id: DeviceId) -> Result<(), BridgeError> {
        let mut data = ValuePairs::new();
        let _ = data.add("joined", 0);
        self.publish_event(id, topics::JOIN_TOPIC, &data)
    }

    /// Delivery of `entry` to `id` was abandoned.
    pub fn publish_failure(
        &self,
        id: DeviceId,
        message: &str,
        entry: &str,
    ) -> Result<(), BridgeError> {
        let mut data = ValuePairs::new();
        let _ = data.add("msg", message);
        let _ = data.add("command", entry);
        self.publish_event(id, topics::ERROR_TOPIC, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingPublisher;

    fn bridge() -> (BrokerBridge, RecordingPublisher) {
        let rec = RecordingPublisher::new();
        let bridge = BrokerBridge::new(
            Arc::new(rec.clone()),
            TopicScheme::default(),
            QoS::AtLeastOnce,
            false,
        );
        (bridge, rec)
    }

    #[test]
    fn qos_levels() {
        assert_eq!(qos_from_level(1).unwrap(), QoS::AtLeastOnce);
        assert!(matches!(qos_from_level(3), Err(BridgeError::InvalidQos(3))));
    }

    #[test]
    fn event_topics_and_payloads() {
        let (bridge, rec) = bridge();
        let id = DeviceId(0xabc);
        bridge.publish_joined(id, DeviceClass::C).unwrap();
        bridge.publish_kicked(id).unwrap();
        bridge.publish_failure(id, "no ack", "I0000000000000abc0100").unwrap();
        bridge.publish_list_entry(id, 0x70b3d57ed0000001, 12, DeviceClass::A).unwrap();

        let msgs = rec.messages();
        assert_eq!(msgs[0].topic, "devices/lora/0000000000000abc/join");
        let joined = msgs[0].json().unwrap();
        assert_eq!(joined["data"]["joined"], 1);
        assert_eq!(joined["data"]["class"], 2);
        assert_eq!(msgs[1].json().unwrap()["data"]["joined"], 0);
        assert_eq!(msgs[2].topic, "devices/lora/0000000000000abc/error");
        assert_eq!(msgs[2].json().unwrap()["data"]["msg"], "no ack");
        let list = msgs[3].json().unwrap();
        assert_eq!(list["data"]["appid64"], "70b3d57ed0000001");
        assert_eq!(list["data"]["nodeclass"], 0);
        assert!(msgs.iter().all(|m| m.qos == QoS::AtLeastOnce && !m.retain));
    }

    #[test]
    fn failed_publish_is_reported() {
        let (bridge, rec) = bridge();
        rec.set_failing(true);
        assert!(bridge.publish_kicked(DeviceId(1)).is_err());
        assert!(rec.messages().is_empty());
    }
}
