//! Shared rig for integration tests: every worker wired to an in-memory gate
//! and a recording publisher.

use std::sync::Arc;
use std::time::Duration;

use lorabridge::device::DeviceId;
use lorabridge::gate::GateLink;
use lorabridge::modules::CodecRegistry;
use lorabridge::mqtt::{BrokerBridge, CommandRouter, TopicScheme};
use lorabridge::processor::{ListWindow, ReplyProcessor};
use lorabridge::registry::SharedRegistry;
use lorabridge::scheduler::{Scheduler, SchedulerSettings};
use lorabridge::testing::{MemoryPort, RecordingPublisher};
use rumqttc::QoS;

pub const DEV: DeviceId = DeviceId(0x1122334455667788);
pub const DEV_HEX: &str = "1122334455667788";

pub struct Rig {
    pub port: MemoryPort,
    pub link: GateLink,
    pub registry: SharedRegistry,
    pub published: RecordingPublisher,
    pub processor: ReplyProcessor,
    pub scheduler: Scheduler,
    pub router: CommandRouter,
    pub list_window: ListWindow,
}

pub fn settings() -> SchedulerSettings {
    SchedulerSettings {
        tick: Duration::from_millis(100),
        retry_timeout: Duration::from_secs(10),
        max_retries: 3,
        invite_timeout: Duration::from_secs(15),
        max_invite_retries: 5,
        retries_before_invite: 2,
        ping_interval: None,
    }
}

#[allow(dead_code)]
pub fn rig() -> Rig {
    rig_with(settings())
}

pub fn rig_with(settings: SchedulerSettings) -> Rig {
    let port = MemoryPort::new();
    let link = GateLink::new(Box::new(port.clone()));
    let registry = SharedRegistry::new(16);
    let published = RecordingPublisher::new();
    let list_window = ListWindow::default();
    let codecs = Arc::new(CodecRegistry::with_builtin());
    let topics = TopicScheme::default();
    let bridge = BrokerBridge::new(
        Arc::new(published.clone()),
        topics.clone(),
        QoS::AtMostOnce,
        false,
    );
    let processor = ReplyProcessor::new(
        registry.clone(),
        link.clone(),
        codecs.clone(),
        bridge.clone(),
        list_window.clone(),
    );
    let scheduler = Scheduler::new(registry.clone(), link.clone(), bridge, settings);
    let router = CommandRouter::new(
        registry.clone(),
        link.clone(),
        codecs,
        topics,
        list_window.clone(),
    );
    Rig {
        port,
        link,
        registry,
        published,
        processor,
        scheduler,
        router,
        list_window,
    }
}
