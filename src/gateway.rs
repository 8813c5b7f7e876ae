//! Gateway wiring: builds every worker around one gate link and one registry
//! and runs them until shutdown.
//!
//! ```text
//!  serial ──► LinkReader (thread) ──mpsc──► ReplyProcessor ──► BrokerBridge ──► MQTT
//!    ▲                                          │
//!    │                                  SharedRegistry ◄── CommandRouter ◄── MQTT
//!    └──────────── Scheduler (tick) ◄───────────┘
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::gate::{Command, GateLink, LinkError, LinkReader};
use crate::modules::CodecRegistry;
use crate::mqtt::{
    qos_from_level, BrokerBridge, CommandRouter, MqttClient, MqttEventLoop, TopicScheme,
};
use crate::processor::{ListWindow, ReplyProcessor};
use crate::registry::SharedRegistry;
use crate::scheduler::{Scheduler, SchedulerSettings};
use crate::static_devices::{self, StaticDevice};

pub struct Gateway {
    config: Config,
    link: GateLink,
    registry: SharedRegistry,
    codecs: Arc<CodecRegistry>,
    list_window: ListWindow,
    topics: TopicScheme,
}

impl Gateway {
    pub fn new(config: Config, link: GateLink) -> Self {
        let registry = SharedRegistry::new(config.registry.capacity);
        let topics = TopicScheme::new(&config.mqtt.topic_prefix, config.mqtt.miso_mosi);
        Self {
            config,
            link,
            registry,
            codecs: Arc::new(CodecRegistry::with_builtin()),
            list_window: ListWindow::default(),
            topics,
        }
    }

    /// Open the configured serial port and build the gateway around it.
    pub fn open(config: Config) -> Result<Self> {
        let link = GateLink::open_serial(&config.gate.port, config.gate.baud_rate)
            .with_context(|| format!("cannot open gate on {}", config.gate.port))?;
        Ok(Self::new(config, link))
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn list_window(&self) -> &ListWindow {
        &self.list_window
    }

    /// Replace the gate's static table with `devices`.
    pub fn provision_static(&self, devices: &[StaticDevice]) -> Result<(), LinkError> {
        self.link.send(&Command::ClearStatic)?;
        for dev in devices {
            self.link.send(&Command::Provision(*dev))?;
        }
        info!("Provisioned {} static devices", devices.len());
        Ok(())
    }

    /// Ask the gate for its device list without publishing the answers.
    pub fn request_device_list(&self) -> Result<(), LinkError> {
        self.list_window
            .open(Duration::from_millis(self.config.gate.list_window_ms));
        self.link.send(&Command::ListDevices)
    }

    /// Startup traffic: static table (when configured), then the device list.
    pub fn startup(&self) -> Result<()> {
        if let Some(file) = &self.config.gate.static_devices_file {
            let devices = static_devices::load(Path::new(file))?;
            self.provision_static(&devices)?;
        }
        self.request_device_list()?;
        Ok(())
    }

    /// Connect to the broker, start every worker and run until Ctrl-C or
    /// until a worker stops. A broker that cannot be reached here is fatal.
    pub async fn run(self) -> Result<()> {
        let qos = qos_from_level(self.config.mqtt.qos)?;
        let (client, event_loop) = MqttClient::new(&self.config.mqtt);
        let bridge = BrokerBridge::new(
            Arc::new(client.clone()),
            self.topics.clone(),
            qos,
            self.config.mqtt.retain,
        );
        let router = CommandRouter::new(
            self.registry.clone(),
            self.link.clone(),
            self.codecs.clone(),
            self.topics.clone(),
            self.list_window.clone(),
        );

        let mut mqtt = MqttEventLoop::new(event_loop, &client, router, qos);
        let timeout = Duration::from_secs(self.config.mqtt.connect_timeout_secs);
        mqtt.connect(timeout).await.with_context(|| {
            format!(
                "cannot connect to MQTT broker {}:{}",
                self.config.mqtt.host, self.config.mqtt.port
            )
        })?;

        let (tx, rx) = mpsc::channel(self.config.gate.channel_capacity);
        let reader = LinkReader::new(
            self.link.clone(),
            tx,
            Duration::from_millis(self.config.gate.poll_interval_ms),
        );
        reader.spawn().context("failed to start gate reader thread")?;

        let processor = ReplyProcessor::new(
            self.registry.clone(),
            self.link.clone(),
            self.codecs.clone(),
            bridge.clone(),
            self.list_window.clone(),
        );
        let scheduler = Scheduler::new(
            self.registry.clone(),
            self.link.clone(),
            bridge,
            SchedulerSettings::from(&self.config.scheduler),
        );

        let mut processor_task = tokio::spawn(processor.run(rx));
        let mut scheduler_task = tokio::spawn(scheduler.run());
        let mut mqtt_task = tokio::spawn(mqtt.run());

        self.startup()?;
        info!(
            "Gateway running: gate {} <-> mqtt {}:{} ({})",
            self.config.gate.port,
            self.config.mqtt.host,
            self.config.mqtt.port,
            self.topics.subscription()
        );

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
            }
            res = &mut processor_task => {
                error!("Reply processor stopped: {:?}", res);
            }
            res = &mut scheduler_task => {
                error!("Scheduler stopped: {:?}", res);
            }
            res = &mut mqtt_task => {
                error!("MQTT event loop stopped: {:?}", res);
            }
        }

        processor_task.abort();
        scheduler_task.abort();
        mqtt_task.abort();
        if let Err(e) = client.inner().try_disconnect() {
            warn!("MQTT disconnect failed: {}", e);
        }
        info!("Final stats: {}", crate::metrics::snapshot());
        Ok(())
    }
}
