//! Topic layout.
//!
//! | direction | plain                        | `miso_mosi = true`                |
//! |-----------|------------------------------|-----------------------------------|
//! | publish   | `<prefix>/<id>/<module>`     | `<prefix>/<id>/miso/<module>`     |
//! | command   | `<prefix>/<id\|*>/<module>`  | `<prefix>/<id\|*>/mosi/<module>`  |
//! | gateway   | `<prefix>/gate/<action>`     | same                              |
//!
//! The subscription is `<prefix>/#`, so in plain mode our own publications
//! come back on command topics; the router filters them by payload.

use crate::device::DeviceId;

pub const DEFAULT_PREFIX: &str = "devices/lora";

/// Event names published next to module data.
pub const LIST_TOPIC: &str = "list";
pub const JOIN_TOPIC: &str = "join";
pub const ERROR_TOPIC: &str = "error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateAction {
    List,
    Ping,
    Flush,
}

impl GateAction {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "list" => Some(GateAction::List),
            "ping" => Some(GateAction::Ping),
            "flush" => Some(GateAction::Flush),
            _ => None,
        }
    }
}

/// Where an inbound message is addressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundTarget {
    Device { id: DeviceId, module: String },
    Broadcast { module: String },
    Gate(GateAction),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    prefix: String,
    miso_mosi: bool,
}

impl TopicScheme {
    pub fn new(prefix: &str, miso_mosi: bool) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
            miso_mosi,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn subscription(&self) -> String {
        format!("{}/#", self.prefix)
    }

    /// Topic a device publication (module data or event) goes to.
    pub fn device_topic(&self, id: DeviceId, name: &str) -> String {
        if self.miso_mosi {
            format!("{}/{}/miso/{}", self.prefix, id, name)
        } else {
            format!("{}/{}/{}", self.prefix, id, name)
        }
    }

    pub fn gate_topic(&self, action: &str) -> String {
        format!("{}/gate/{}", self.prefix, action)
    }

    /// Classify an inbound topic. `None` for anything outside the command
    /// space, including our own `miso` output.
    pub fn parse_inbound(&self, topic: &str) -> Option<InboundTarget> {
        let rest = topic.strip_prefix(&self.prefix)?.strip_prefix('/')?;
        let parts: Vec<&str> = rest.split('/').collect();

        let (target, module) = match parts.as_slice() {
            ["gate", action] => return GateAction::parse(action).map(InboundTarget::Gate),
            [target, "mosi", module] if self.miso_mosi => (*target, *module),
            [target, module] if !self.miso_mosi => (*target, *module),
            _ => return None,
        };
        if module.is_empty() {
            return None;
        }
        if target == "*" {
            return Some(InboundTarget::Broadcast {
                module: module.to_string(),
            });
        }
        if target.len() != 16 || !target.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let id: DeviceId = target.parse().ok()?;
        Some(InboundTarget::Device {
            id,
            module: module.to_string(),
        })
    }
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX, false)
    }
}
