//! Inbound MQTT commands -> gate traffic.
//!
//! A command to one device is encoded by the module codec and appended to
//! that device's queue; the scheduler delivers it. A broadcast (`*`) and the
//! gateway actions go straight to the link.

use std::sync::Arc;

use log::{debug, info, warn};
use thiserror::Error;

use crate::device::DeviceId;
use crate::gate::{Command, GateLink, LinkError};
use crate::logutil::escape_log;
use crate::modules::{CodecError, CodecRegistry};
use crate::processor::ListWindow;
use crate::registry::{RegistryError, SharedRegistry, Upsert};

use super::topics::{GateAction, InboundTarget, TopicScheme};

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("command payload is not UTF-8")]
    NotText,
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// What happened to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Appended to a device queue; `created` when the device was unknown.
    Queued {
        id: DeviceId,
        entry: String,
        created: bool,
    },
    Broadcast(String),
    Gate(GateAction),
    /// Not a command (our own publication, foreign topic).
    Ignored,
}

#[derive(Clone)]
pub struct CommandRouter {
    registry: SharedRegistry,
    link: GateLink,
    codecs: Arc<CodecRegistry>,
    topics: TopicScheme,
    list_window: ListWindow,
}

impl CommandRouter {
    pub fn new(
        registry: SharedRegistry,
        link: GateLink,
        codecs: Arc<CodecRegistry>,
        topics: TopicScheme,
        list_window: ListWindow,
    ) -> Self {
        Self {
            registry,
            link,
            codecs,
            topics,
            list_window,
        }
    }

    pub fn subscription(&self) -> String {
        self.topics.subscription()
    }

    /// Route one inbound publish. Errors are for the caller to log; nothing
    /// here is fatal.
    pub fn handle(&self, topic: &str, payload: &[u8]) -> Result<Routed, RouteError> {
        // Our own JSON envelopes loop back through the wildcard subscription.
        if payload.first() == Some(&b'{') {
            return Ok(Routed::Ignored);
        }
        let Some(target) = self.topics.parse_inbound(topic) else {
            return Ok(Routed::Ignored);
        };
        let text = std::str::from_utf8(payload).map_err(|_| RouteError::NotText)?.trim();

        match target {
            InboundTarget::Device { id, module } => self.queue_for_device(id, &module, text),
            InboundTarget::Broadcast { module } => {
                let payload = self.codecs.encode(&module, text)?;
                let cmd = Command::Broadcast { payload };
                self.link.send(&cmd)?;
                info!("Broadcast {} command '{}'", module, escape_log(text));
                Ok(Routed::Broadcast(cmd.encode()))
            }
            InboundTarget::Gate(action) => {
                let cmd = match action {
                    GateAction::List => {
                        // Requested by a user, so the answers get published.
                        self.list_window.close();
                        Command::ListDevices
                    }
                    GateAction::Ping => Command::Ping,
                    GateAction::Flush => Command::Flush,
                };
                self.link.send(&cmd)?;
                info!("Gate action {:?} requested over MQTT", action);
                Ok(Routed::Gate(action))
            }
        }
    }

    fn queue_for_device(
        &self,
        id: DeviceId,
        module: &str,
        text: &str,
    ) -> Result<Routed, RouteError> {
        let payload = self.codecs.encode(module, text)?;
        let entry = Command::Individual { id, payload }.encode();

        let (created, announce) = {
            let mut reg = self.registry.lock();
            let created = reg.enqueue(id, entry.clone())? == Upsert::Created;
            let announce = reg
                .find(id)
                .filter(|rec| rec.class.is_on_demand())
                .map(|rec| rec.pending_frames());
            (created, announce)
        };
        if created {
            info!("Unknown device {} created by {} command", id, module);
        }
        debug!("Queued {} for {}", escape_log(&entry), id);

        if let Some(count) = announce {
            if let Err(e) = self.link.send(&Command::AnnouncePending { id, count }) {
                warn!("Failed to announce pending frames for {}: {}", id, e);
            }
        }
        Ok(Routed::Queued { id, entry, created })
    }
}
