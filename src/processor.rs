//! Reply processor: the consumer side of the decoupling channel.
//!
//! Each line from the gate is decoded into a [`Reply`] and dispatched:
//! registry updates happen under the registry lock, and every publish and
//! link write happens after that lock is released.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::device::{DeviceClass, DeviceId};
use crate::gate::{Command, FrameError, GateLink, Reply, StatusByte};
use crate::logutil::{escape_log, hex_preview};
use crate::metrics;
use crate::modules::{CodecError, CodecRegistry};
use crate::mqtt::BrokerBridge;
use crate::registry::{RegistryError, SharedRegistry};

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("bad reply line: {0}")]
    Frame(#[from] FrameError),
    #[error("payload from {id} not decoded: {source}")]
    Codec {
        id: DeviceId,
        #[source]
        source: CodecError,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Suppresses list publications while a gateway-initiated device listing is
/// being answered.
#[derive(Debug, Clone, Default)]
pub struct ListWindow {
    deadline: Arc<Mutex<Option<Instant>>>,
}

impl ListWindow {
    pub fn open(&self, length: Duration) {
        *self.lock() = Some(Instant::now() + length);
    }

    pub fn close(&self) {
        *self.lock() = None;
    }

    pub fn is_open(&self, now: Instant) -> bool {
        matches!(*self.lock(), Some(deadline) if now < deadline)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.deadline.lock().unwrap_or_else(|p| p.into_inner())
    }
}

pub struct ReplyProcessor {
    registry: SharedRegistry,
    link: GateLink,
    codecs: Arc<CodecRegistry>,
    bridge: BrokerBridge,
    list_window: ListWindow,
    last_pong: Option<Instant>,
}

impl ReplyProcessor {
    pub fn new(
        registry: SharedRegistry,
        link: GateLink,
        codecs: Arc<CodecRegistry>,
        bridge: BrokerBridge,
        list_window: ListWindow,
    ) -> Self {
        Self {
            registry,
            link,
            codecs,
            bridge,
            list_window,
            last_pong: None,
        }
    }

    /// When the gate last answered a ping.
    pub fn last_pong(&self) -> Option<Instant> {
        self.last_pong
    }

    /// Consume lines until every sender is gone.
    pub async fn run(mut self, mut rx: mpsc::Receiver<String>) {
        info!("Reply processor started");
        while let Some(line) = rx.recv().await {
            if let Err(e) = self.handle_line(&line) {
                if matches!(e, ProcessError::Frame(_)) {
                    metrics::inc_lines_dropped();
                }
                error!("{} (line: {})", e, escape_log(&line));
            }
        }
        info!("Reply channel closed, processor exiting");
    }

    pub fn handle_line(&mut self, line: &str) -> Result<(), ProcessError> {
        debug!("gate -> {}", escape_log(line));
        let reply = Reply::parse(line)?;
        self.dispatch(reply)
    }

    pub fn dispatch(&mut self, reply: Reply) -> Result<(), ProcessError> {
        match reply {
            Reply::Pong => {
                self.last_pong = Some(Instant::now());
                debug!("Gate answered ping");
                Ok(())
            }
            Reply::ListEntry {
                id,
                app_id,
                last_seen,
                class,
            } => self.on_list_entry(id, app_id, last_seen, class),
            Reply::Data {
                id,
                rssi,
                status,
                payload,
            } => self.on_data(id, rssi, status, &payload),
            Reply::Joined { id, class } => self.on_joined(id, class),
            Reply::Kicked { id } => {
                self.on_kicked(id);
                Ok(())
            }
            Reply::Ack { id } => {
                self.on_ack(id);
                Ok(())
            }
            Reply::PendingRequest { id } => {
                self.on_pending_request(id);
                Ok(())
            }
        }
    }

    fn on_list_entry(
        &self,
        id: DeviceId,
        app_id: u64,
        last_seen: u16,
        class: DeviceClass,
    ) -> Result<(), ProcessError> {
        self.registry.lock().upsert(id, class, true)?;
        if self.list_window.is_open(Instant::now()) {
            debug!("Listed {} (class {}), not published", id, class);
            return Ok(());
        }
        let _ = self.bridge.publish_list_entry(id, app_id, last_seen, class);
        Ok(())
    }

    fn on_data(
        &self,
        id: DeviceId,
        rssi: i16,
        status: StatusByte,
        payload: &[u8],
    ) -> Result<(), ProcessError> {
        let (module, values) = self
            .codecs
            .decode(payload)
            .map_err(|source| ProcessError::Codec { id, source })?;
        debug!(
            "{} {} rssi={} payload={}",
            id,
            module,
            rssi,
            hex_preview(payload, 32)
        );
        let _ = self.bridge.publish_data(id, module, &values, rssi, status);
        Ok(())
    }

    fn on_joined(&self, id: DeviceId, class: DeviceClass) -> Result<(), ProcessError> {
        let pending = {
            let mut reg = self.registry.lock();
            reg.upsert(id, class, true)?;
            reg.find(id).map(|rec| rec.pending_frames()).unwrap_or(0)
        };
        info!("Device {} joined as class {}", id, class);
        let _ = self.bridge.publish_joined(id, class);
        if pending > 0 {
            if let Err(e) = self.link.send(&Command::AnnouncePending { id, count: pending }) {
                warn!("Failed to announce {} pending frames for {}: {}", pending, id, e);
            }
        }
        Ok(())
    }

    fn on_kicked(&self, id: DeviceId) {
        let removed = self.registry.lock().remove(id);
        match removed {
            Ok(dropped) => {
                info!("Device {} left the network ({} queued commands dropped)", id, dropped);
                let _ = self.bridge.publish_kicked(id);
            }
            Err(_) => debug!("Kick for unknown device {}", id),
        }
    }

    fn on_ack(&self, id: DeviceId) {
        let mut reg = self.registry.lock();
        let Some(rec) = reg.find_mut(id) else {
            warn!("Ack from unknown device {}", id);
            return;
        };
        rec.invited = false;
        rec.retries = 0;
        match rec.pop_head() {
            Some(entry) => {
                metrics::inc_frames_acked();
                debug!("{} acknowledged {}", id, escape_log(&entry));
            }
            None => debug!("Ack from {} with nothing in flight", id),
        }
    }

    fn on_pending_request(&self, id: DeviceId) {
        let mut reg = self.registry.lock();
        match reg.find_mut(id) {
            Some(rec) if rec.class.is_on_demand() && rec.has_queued() => {
                rec.can_send = true;
                rec.last_send = None;
                debug!("{} is listening, {} frames pending", id, rec.queue_len());
            }
            Some(_) => debug!("Pending request from {} ignored", id),
            None => warn!("Pending request from unknown device {}", id),
        }
    }
}
