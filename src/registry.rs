//! Fixed-capacity table of known devices and their outbound queues.
//!
//! Slots are an owned arena of `Option<DeviceRecord>` plus an id index, so a
//! lookup never scans and no caller ever sees a raw slot number. The table
//! never grows past the capacity it was built with: `upsert` on a full table
//! fails and leaves every existing slot untouched.
//!
//! All access goes through one registry-wide mutex ([`SharedRegistry`]). When
//! a caller also needs the gate link, the registry lock is taken first.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use thiserror::Error;

use crate::device::{DeviceClass, DeviceId};

pub const DEFAULT_CAPACITY: usize = 1000;

/// Per-device queue limit. The pending-frame announcement carries the queue
/// length in one byte, so a queue never holds more than that can express.
pub const MAX_QUEUED: usize = u8::MAX as usize;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("device registry full ({capacity} devices)")]
    Full { capacity: usize },
    #[error("device {0} is not registered")]
    Absent(DeviceId),
    #[error("queue for {id} full ({capacity} commands)")]
    QueueFull { id: DeviceId, capacity: usize },
}

/// Live state of one device.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub id: DeviceId,
    pub class: DeviceClass,
    queue: VecDeque<String>,
    /// Last transmission of the queue head; `None` means "long ago".
    pub last_send: Option<Instant>,
    pub last_invite: Option<Instant>,
    /// Consecutive attempts for the current queue head (data or invite).
    pub retries: u32,
    /// Set while the device has to be (re)invited before data can flow.
    pub invited: bool,
    /// On-demand devices: the gate reported the device is listening right now.
    pub can_send: bool,
}

impl DeviceRecord {
    fn new(id: DeviceId, class: DeviceClass, was_joined: bool) -> Self {
        Self {
            id,
            class,
            queue: VecDeque::new(),
            last_send: None,
            last_invite: None,
            retries: 0,
            invited: !was_joined,
            can_send: false,
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Frames to announce to the gate as pending for this device.
    pub fn pending_frames(&self) -> u8 {
        u8::try_from(self.queue.len()).unwrap_or(u8::MAX)
    }

    pub fn has_queued(&self) -> bool {
        !self.queue.is_empty()
    }

    /// The entry currently in flight, if any. Peeking never removes it.
    pub fn peek_head(&self) -> Option<&str> {
        self.queue.front().map(String::as_str)
    }

    /// Remove the in-flight entry. Only an ack or a give-up may call this.
    pub fn pop_head(&mut self) -> Option<String> {
        self.queue.pop_front()
    }

    fn push(&mut self, entry: String) -> Result<(), RegistryError> {
        if self.queue.len() >= MAX_QUEUED {
            return Err(RegistryError::QueueFull {
                id: self.id,
                capacity: MAX_QUEUED,
            });
        }
        self.queue.push_back(entry);
        Ok(())
    }

    pub fn queued(&self) -> impl Iterator<Item = &str> {
        self.queue.iter().map(String::as_str)
    }
}

/// Whether `upsert` created a record or refreshed an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
}

#[derive(Debug)]
pub struct DeviceRegistry {
    slots: Vec<Option<DeviceRecord>>,
    index: HashMap<DeviceId, usize>,
}

impl DeviceRegistry {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            index: HashMap::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Register a device or refresh an existing one after a (re)join.
    pub fn upsert(
        &mut self,
        id: DeviceId,
        class: DeviceClass,
        was_joined: bool,
    ) -> Result<Upsert, RegistryError> {
        if let Some(rec) = self.find_mut(id) {
            rec.class = class;
            if class.is_always_listening() && was_joined {
                rec.invited = false;
            }
            rec.retries = 0;
            return Ok(Upsert::Updated);
        }

        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(RegistryError::Full {
                capacity: self.capacity(),
            })?;
        self.slots[slot] = Some(DeviceRecord::new(id, class, was_joined));
        self.index.insert(id, slot);
        Ok(Upsert::Created)
    }

    pub fn find(&self, id: DeviceId) -> Option<&DeviceRecord> {
        let slot = *self.index.get(&id)?;
        self.slots[slot].as_ref()
    }

    pub fn find_mut(&mut self, id: DeviceId) -> Option<&mut DeviceRecord> {
        let slot = *self.index.get(&id)?;
        self.slots[slot].as_mut()
    }

    /// Forget a device. Its queue is drained before the slot is released;
    /// returns how many queued entries were discarded.
    pub fn remove(&mut self, id: DeviceId) -> Result<usize, RegistryError> {
        let slot = self.index.remove(&id).ok_or(RegistryError::Absent(id))?;
        let dropped = self.slots[slot]
            .take()
            .map(|mut rec| rec.queue.drain(..).count())
            .unwrap_or(0);
        Ok(dropped)
    }

    /// Append an entry to the device's queue, creating the device as
    /// always-listening and not yet joined when it is unknown. A full queue
    /// rejects the entry and leaves the queue as it was.
    pub fn enqueue(&mut self, id: DeviceId, entry: String) -> Result<Upsert, RegistryError> {
        let outcome = if self.index.contains_key(&id) {
            Upsert::Updated
        } else {
            self.upsert(id, DeviceClass::C, false)?
        };
        match self.find_mut(id) {
            Some(rec) => rec.push(entry)?,
            None => return Err(RegistryError::Absent(id)),
        }
        Ok(outcome)
    }

    pub fn peek_head(&self, id: DeviceId) -> Option<&str> {
        self.find(id)?.peek_head()
    }

    pub fn pop_head(&mut self, id: DeviceId) -> Option<String> {
        self.find_mut(id)?.pop_head()
    }

    /// Live records in table order.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DeviceRecord> {
        self.slots.iter_mut().flatten()
    }
}

/// The registry behind its one lock.
#[derive(Debug, Clone)]
pub struct SharedRegistry(Arc<Mutex<DeviceRegistry>>);

impl SharedRegistry {
    pub fn new(capacity: usize) -> Self {
        Self(Arc::new(Mutex::new(DeviceRegistry::with_capacity(capacity))))
    }

    /// Take the registry lock. A panic in another holder does not leave the
    /// table unusable; the inner value is recovered.
    pub fn lock(&self) -> MutexGuard<'_, DeviceRegistry> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
