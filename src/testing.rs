//! In-memory stand-ins for the serial port and the MQTT client.
//!
//! Both are cheap to clone; clones share state, so a test keeps one handle
//! while the gateway owns the other.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use rumqttc::QoS;

use crate::mqtt::{BridgeError, Publisher};

#[derive(Default)]
struct PortState {
    inbound: VecDeque<u8>,
    written: Vec<u8>,
}

/// A fake gate: bytes injected by the test are what the gate "sent", and
/// everything the gateway writes is captured.
#[derive(Clone, Default)]
pub struct MemoryPort {
    state: Arc<Mutex<PortState>>,
}

impl MemoryPort {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, PortState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Queue bytes for the gateway to read.
    pub fn inject(&self, bytes: &[u8]) {
        self.state().inbound.extend(bytes.iter().copied());
    }

    /// Queue one reply line (LF appended).
    pub fn inject_line(&self, line: &str) {
        let mut state = self.state();
        state.inbound.extend(line.bytes());
        state.inbound.push_back(b'\n');
    }

    pub fn written(&self) -> Vec<u8> {
        self.state().written.clone()
    }

    /// Everything written so far, split on the CR terminator.
    pub fn sent_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.state().written)
            .split('\r')
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Return and forget the lines written so far.
    pub fn take_lines(&self) -> Vec<String> {
        let lines = self.sent_lines();
        self.clear_written();
        lines
    }

    pub fn clear_written(&self) {
        self.state().written.clear();
    }
}

impl Read for MemoryPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.inbound.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(state.inbound.len());
        for (dst, src) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

impl Write for MemoryPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.state().written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
}

impl Published {
    pub fn json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.payload)
    }
}

/// Publisher that records every message instead of sending it.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    messages: Arc<Mutex<Vec<Published>>>,
    fail: Arc<Mutex<bool>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<Published> {
        self.messages.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn take(&self) -> Vec<Published> {
        std::mem::take(&mut *self.messages.lock().unwrap_or_else(|p| p.into_inner()))
    }

    pub fn on_topic(&self, topic: &str) -> Vec<Published> {
        self.messages()
            .into_iter()
            .filter(|m| m.topic == topic)
            .collect()
    }

    /// Make subsequent publishes fail as if the client queue were full.
    pub fn set_failing(&self, failing: bool) {
        *self.fail.lock().unwrap_or_else(|p| p.into_inner()) = failing;
    }
}

impl Publisher for RecordingPublisher {
    fn publish(
        &self,
        topic: &str,
        payload: String,
        qos: QoS,
        retain: bool,
    ) -> Result<(), BridgeError> {
        if *self.fail.lock().unwrap_or_else(|p| p.into_inner()) {
            return Err(BridgeError::Publish("recording publisher set to fail".to_string()));
        }
        self.messages
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(Published {
                topic: topic.to_string(),
                payload,
                qos,
                retain,
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_reads_injected_bytes_in_chunks() {
        let mut port = MemoryPort::new();
        port.inject(b"abcdef");
        let mut buf = [0u8; 4];
        assert_eq!(port.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(port.read(&mut buf).unwrap(), 2);
        assert_eq!(port.read(&mut buf).unwrap_err().kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn port_splits_written_lines() {
        let mut port = MemoryPort::new();
        port.write_all(b"P\rL\r").unwrap();
        assert_eq!(port.take_lines(), vec!["P", "L"]);
        assert!(port.written().is_empty());
    }

    #[test]
    fn recorder_can_fail() {
        let rec = RecordingPublisher::new();
        rec.publish("a", "1".into(), QoS::AtMostOnce, false).unwrap();
        rec.set_failing(true);
        assert!(rec.publish("b", "2".into(), QoS::AtMostOnce, false).is_err());
        assert_eq!(rec.on_topic("a").len(), 1);
        assert_eq!(rec.take().len(), 1);
        assert!(rec.messages().is_empty());
    }
}
