//! Link reader: the producer side of the decoupling channel.
//!
//! The reader does nothing but poll the port, split complete lines and hand
//! each one to the reply processor over a bounded channel. Decoding, registry
//! updates and broker I/O all happen on the consumer side, so a stalled broker
//! can only delay the reader through channel back-pressure once the (large)
//! channel is full.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::mpsc;

use super::lines::LineFramer;
use super::link::{GateLink, LinkError};
use crate::metrics;

/// Outcome of one poll of the serial port.
#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// Number of lines forwarded to the processor.
    Forwarded(usize),
    /// The processor side hung up; the reader should stop.
    Closed,
}

pub struct LinkReader {
    link: GateLink,
    framer: LineFramer,
    tx: mpsc::Sender<String>,
    poll_interval: Duration,
}

impl LinkReader {
    pub fn new(link: GateLink, tx: mpsc::Sender<String>, poll_interval: Duration) -> Self {
        Self {
            link,
            framer: LineFramer::new(),
            tx,
            poll_interval,
        }
    }

    /// Run the reader on its own OS thread. Serial reads block for up to the
    /// port timeout, which must not happen on an async worker.
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("gate-reader".to_string())
            .spawn(move || self.run())
    }

    fn run(mut self) {
        info!("Starting gate reader (poll every {:?})", self.poll_interval);
        loop {
            match self.poll_once() {
                Ok(PollOutcome::Closed) => {
                    warn!("Reply channel closed, stopping gate reader");
                    break;
                }
                // More data may already be waiting; poll again right away.
                Ok(PollOutcome::Forwarded(n)) if n > 0 => continue,
                Ok(PollOutcome::Forwarded(_)) => {}
                Err(e) => error!("Gate read failed: {}", e),
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Read what the port has, split it and forward every complete line.
    /// Blocks only when the channel is full.
    pub fn poll_once(&mut self) -> Result<PollOutcome, LinkError> {
        let mut buf = [0u8; 1024];
        let n = self.link.read_available(&mut buf)?;
        if n > 0 {
            self.framer.push(&buf[..n]);
        }
        let mut forwarded = 0;
        while let Some(next) = self.framer.next_line() {
            match next {
                Ok(line) => {
                    if self.tx.blocking_send(line).is_err() {
                        return Ok(PollOutcome::Closed);
                    }
                    forwarded += 1;
                }
                Err(e) => {
                    metrics::inc_lines_dropped();
                    error!("Dropping reply line: {}", e);
                }
            }
        }
        Ok(PollOutcome::Forwarded(forwarded))
    }
}
