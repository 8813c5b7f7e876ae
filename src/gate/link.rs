//! Exclusive access to the serial descriptor connected to the gate.
//!
//! The port sits behind a single mutex (the link lock) shared by the reader
//! thread and every command writer. Callers that also hold the registry lock
//! must take it first; the link lock is always innermost.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, trace};
use thiserror::Error;

use super::frame::Command;
use crate::logutil::escape_log;

/// Anything byte-oriented the gate can sit behind: a serial port or, in tests,
/// an in-memory pipe.
pub trait Port: Read + Write + Send {}

impl<T: Read + Write + Send + ?Sized> Port for T {}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to open serial port {port}: {reason}")]
    Open { port: String, reason: String },
    #[error("serial I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("serial support not compiled in (enable the `serial` feature)")]
    Unsupported,
}

#[derive(Clone)]
pub struct GateLink {
    port: Arc<Mutex<Box<dyn Port>>>,
}

impl GateLink {
    pub fn new(port: Box<dyn Port>) -> Self {
        Self {
            port: Arc::new(Mutex::new(port)),
        }
    }

    /// Open the concentrator's serial port. Reads use a short timeout so the
    /// reader thread can poll without holding the link lock for long.
    #[cfg(feature = "serial")]
    pub fn open_serial(path: &str, baud_rate: u32) -> Result<Self, LinkError> {
        use std::time::Duration;

        log::info!("Opening gate serial port {} at {} baud", path, baud_rate);
        let mut builder = serialport::new(path, baud_rate).timeout(Duration::from_millis(10));
        #[cfg(unix)]
        {
            builder = builder
                .data_bits(serialport::DataBits::Eight)
                .stop_bits(serialport::StopBits::One)
                .parity(serialport::Parity::None);
        }
        let mut port = builder.open().map_err(|e| LinkError::Open {
            port: path.to_string(),
            reason: e.to_string(),
        })?;
        let _ = port.write_data_terminal_ready(true);
        // Discard whatever the gate printed before we attached.
        let _ = port.clear(serialport::ClearBuffer::All);
        Ok(Self::new(Box::new(port)))
    }

    #[cfg(not(feature = "serial"))]
    pub fn open_serial(_path: &str, _baud_rate: u32) -> Result<Self, LinkError> {
        Err(LinkError::Unsupported)
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn Port>> {
        self.port.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn send(&self, cmd: &Command) -> Result<(), LinkError> {
        self.send_line(&cmd.encode())
    }

    /// Write one pre-formatted command line followed by CR.
    pub fn send_line(&self, line: &str) -> Result<(), LinkError> {
        let mut port = self.lock();
        port.write_all(line.as_bytes())?;
        port.write_all(b"\r")?;
        port.flush()?;
        drop(port);
        debug!("gate <- {}", escape_log(line));
        Ok(())
    }

    /// Flush pending output, then read whatever input is available without
    /// waiting. Timeouts and would-block conditions report zero bytes.
    pub fn read_available(&self, buf: &mut [u8]) -> Result<usize, LinkError> {
        let mut port = self.lock();
        port.flush()?;
        match port.read(buf) {
            Ok(n) => {
                if n > 0 {
                    trace!("gate -> {} raw bytes", n);
                }
                Ok(n)
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(0)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(LinkError::Io(e)),
        }
    }
}
