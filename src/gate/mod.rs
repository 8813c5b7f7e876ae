//! # Gate Communication Module
//!
//! Everything that touches the serial-attached radio concentrator ("the gate").
//! The gate speaks a line-oriented ASCII protocol: one tag character followed
//! by fixed-width hex fields, CR-terminated towards the gate and LF-terminated
//! from it.
//!
//! ## Pieces
//!
//! - [`frame`]: typed [`Command`] / [`Reply`] records and their line encoding
//! - [`lines`]: incremental LF splitter with an oversize guard
//! - [`link`]: the serial port behind the link lock
//! - [`reader`]: the reader thread feeding the decoupling channel
//!
//! ## Example
//!
//! ```rust,no_run
//! use lorabridge::gate::{Command, GateLink};
//!
//! fn main() -> anyhow::Result<()> {
//!     let link = GateLink::open_serial("/dev/ttyUSB0", 115200)?;
//!     link.send(&Command::ListDevices)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```toml
//! [gate]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! poll_interval_ms = 20
//! ```

pub mod frame;
pub mod lines;
pub mod link;
pub mod reader;

pub use frame::{Command, FrameError, Reply, StatusByte};
pub use lines::{LineError, LineFramer};
pub use link::{GateLink, LinkError, Port};
pub use reader::LinkReader;
