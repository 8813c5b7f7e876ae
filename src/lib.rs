//! # lorabridge - Serial LoRa Gate to MQTT Gateway
//!
//! lorabridge sits between a LoRa concentrator ("the gate") attached over a
//! serial line and an MQTT broker. Uplink data from end devices is decoded by
//! per-module codecs and published as JSON; text commands published to the
//! broker are encoded and delivered to devices with per-device retries and,
//! for always-listening devices, invitations.
//!
//! ## Features
//!
//! - **Line protocol**: typed encoding/decoding of the gate's ASCII protocol.
//! - **Reliable delivery**: one frame in flight per device, fixed-interval data
//!   retries, linearly backed-off invites, bounded give-up with an error
//!   publication.
//! - **Module codecs**: GPIO, 4-button keypad, LMT01, SHT21, PIR and ADC boards.
//! - **Static provisioning**: devices listed in a file are pushed to the gate
//!   at startup.
//! - **Daemon Mode**: background service support on Unix with TTY-aware logging.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lorabridge::config::Config;
//! use lorabridge::gateway::Gateway;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     Gateway::open(config)?.run().await
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`gate`] - serial link, line framing and the reply/command codec
//! - [`registry`] - device table and per-device outbound queues
//! - [`scheduler`] - retry/invite timing over the registry
//! - [`processor`] - dispatch of gate replies
//! - [`modules`] - module codecs and their registry
//! - [`mqtt`] - broker bridge: topics, JSON envelope, client, command router
//! - [`static_devices`] - statically provisioned device file
//! - [`config`] - configuration loading and defaults
//! - [`gateway`] - wiring of all workers
//! - `testing` - in-memory port and publisher for tests (`testing` feature)
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   lines   ┌─────────────────┐  JSON   ┌────────────┐
//! │ Link reader  │ ────────► │ Reply processor │ ──────► │            │
//! │ (OS thread)  │  (mpsc)   └─────────────────┘         │    MQTT    │
//! └──────────────┘                   │                   │   broker   │
//!        ▲                    ┌──────────────┐  enqueue  │            │
//!        │  serial            │   Registry   │ ◄──────── │            │
//!        │                    └──────────────┘  router   └────────────┘
//! ┌──────────────┐                   │
//! │  Scheduler   │ ◄─────────────────┘
//! └──────────────┘
//! ```

pub mod config;
pub mod device;
pub mod gate;
pub mod gateway;
pub mod logutil;
pub mod metrics;
pub mod modules;
pub mod mqtt;
pub mod processor;
pub mod registry;
pub mod scheduler;
pub mod static_devices;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
