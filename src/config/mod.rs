//! # Configuration Management Module
//!
//! All gateway settings live in one TOML file, organized into sections:
//!
//! - [`GateConfig`] - serial port of the concentrator and reader tuning
//! - [`MqttConfig`] - broker connection and topic layout
//! - [`SchedulerConfig`] - retry and invite timing
//! - [`RegistryConfig`] - device table size
//! - [`LoggingConfig`] - log level and optional log file
//!
//! Every section and every field has a default, so a file only needs the
//! values that differ.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lorabridge::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Gate on {}", config.gate.port);
//!     println!("Broker {}:{}", config.mqtt.host, config.mqtt.port);
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [gate]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! static_devices_file = "static_devices.txt"
//!
//! [mqtt]
//! host = "localhost"
//! port = 1883
//! topic_prefix = "devices/lora"
//!
//! [scheduler]
//! retry_timeout_secs = 10
//! max_retries = 3
//! ```

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::mqtt::topics::DEFAULT_PREFIX;
use crate::registry::DEFAULT_CAPACITY;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub port: String,
    pub baud_rate: u32,
    /// Sleep between serial polls when the port had nothing to read.
    pub poll_interval_ms: u64,
    /// Bound of the reader -> processor line channel.
    pub channel_capacity: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub static_devices_file: Option<String>,
    /// List entries arriving this long after a gateway-initiated `L` are not
    /// published.
    pub list_window_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115200,
            poll_interval_ms: 20,
            channel_capacity: 1024,
            static_devices_file: None,
            list_window_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic_prefix: String,
    /// Publish under `.../miso/...` and accept commands on `.../mosi/...`.
    pub miso_mosi: bool,
    pub qos: u8,
    pub retain: bool,
    pub keep_alive_secs: u64,
    /// How long startup waits for the broker to accept the first connection.
    pub connect_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "lorabridge".to_string(),
            topic_prefix: DEFAULT_PREFIX.to_string(),
            miso_mosi: false,
            qos: 0,
            retain: false,
            keep_alive_secs: 30,
            connect_timeout_secs: 10,
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_ms: u64,
    pub retry_timeout_secs: u64,
    pub max_retries: u32,
    pub invite_timeout_secs: u64,
    pub max_invite_retries: u32,
    pub retries_before_invite: u32,
    /// 0 disables the periodic gate ping.
    pub ping_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            retry_timeout_secs: 10,
            max_retries: 3,
            invite_timeout_secs: 15,
            max_invite_retries: 5,
            retries_before_invite: 2,
            ping_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("lorabridge.log".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config = Self::from_toml(&content)
            .map_err(|e| anyhow!("Invalid config file {}: {}", path, e))?;

        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject values the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.gate.port.trim().is_empty() {
            bail!("gate.port must not be empty");
        }
        if self.gate.channel_capacity == 0 {
            bail!("gate.channel_capacity must be at least 1");
        }
        if self.mqtt.qos > 2 {
            bail!("mqtt.qos must be 0, 1 or 2 (got {})", self.mqtt.qos);
        }
        if self.mqtt.topic_prefix.trim_matches('/').is_empty() {
            bail!("mqtt.topic_prefix must not be empty");
        }
        if self.mqtt.client_id.is_empty() {
            bail!("mqtt.client_id must not be empty");
        }
        if self.mqtt.connect_timeout_secs == 0 {
            bail!("mqtt.connect_timeout_secs must be at least 1");
        }
        if self.registry.capacity == 0 {
            bail!("registry.capacity must be at least 1");
        }
        if self.scheduler.tick_ms == 0 {
            bail!("scheduler.tick_ms must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.gate.baud_rate, 115200);
        assert_eq!(config.gate.channel_capacity, 1024);
        assert_eq!(config.mqtt.topic_prefix, "devices/lora");
        assert_eq!(config.scheduler.max_retries, 3);
        assert_eq!(config.scheduler.retries_before_invite, 2);
        assert_eq!(config.registry.capacity, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config = Config::from_toml(
            r#"
            [gate]
            port = "/dev/ttyACM0"

            [mqtt]
            host = "broker.local"
            miso_mosi = true
            qos = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.gate.port, "/dev/ttyACM0");
        assert_eq!(config.gate.baud_rate, 115200);
        assert_eq!(config.mqtt.host, "broker.local");
        assert!(config.mqtt.miso_mosi);
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.scheduler.invite_timeout_secs, 15);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Config::from_toml("[mqtt]\nqos = 3\n").is_err());
        assert!(Config::from_toml("[registry]\ncapacity = 0\n").is_err());
        assert!(Config::from_toml("[gate]\nbaud_rate = \"fast\"\n").is_err());
    }

    #[tokio::test]
    async fn create_default_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();
        Config::create_default(path).await.unwrap();
        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded.gate.port, Config::default().gate.port);
        assert_eq!(loaded.logging.file.as_deref(), Some("lorabridge.log"));
    }

    #[tokio::test]
    async fn missing_file_names_the_path() {
        let err = Config::load("/nonexistent/lorabridge.toml").await.unwrap_err();
        assert!(err.to_string().contains("/nonexistent/lorabridge.toml"));
    }
}
