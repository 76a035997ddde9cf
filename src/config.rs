//! Bridge configuration
//!
//! Every value has a compiled-in default, so the bridge runs with no
//! arguments at all. A TOML file and CLI flags can override any of them.
//!
//! ```toml
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! timeout_ms = 1000
//! broker_host = "10.0.0.5"
//! broker_port = 1883
//! topic = "sensors/uart"
//! poll_interval_ms = 100
//! ```

use crate::error::{BridgeError, Result};
use anyhow::Context;
use rumqttc::QoS;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default serial device
pub const DEFAULT_PORT: &str = "/dev/ttyACM2";
/// Default baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115200;
/// Default serial read timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
/// Default MQTT broker address
pub const DEFAULT_BROKER_HOST: &str = "192.168.127.1";
/// Default MQTT broker port
pub const DEFAULT_BROKER_PORT: u16 = 1883;
/// Default MQTT keepalive interval
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(60);
/// Default topic records are published to
pub const DEFAULT_TOPIC: &str = "input";
/// Default publish QoS (at least once)
pub const DEFAULT_QOS: u8 = 1;
/// Default delay between loop iterations
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Default time allowed for the broker handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// rumqttc refuses keepalive intervals shorter than this
const MIN_KEEPALIVE: Duration = Duration::from_secs(5);

/// Complete bridge configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Serial port path (e.g., /dev/ttyACM0, COM3)
    pub port: String,
    /// Serial baud rate
    pub baud_rate: u32,
    /// Per-open serial read timeout
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
    /// MQTT broker host
    pub broker_host: String,
    /// MQTT broker port
    pub broker_port: u16,
    /// MQTT keepalive interval
    #[serde(rename = "keepalive_secs", with = "secs")]
    pub keepalive: Duration,
    /// Topic every record is published to
    pub topic: String,
    /// Publish quality of service (0, 1 or 2)
    pub qos: u8,
    /// MQTT client id (generated when absent)
    pub client_id: Option<String>,
    /// Fixed sleep between loop iterations
    #[serde(rename = "poll_interval_ms", with = "millis")]
    pub poll_interval: Duration,
    /// Upper bound on waiting for the broker handshake
    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
            broker_host: DEFAULT_BROKER_HOST.to_string(),
            broker_port: DEFAULT_BROKER_PORT,
            keepalive: DEFAULT_KEEPALIVE,
            topic: DEFAULT_TOPIC.to_string(),
            qos: DEFAULT_QOS,
            client_id: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file; missing keys keep their defaults
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse_content(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse TOML configuration content
    pub fn parse_content(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the serial port path
    pub fn with_port(mut self, port: &str) -> Self {
        self.port = port.to_string();
        self
    }

    /// Set the serial baud rate
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    /// Set the broker address
    pub fn with_broker(mut self, host: &str, port: u16) -> Self {
        self.broker_host = host.to_string();
        self.broker_port = port;
        self
    }

    /// Set the publish topic
    pub fn with_topic(mut self, topic: &str) -> Self {
        self.topic = topic.to_string();
        self
    }

    /// Set the delay between loop iterations
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Publish QoS as the client library's type
    pub fn qos(&self) -> Result<QoS> {
        match self.qos {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(BridgeError::Config(format!("unsupported QoS level {}", other))),
        }
    }

    /// Check that the configuration can actually be used
    pub fn validate(&self) -> Result<()> {
        if self.port.trim().is_empty() {
            return Err(BridgeError::Config("serial port must not be empty".into()));
        }
        if self.baud_rate == 0 {
            return Err(BridgeError::Config("baud rate must be positive".into()));
        }
        if self.broker_host.trim().is_empty() {
            return Err(BridgeError::Config("broker host must not be empty".into()));
        }
        if self.topic.is_empty() {
            return Err(BridgeError::Config("topic must not be empty".into()));
        }
        if self.topic.contains(['+', '#']) {
            return Err(BridgeError::Config(format!(
                "topic '{}' contains wildcards and cannot be published to",
                self.topic
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(BridgeError::Config("poll interval must be positive".into()));
        }
        if self.keepalive < MIN_KEEPALIVE {
            return Err(BridgeError::Config(format!(
                "keepalive must be at least {} seconds",
                MIN_KEEPALIVE.as_secs()
            )));
        }
        self.qos()?;
        Ok(())
    }
}

/// Durations stored as integer milliseconds
mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Durations stored as integer seconds
mod secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
