//! UART to MQTT bridge
//!
//! Reads newline-delimited text from a serial device and republishes each
//! line to an MQTT topic as a small JSON envelope:
//!
//! ```json
//! {"data": "23.5", "timestamp": "2024-05-01T12:00:00.123456", "source": "UART"}
//! ```
//!
//! # Modules
//!
//! - [`serial`]: opening the UART and framing its stream by newline
//! - [`mqtt`]: broker connection with an explicit network task
//! - [`bridge`]: the polling loop and its lifecycle
//! - [`record`]: the JSON envelope
//! - [`config`]: compiled-in defaults and TOML overrides

pub mod bridge;
pub mod config;
pub mod error;
pub mod mqtt;
pub mod record;
pub mod serial;

pub use bridge::{run, run_with, Bridge, BridgeState, BridgeStats, StopSignal};
pub use config::BridgeConfig;
pub use error::{BridgeError, Result};
pub use mqtt::{MqttPublisher, RecordSink};
pub use record::Record;
pub use serial::{LineSource, SerialReader};
