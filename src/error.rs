//! Error types for the bridge
//!
//! Every failure the library can report is a variant of [`BridgeError`].
//! The binary wraps these in `anyhow` for top-level reporting.

use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// The serial device could not be opened (absent, permission denied, busy)
    #[error("failed to open serial port {port}: {source}")]
    SerialOpen {
        port: String,
        #[source]
        source: serialport::Error,
    },

    /// Reading from or querying an open serial port failed
    #[error("serial I/O error: {0}")]
    SerialIo(#[from] std::io::Error),

    /// A received line was not valid UTF-8
    #[error("received line is not valid UTF-8: {0}")]
    Decode(#[from] std::string::FromUtf8Error),

    /// A record could not be encoded as JSON
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    /// The broker was unreachable or the transport failed during the handshake
    #[error("failed to connect to MQTT broker {host}:{port}: {source}")]
    MqttConnect {
        host: String,
        port: u16,
        #[source]
        source: rumqttc::ConnectionError,
    },

    /// The broker answered the handshake with a nonzero return code
    #[error("MQTT connection failed with code {0}")]
    MqttRefused(u8),

    /// No handshake outcome arrived within the connect timeout
    #[error("timed out waiting for MQTT broker {host}:{port}")]
    MqttTimeout { host: String, port: u16 },

    /// A publish could not be queued on the client
    #[error("failed to queue MQTT publish: {0}")]
    Publish(#[from] rumqttc::ClientError),

    /// The client's request queue is full (or its network task is gone),
    /// so the record was not queued
    #[error("MQTT request queue is full, record for '{topic}' dropped")]
    QueueFull { topic: String },

    /// A stop was requested before the bridge finished starting up
    #[error("interrupted during startup")]
    Interrupted,

    /// Configuration failed validation
    #[error("invalid configuration: {0}")]
    Config(String),
}
