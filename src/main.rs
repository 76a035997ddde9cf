//! UART to MQTT bridge
//!
//! Republishes every line received on a serial port to an MQTT topic.
//!
//! # Usage
//!
//! ```bash
//! # Run with the compiled-in defaults (/dev/ttyACM2 -> 192.168.127.1:1883, topic "input")
//! uart-mqtt-bridge
//!
//! # Override the port and broker
//! uart-mqtt-bridge -p /dev/ttyUSB0 --broker 10.0.0.5
//!
//! # Load settings from a file, then override the topic
//! uart-mqtt-bridge -c bridge.toml -t sensors/uart
//!
//! # List available serial ports, starring the configured one
//! uart-mqtt-bridge --list-ports
//! ```

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;

use uart_mqtt_bridge::config::BridgeConfig;
use uart_mqtt_bridge::serial;

/// UART to MQTT bridge
///
/// Reads newline-terminated text from a serial port and publishes each line
/// as JSON to an MQTT topic.
#[derive(Parser)]
#[command(name = "uart-mqtt-bridge")]
#[command(author = "Prasanna Gautam")]
#[command(version)]
#[command(about = "Bridge newline-delimited serial input to an MQTT topic")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port path (e.g., /dev/ttyACM0, COM3)
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// MQTT broker host
    #[arg(long)]
    broker: Option<String>,

    /// MQTT broker port
    #[arg(long)]
    broker_port: Option<u16>,

    /// Topic to publish to
    #[arg(short, long)]
    topic: Option<String>,

    /// Delay between serial polls in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// List available serial ports and exit
    #[arg(long)]
    list_ports: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Defaults, then the config file, then individual flags
    fn resolve_config(&self) -> Result<BridgeConfig> {
        let mut config = match self.config {
            Some(ref path) => BridgeConfig::from_file(path)?,
            None => BridgeConfig::default(),
        };

        if let Some(ref port) = self.port {
            config.port = port.clone();
        }
        if let Some(baud) = self.baud {
            config.baud_rate = baud;
        }
        if let Some(ref host) = self.broker {
            config.broker_host = host.clone();
        }
        if let Some(port) = self.broker_port {
            config.broker_port = port;
        }
        if let Some(ref topic) = self.topic {
            config.topic = topic.clone();
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let config = cli.resolve_config()?;

    if cli.list_ports {
        return serial::print_ports(&config.port);
    }

    log::debug!("Resolved configuration: {:?}", config);

    println!(
        "{} Bridging {} ({} baud) to mqtt://{}:{}/{}",
        "[*]".cyan().bold(),
        config.port.white(),
        config.baud_rate,
        config.broker_host,
        config.broker_port,
        config.topic.white()
    );
    println!("{}", "Press Ctrl+C to stop".yellow());

    uart_mqtt_bridge::run(config).await
}
