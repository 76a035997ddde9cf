//! Serial port connection and discovery
//!
//! Opens the UART device the bridge reads from and frames its byte stream
//! into newline-terminated records.

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::serial::LineSource;
use anyhow::Context;
use colored::Colorize;
use serialport::{
    DataBits, FlowControl, Parity, SerialPort, SerialPortInfo, SerialPortType, StopBits,
};
use std::io::{self, Read};
use std::time::{Duration, Instant};

/// Serial connection feeding the bridge
pub struct SerialReader {
    port: Option<Box<dyn SerialPort>>,
    path: String,
    timeout: Duration,
}

impl SerialReader {
    /// Open the serial port described by the configuration (8N1, no flow control)
    pub fn open(config: &BridgeConfig) -> Result<Self> {
        let port = serialport::new(&config.port, config.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(config.timeout)
            .open()
            .map_err(|source| BridgeError::SerialOpen {
                port: config.port.clone(),
                source,
            })?;

        println!(
            "{} Connected to UART port {} at {} baud",
            "[OK]".green().bold(),
            config.port.white().bold(),
            config.baud_rate
        );

        Ok(Self {
            port: Some(port),
            path: config.port.clone(),
            timeout: config.timeout,
        })
    }

    fn port_mut(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial port is closed"))
    }
}

impl LineSource for SerialReader {
    fn has_pending_data(&mut self) -> Result<bool> {
        let pending = self.port_mut()?.bytes_to_read().map_err(io::Error::from)?;
        Ok(pending > 0)
    }

    fn read_line(&mut self) -> Result<Vec<u8>> {
        let timeout = self.timeout;
        let port = self.port_mut()?;
        Ok(read_line_from(port, timeout)?)
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            log::debug!("Closed serial port {}", self.path);
        }
    }
}

impl Drop for SerialReader {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read bytes one at a time until a newline (kept in the output), end of
/// stream, or `timeout` has elapsed since the call started.
pub fn read_line_from<R: Read + ?Sized>(reader: &mut R, timeout: Duration) -> io::Result<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    let mut line = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        match reader.read(&mut byte) {
            Ok(0) => break,
            Ok(_) => {
                line.push(byte[0]);
                if byte[0] == b'\n' {
                    break;
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }

        if Instant::now() >= deadline {
            break;
        }
    }

    Ok(line)
}

/// Short description of how a port is attached, e.g. `USB 2341:0043 Arduino Uno`
fn describe_port_type(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => {
            let name = usb.product.as_deref().or(usb.manufacturer.as_deref());
            match name {
                Some(name) => format!("USB {:04x}:{:04x} {}", usb.vid, usb.pid, name),
                None => format!("USB {:04x}:{:04x}", usb.vid, usb.pid),
            }
        }
        SerialPortType::PciPort => "PCI".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth".to_string(),
        SerialPortType::Unknown => "unknown".to_string(),
    }
}

/// One listing line per port, sorted by path; the bridge's port is starred
fn port_listing(mut ports: Vec<SerialPortInfo>, configured: &str) -> Vec<(bool, String)> {
    ports.sort_by(|a, b| a.port_name.cmp(&b.port_name));
    ports
        .iter()
        .map(|p| {
            let line = format!("{:<24} {}", p.port_name, describe_port_type(&p.port_type));
            (p.port_name == configured, line)
        })
        .collect()
}

/// Print the serial ports the OS reports and whether `configured` is among them
pub fn print_ports(configured: &str) -> anyhow::Result<()> {
    let ports = serialport::available_ports().context("Failed to enumerate serial ports")?;
    let listing = port_listing(ports, configured);

    for (selected, line) in &listing {
        if *selected {
            println!("{} {}", "*".green().bold(), line.white().bold());
        } else {
            println!("  {}", line);
        }
    }

    if !listing.iter().any(|(selected, _)| *selected) {
        println!(
            "{} Configured port {} was not found",
            "[WARN]".yellow().bold(),
            configured
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io::Cursor;

    /// Yields scripted chunks, then reports a read timeout forever
    struct ScriptedPort {
        chunks: VecDeque<io::Result<Vec<u8>>>,
    }

    impl ScriptedPort {
        fn new(chunks: Vec<io::Result<Vec<u8>>>) -> Self {
            Self {
                chunks: chunks.into(),
            }
        }
    }

    impl Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(Ok(mut bytes)) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    if n < bytes.len() {
                        self.chunks.push_front(Ok(bytes.split_off(n)));
                    }
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
                None => Err(io::Error::new(io::ErrorKind::TimedOut, "timed out")),
            }
        }
    }

    #[test]
    fn test_read_line_stops_at_newline() {
        let mut input = Cursor::new(b"23.5\n24.0\n".to_vec());
        let first = read_line_from(&mut input, Duration::from_secs(1)).unwrap();
        let second = read_line_from(&mut input, Duration::from_secs(1)).unwrap();

        assert_eq!(first, b"23.5\n");
        assert_eq!(second, b"24.0\n");
    }

    #[test]
    fn test_read_line_returns_partial_on_timeout() {
        let mut port = ScriptedPort::new(vec![Ok(b"partial".to_vec())]);
        let line = read_line_from(&mut port, Duration::from_secs(1)).unwrap();
        assert_eq!(line, b"partial");
    }

    #[test]
    fn test_read_line_empty_on_timeout() {
        let mut port = ScriptedPort::new(vec![]);
        let line = read_line_from(&mut port, Duration::from_secs(1)).unwrap();
        assert!(line.is_empty());
    }

    #[test]
    fn test_read_line_retries_interrupted() {
        let mut port = ScriptedPort::new(vec![
            Ok(b"ab".to_vec()),
            Err(io::Error::new(io::ErrorKind::Interrupted, "signal")),
            Ok(b"c\n".to_vec()),
        ]);
        let line = read_line_from(&mut port, Duration::from_secs(1)).unwrap();
        assert_eq!(line, b"abc\n");
    }

    #[test]
    fn test_read_line_propagates_io_error() {
        let mut port = ScriptedPort::new(vec![Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "device unplugged",
        ))]);
        assert!(read_line_from(&mut port, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_read_line_honours_deadline() {
        let mut input = Cursor::new(b"never ends".to_vec());
        let line = read_line_from(&mut input, Duration::ZERO).unwrap();
        // a zero timeout still reads the byte already in hand
        assert_eq!(line, b"n");
    }

    #[test]
    fn test_open_missing_port_fails() {
        let config = BridgeConfig::default().with_port("/dev/does-not-exist-uart-bridge");
        let err = SerialReader::open(&config).err().unwrap();
        assert!(matches!(err, BridgeError::SerialOpen { .. }));
    }

    fn port(name: &str, port_type: SerialPortType) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.to_string(),
            port_type,
        }
    }

    #[test]
    fn test_listing_marks_configured_port() {
        let ports = vec![
            port("/dev/ttyS0", SerialPortType::PciPort),
            port("/dev/ttyACM2", SerialPortType::Unknown),
            port("/dev/rfcomm0", SerialPortType::BluetoothPort),
        ];

        let listing = port_listing(ports, "/dev/ttyACM2");
        let selected: Vec<bool> = listing.iter().map(|(s, _)| *s).collect();
        assert_eq!(selected, vec![false, true, false]);
        assert!(listing[0].1.starts_with("/dev/rfcomm0"));
        assert!(listing[0].1.ends_with("Bluetooth"));
        assert!(listing[1].1.ends_with("unknown"));
        assert!(listing[2].1.ends_with("PCI"));
    }

    #[test]
    fn test_listing_without_configured_port() {
        let ports = vec![port("/dev/ttyS0", SerialPortType::PciPort)];
        let listing = port_listing(ports, "/dev/ttyACM2");
        assert_eq!(listing.len(), 1);
        assert!(!listing[0].0);
    }
}
