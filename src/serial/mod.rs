//! Serial side of the bridge
//!
//! This module provides:
//! - Opening the UART device and reading newline-terminated records
//! - Listing available serial ports, marking the configured one

pub mod port;

pub use port::{print_ports, SerialReader};

use crate::error::Result;

/// A source of newline-terminated records.
///
/// [`SerialReader`] is the production implementation; the bridge loop only
/// talks to this trait.
pub trait LineSource {
    /// Whether unread bytes are buffered. Must not block.
    fn has_pending_data(&mut self) -> Result<bool>;

    /// Read up to and including the next `\n`, or until the read timeout
    /// elapses. May return an empty buffer.
    fn read_line(&mut self) -> Result<Vec<u8>>;

    /// Release the underlying device. Safe to call more than once.
    fn close(&mut self);
}
