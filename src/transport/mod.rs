//! Transport layer for I/O abstraction
//!
//! A transport is a byte pipe with a timeout-bounded read. Framing into
//! lines and JSON documents happens one layer up in [`crate::protocol`].

use crate::config::{LinkConfig, TransportKind};
use crate::error::Result;
use std::time::Duration;

pub mod mock;
mod serial;
mod tcp;
mod telnet;

pub use mock::MockTransport;
pub use serial::SerialTransport;
pub use tcp::TcpTransport;
pub use telnet::TelnetTransport;

/// Smallest timeout handed to the OS; zero means "block forever" on some
/// platforms.
pub(crate) const MIN_OS_TIMEOUT: Duration = Duration::from_millis(1);

/// Transport trait for controller communication
pub trait Transport: Send {
    /// Read available bytes, waiting at most `timeout`
    ///
    /// Returns `Ok(0)` when nothing arrived in time. A timeout is not an
    /// error at this layer.
    fn read(&mut self, buffer: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Write the whole buffer
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Flush any pending writes (blocking until complete)
    fn flush(&mut self) -> Result<()>;

    /// Release the OS handle
    ///
    /// Must be idempotent: closing an already closed transport is `Ok(())`.
    fn close(&mut self) -> Result<()>;

    /// Whether the OS handle is still held
    fn is_open(&self) -> bool;

    /// Endpoint description for logs (port path or host:port)
    fn describe(&self) -> String;
}

/// Open the transport selected by configuration
pub fn open(config: &LinkConfig) -> Result<Box<dyn Transport>> {
    match config.kind {
        TransportKind::Serial => Ok(Box::new(SerialTransport::open(config)?)),
        TransportKind::Tcp => Ok(Box::new(TcpTransport::connect(
            &config.host,
            config.tcp_port,
            config.connect_timeout(),
        )?)),
        TransportKind::Telnet => Ok(Box::new(TelnetTransport::connect(
            &config.host,
            config.tcp_port,
            config.connect_timeout(),
        )?)),
    }
}

/// List local serial ports (for presentation layers only)
pub fn available_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports()?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
