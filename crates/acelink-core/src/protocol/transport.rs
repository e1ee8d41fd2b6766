//! Transport abstraction
//!
//! The session talks to the device through [`Transport`], a narrow seam over
//! whatever carries the bytes. [`SerialTransport`] is the production
//! implementation; the simulator in [`crate::sim`] provides another for
//! hardware-free testing.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

/// Byte channel to one device.
pub trait Transport: Send {
    /// Write the whole buffer.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Push any buffered output toward the device.
    fn flush(&mut self) -> io::Result<()>;

    /// Number of bytes that can be read without blocking.
    fn bytes_to_read(&mut self) -> io::Result<usize>;

    /// Read up to `buf.len()` available bytes.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Discard any pending input and output at the OS level.
    fn clear(&mut self) -> io::Result<()>;
}

/// Opens a fresh [`Transport`] to one device.
///
/// The session keeps its connector for the lifetime of the session so it can
/// tear the link down and rebuild it in place during reconnection.
pub trait Connector: Send {
    /// Open a new transport. Any previous one is expected to be dropped.
    fn open(&mut self) -> io::Result<Box<dyn Transport>>;

    /// Human-readable endpoint name for logs.
    fn describe(&self) -> String;
}

/// [`Transport`] over an open serial handle.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Wrap an already-open serial port.
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.port.write_all(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }

    fn bytes_to_read(&mut self) -> io::Result<usize> {
        self.port
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(io::Error::from)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn clear(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::All)
            .map_err(io::Error::from)
    }
}

/// [`Connector`] that opens a named serial port.
pub struct SerialConnector {
    /// Port path, ideally a stable `/dev/serial/by-path` symlink
    pub port: String,
    /// Baud rate
    pub baud: u32,
    /// OS-level read/write timeout
    pub timeout: Duration,
}

impl Connector for SerialConnector {
    fn open(&mut self) -> io::Result<Box<dyn Transport>> {
        let port = serialport::new(self.port.as_str(), self.baud)
            .timeout(self.timeout)
            .open()
            .map_err(io::Error::from)?;
        Ok(Box::new(SerialTransport::new(port)))
    }

    fn describe(&self) -> String {
        self.port.clone()
    }
}
