//! Session management
//!
//! Owns one open serial link and pushes every command through a single
//! transactional primitive: encode, write, poll for one well-formed frame.
//! Commands are strictly serialized behind one lock, so the link is
//! logically half-duplex with exactly one request in flight.

use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::packet::{self, Request};
use super::transport::{Connector, SerialConnector, Transport};
use super::{CommandError, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT, REQUEST_ID_MODULUS};

/// Write + poll attempts per command: the initial try plus one
/// reconnect-and-resend cycle on a transport failure.
const MAX_ATTEMPTS: u32 = 2;

/// Session tuning. Everything timing-related is explicit so multiple device
/// instances with different tuning coexist.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Baud rate for the serial link
    pub baud: u32,
    /// OS-level read/write timeout on the serial handle
    pub serial_timeout: Duration,
    /// Default response budget per command
    pub command_timeout: Duration,
    /// Wait after opening the port; the unit needs time after a USB
    /// connection event before it reliably answers
    pub settle_delay: Duration,
    /// Short pause before each write so back-to-back commands do not
    /// overwhelm the device
    pub write_guard: Duration,
    /// Sleep between read polls while waiting for a response
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            baud: DEFAULT_BAUD_RATE,
            serial_timeout: DEFAULT_TIMEOUT,
            command_timeout: DEFAULT_TIMEOUT,
            settle_delay: Duration::from_millis(200),
            write_guard: Duration::from_millis(50),
            poll_interval: Duration::from_millis(50),
        }
    }
}

struct Inner {
    connector: Box<dyn Connector>,
    transport: Option<Box<dyn Transport>>,
    read_buffer: Vec<u8>,
    next_request_id: u32,
}

impl Inner {
    fn next_id(&mut self) -> u32 {
        self.next_request_id = (self.next_request_id + 1) % REQUEST_ID_MODULUS;
        self.next_request_id
    }
}

/// One connection to a single physical ACE unit.
///
/// Responses are matched to requests FIFO: the firmware answers the single
/// in-flight request before the next one is sent. When a response does carry
/// an id that disagrees with the in-flight request (a late reply from a
/// command that already timed out), it is discarded.
pub struct Session {
    config: SessionConfig,
    inner: Mutex<Inner>,
}

impl Session {
    /// Create a session over a serial port. Does not open the port yet.
    pub fn open(port: &str, config: SessionConfig) -> Self {
        let connector = SerialConnector {
            port: port.to_string(),
            baud: config.baud,
            timeout: config.serial_timeout,
        };
        Self::new(Box::new(connector), config)
    }

    /// Create a session over an arbitrary connector.
    pub fn new(connector: Box<dyn Connector>, config: SessionConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                connector,
                transport: None,
                read_buffer: Vec::new(),
                next_request_id: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means another caller panicked mid-command;
        // the session state itself is still usable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open the link: fresh transport, cleared OS buffers, reset read
    /// buffer, then a settle delay before the device is considered ready.
    pub fn connect(&self) -> Result<(), CommandError> {
        let mut inner = self.lock();
        Self::connect_locked(&mut inner, &self.config)
    }

    fn connect_locked(inner: &mut Inner, config: &SessionConfig) -> Result<(), CommandError> {
        // Close any existing handle first
        inner.transport = None;
        inner.read_buffer.clear();

        let mut transport = inner.connector.open()?;
        transport.clear()?;
        inner.transport = Some(transport);

        info!(
            port = %inner.connector.describe(),
            baud = config.baud,
            "connected"
        );

        // Give the device time to stabilize after connection
        thread::sleep(config.settle_delay);
        Ok(())
    }

    /// Close the link. Idempotent.
    pub fn disconnect(&self) {
        let mut inner = self.lock();
        if inner.transport.take().is_some() {
            info!(port = %inner.connector.describe(), "disconnected");
        }
        inner.read_buffer.clear();
    }

    /// Whether the serial handle is currently open.
    pub fn is_open(&self) -> bool {
        self.lock().transport.is_some()
    }

    /// Endpoint name, for logs and diagnostics.
    pub fn port(&self) -> String {
        self.lock().connector.describe()
    }

    /// Send one command and wait for its response, using the configured
    /// default timeout.
    pub fn send_command(
        &self,
        method: &str,
        params: Option<Map<String, Value>>,
    ) -> Result<Value, CommandError> {
        self.send_command_with_timeout(method, params, self.config.command_timeout)
    }

    /// Send one command and wait up to `timeout` for its response.
    ///
    /// Holds the session lock for the whole round trip. A transport-level
    /// I/O failure triggers exactly one reconnect-and-resend cycle; all
    /// other failures are returned as-is.
    pub fn send_command_with_timeout(
        &self,
        method: &str,
        params: Option<Map<String, Value>>,
        timeout: Duration,
    ) -> Result<Value, CommandError> {
        let mut inner = self.lock();
        if inner.transport.is_none() {
            warn!(method, "serial port not open");
            return Err(CommandError::NotConnected);
        }

        let request = Request::new(inner.next_id(), method, params);
        let frame = packet::encode(&request)?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match Self::transact_once(&mut inner, &self.config, &frame, &request, timeout) {
                Ok(result) => return Ok(result),
                Err(CommandError::Transport(err)) if attempt < MAX_ATTEMPTS => {
                    warn!(method, %err, "transport error, reconnecting and retrying once");
                    if let Err(reconnect_err) = Self::connect_locked(&mut inner, &self.config) {
                        warn!(method, %reconnect_err, "reconnection failed");
                        return Err(reconnect_err);
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One write-then-poll cycle. Shared between the first attempt and the
    /// post-reconnect retry so the two paths cannot drift apart.
    fn transact_once(
        inner: &mut Inner,
        config: &SessionConfig,
        frame: &[u8],
        request: &Request,
        timeout: Duration,
    ) -> Result<Value, CommandError> {
        let Inner {
            transport,
            read_buffer,
            ..
        } = inner;
        let transport = transport.as_mut().ok_or(CommandError::NotConnected)?;

        thread::sleep(config.write_guard);
        transport.write_all(frame)?;
        transport.flush()?;

        let start = Instant::now();
        let mut chunk = [0u8; 512];

        while start.elapsed() < timeout {
            let available = transport.bytes_to_read()?;
            if available > 0 {
                let to_read = available.min(chunk.len());
                let n = transport.read(&mut chunk[..to_read])?;
                read_buffer.extend_from_slice(&chunk[..n]);

                while let Some(candidate) = packet::take_frame(read_buffer) {
                    let response = match packet::decode(&candidate) {
                        Ok(response) => response,
                        Err(err) => {
                            // Frame-local damage must not abort the wait
                            debug!(method = %request.method, %err, "discarding corrupt frame");
                            continue;
                        }
                    };

                    if let Some(id) = response.id {
                        if id != u64::from(request.id) {
                            warn!(
                                method = %request.method,
                                got = id,
                                expected = request.id,
                                "discarding response for a different request"
                            );
                            continue;
                        }
                    }

                    if let Some(result) = response.result {
                        return Ok(result);
                    }
                    if let Some(error) = response.error {
                        warn!(method = %request.method, %error, "device rejected command");
                        return Err(CommandError::Device(error));
                    }
                    debug!(
                        method = %request.method,
                        "response carries neither result nor error, ignoring"
                    );
                }
            }

            thread::sleep(config.poll_interval);
        }

        warn!(method = %request.method, ?timeout, "command timed out");
        Err(CommandError::Timeout {
            method: request.method.clone(),
            timeout,
        })
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.baud, DEFAULT_BAUD_RATE);
        assert_eq!(config.command_timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn request_ids_wrap_at_modulus() {
        let mut inner = Inner {
            connector: Box::new(SerialConnector {
                port: "/dev/null".to_string(),
                baud: DEFAULT_BAUD_RATE,
                timeout: DEFAULT_TIMEOUT,
            }),
            transport: None,
            read_buffer: Vec::new(),
            next_request_id: REQUEST_ID_MODULUS - 1,
        };
        assert_eq!(inner.next_id(), 0);
        assert_eq!(inner.next_id(), 1);
    }

    #[test]
    fn send_before_connect_is_not_connected() {
        let session = Session::open("/dev/ttyACM99", SessionConfig::default());
        assert!(!session.is_open());
        let result = session.send_command("get_status", None);
        assert!(matches!(result, Err(CommandError::NotConnected)));
    }
}
