//! Protocol errors

use std::time::Duration;
use thiserror::Error;

/// Frame-local validation failures.
///
/// These are recoverable by construction: the polling loop discards the
/// offending frame candidate and keeps waiting for the next one.
#[derive(Error, Debug)]
pub enum FramingError {
    #[error("packet too small: {len} bytes (minimum 7)")]
    TooShort { len: usize },

    #[error("invalid protocol header: {found:02x?}")]
    BadHeader { found: [u8; 2] },

    #[error("incomplete packet: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch { expected: u16, actual: u16 },

    #[error("invalid tail byte: {found:#04x}")]
    BadTail { found: u8 },

    #[error("payload too large for length field: {len} bytes")]
    Oversize { len: usize },

    #[error("JSON payload error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures surfaced at the command boundary, tagged by kind so callers
/// can tell a device rejection from a timeout from a dead link.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("serial port not open")]
    NotConnected,

    #[error("device returned error: {0}")]
    Device(serde_json::Value),

    #[error("command '{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("could not encode request: {0}")]
    Encode(#[from] FramingError),

    #[error("malformed device response: {0}")]
    Malformed(#[source] serde_json::Error),
}
