//! Serial protocol communication
//!
//! Implements the ACE Pro framing protocol: length-prefixed, CRC16-checked
//! packets carrying JSON-RPC style request/response payloads, plus the
//! transactional session that serializes commands over one serial link.

pub mod commands;
mod error;
mod packet;
mod session;
pub mod transport;

pub use commands::DeviceInfo;
pub use error::{CommandError, FramingError};
pub use packet::{crc16, decode, decode_payload, encode, encode_payload, take_frame, Request, Response};
pub use session::{Session, SessionConfig};
pub use transport::{Connector, SerialConnector, SerialTransport, Transport};

use std::time::Duration;

/// Fixed two-byte magic opening every frame
pub const PACKET_HEADER: [u8; 2] = [0xFF, 0xAA];

/// Fixed sentinel byte closing every frame
pub const PACKET_TAIL: u8 = 0xFE;

/// Smallest well-formed frame: header + length + empty payload + CRC + tail
pub const MIN_PACKET_SIZE: usize = 7;

/// Default baud rate for ACE units
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default per-command response budget
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Request ids are monotonic per session and wrap at this modulus
pub const REQUEST_ID_MODULUS: u32 = 300_000;

/// Lowest motor speed the firmware accepts
pub const SPEED_MIN: u32 = 10;

/// Highest motor speed the firmware accepts
pub const SPEED_MAX: u32 = 80;

/// Dryer run time used when the caller does not specify one
pub const DEFAULT_DRYER_MINUTES: u32 = 240;
