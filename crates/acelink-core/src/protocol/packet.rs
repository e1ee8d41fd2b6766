//! Packet encoding/decoding
//!
//! Pure codec for the ACE wire framing, no I/O and no state:
//!
//! ```text
//! [HEAD(2) 0xFF 0xAA] [LEN(2) LE] [PAYLOAD(n) JSON] [CRC16(2) LE] [TAIL(1) 0xFE]
//! ```
//!
//! The CRC covers the payload only. All validation outcomes are values so
//! that a reading loop can discard one corrupt frame and keep going.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{FramingError, MIN_PACKET_SIZE, PACKET_HEADER, PACKET_TAIL};

/// One command sent to the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Monotonic per-session id, wraps at [`super::REQUEST_ID_MODULUS`]
    pub id: u32,
    /// Firmware method name, e.g. `"feed"` or `"get_status"`
    pub method: String,
    /// Method parameters; omitted from the JSON entirely when `None`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
}

impl Request {
    /// Build a request for `method` with optional parameters.
    pub fn new(id: u32, method: &str, params: Option<Map<String, Value>>) -> Self {
        Self {
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// One reply from the device: `result` and `error` are mutually exclusive.
///
/// Responses are consumed in strict FIFO order against the single in-flight
/// request; the firmware echoes the request id on some methods but this is
/// not guaranteed, so `id` is optional.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    /// Echoed request id, when the firmware provides one
    #[serde(default)]
    pub id: Option<u64>,
    /// Success payload
    #[serde(default)]
    pub result: Option<Value>,
    /// Failure payload
    #[serde(default)]
    pub error: Option<Value>,
}

/// CRC16 used by the ACE firmware.
///
/// Not a table-standard CRC-16 variant; this exact bit sequence must be
/// reproduced for wire compatibility.
pub fn crc16(payload: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in payload {
        let mut data = u16::from(byte);
        data ^= crc & 0xFF;
        data ^= (data & 0x0F) << 4;
        crc = ((data << 8) | (crc >> 8)) ^ (data >> 4) ^ (data << 3);
    }
    crc
}

/// Frame an already-serialized payload.
pub fn encode_payload(payload: &[u8]) -> Result<Vec<u8>, FramingError> {
    if payload.len() > u16::MAX as usize {
        return Err(FramingError::Oversize { len: payload.len() });
    }

    let mut frame = Vec::with_capacity(MIN_PACKET_SIZE + payload.len());
    frame.extend_from_slice(&PACKET_HEADER);

    let mut field = [0u8; 2];
    LittleEndian::write_u16(&mut field, payload.len() as u16);
    frame.extend_from_slice(&field);

    frame.extend_from_slice(payload);

    LittleEndian::write_u16(&mut field, crc16(payload));
    frame.extend_from_slice(&field);

    frame.push(PACKET_TAIL);
    Ok(frame)
}

/// Serialize a request to compact JSON and frame it.
pub fn encode(request: &Request) -> Result<Vec<u8>, FramingError> {
    let payload = serde_json::to_vec(request)?;
    encode_payload(&payload)
}

/// Validate a frame and return its payload slice.
///
/// Checks, in order: minimum size, header magic, declared length against the
/// buffer, CRC over the payload, tail sentinel.
pub fn decode_payload(buffer: &[u8]) -> Result<&[u8], FramingError> {
    if buffer.len() < MIN_PACKET_SIZE {
        return Err(FramingError::TooShort { len: buffer.len() });
    }

    if buffer[0..2] != PACKET_HEADER {
        return Err(FramingError::BadHeader {
            found: [buffer[0], buffer[1]],
        });
    }

    let payload_len = LittleEndian::read_u16(&buffer[2..4]) as usize;
    let expected = 4 + payload_len + 2 + 1;
    if buffer.len() < expected {
        return Err(FramingError::Truncated {
            expected,
            actual: buffer.len(),
        });
    }

    let payload = &buffer[4..4 + payload_len];

    let crc_field = LittleEndian::read_u16(&buffer[4 + payload_len..4 + payload_len + 2]);
    let crc_calculated = crc16(payload);
    if crc_field != crc_calculated {
        return Err(FramingError::CrcMismatch {
            expected: crc_calculated,
            actual: crc_field,
        });
    }

    let tail = buffer[4 + payload_len + 2];
    if tail != PACKET_TAIL {
        return Err(FramingError::BadTail { found: tail });
    }

    Ok(payload)
}

/// Validate a frame and parse its JSON payload as a [`Response`].
pub fn decode(buffer: &[u8]) -> Result<Response, FramingError> {
    Ok(serde_json::from_slice(decode_payload(buffer)?)?)
}

/// Split the first frame candidate out of an accumulation buffer.
///
/// When the buffer is aligned on a frame start (header magic first), the
/// length field is trusted exclusively: the candidate is exactly the frame
/// it declares, once enough bytes have arrived. A sentinel-valued byte
/// inside the CRC or length fields therefore cannot split a frame early,
/// which a naive first-sentinel scan would do.
///
/// When the buffer starts with garbage, everything through the first tail
/// sentinel is emitted as a candidate so that [`decode`] can reject it and
/// the stream resynchronizes on the next frame.
///
/// Returns `None` while more bytes must arrive; candidates are still
/// subject to [`decode`] validation.
pub fn take_frame(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    if buffer.len() >= 2 && buffer[0..2] == PACKET_HEADER {
        if buffer.len() < 4 {
            return None;
        }
        let payload_len = LittleEndian::read_u16(&buffer[2..4]) as usize;
        let expected = 4 + payload_len + 2 + 1;
        if buffer.len() < expected {
            return None;
        }
        let remaining = buffer.split_off(expected);
        return Some(std::mem::replace(buffer, remaining));
    }

    // Resync path: garbage before the next frame
    let tail = buffer.iter().position(|&b| b == PACKET_TAIL)?;
    let remaining = buffer.split_off(tail + 1);
    Some(std::mem::replace(buffer, remaining))
}
