//! Simulated ACE device
//!
//! A [`Transport`]/[`Connector`] implementation that behaves like a real
//! unit on the other end of the wire: it parses the frames the session
//! writes, answers the firmware methods, and can inject the failures the
//! engine has to survive (dropped responses, dead writes, corrupt frames).
//! Used by the integration tests and handy for downstream demo tooling.

use std::io;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

use crate::protocol::{self, Connector, Request, Transport};

struct SimState {
    // Wire buffers, host perspective: inbound is host->device
    inbound: Vec<u8>,
    outbound: Vec<u8>,
    // Every well-formed request seen, for test assertions
    requests: Vec<Request>,
    connects: usize,
    // Device personality
    model: String,
    firmware: String,
    serial_number: Option<String>,
    mac_address: Option<String>,
    slots: Vec<String>,
    rng: StdRng,
    // Fault injection
    mute: bool,
    write_failures: u32,
    corrupt_next: bool,
    wrong_id_next: bool,
}

impl SimState {
    fn respond_to(&mut self, request: &Request) -> Value {
        let params = request.params.as_ref();
        let has = |key: &str| params.is_some_and(|p| p.contains_key(key));

        let result: Result<Value, &str> = match request.method.as_str() {
            "get_info" => Ok(json!({
                "model": self.model,
                "firmware": self.firmware,
                "serial_number": self.serial_number,
                "mac_address": self.mac_address,
            })),
            "get_status" => {
                let jitter: f64 = self.rng.gen_range(-0.5..0.5);
                Ok(json!({
                    "status": "ready",
                    "temp": 25.0 + jitter,
                    "slots": self
                        .slots
                        .iter()
                        .enumerate()
                        .map(|(index, status)| json!({"index": index, "status": status}))
                        .collect::<Vec<_>>(),
                }))
            }
            "feed" | "back" => {
                if has("index") && has("len") && has("speed") {
                    Ok(json!("ok"))
                } else {
                    Err("missing parameters")
                }
            }
            "feed_assist" => {
                if has("index") {
                    Ok(json!("ok"))
                } else {
                    Err("missing parameters")
                }
            }
            "feed_assist_off" | "dryer_stop" => Ok(json!("ok")),
            "dryer_start" => {
                if has("temp") && has("time") {
                    Ok(json!("ok"))
                } else {
                    Err("missing parameters")
                }
            }
            _ => Err("unknown method"),
        };

        match result {
            Ok(result) => {
                let id = if self.wrong_id_next {
                    request.id + 999
                } else {
                    request.id
                };
                json!({"id": id, "result": result})
            }
            Err(message) => json!({"id": request.id, "error": message}),
        }
    }
}

/// Handle to a simulated device. Clones share the same device state, so a
/// test can keep one handle for fault injection while the session owns
/// another as its transport.
#[derive(Clone)]
pub struct SimDevice {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimDevice {
    /// A unit with one loaded slot and three empty ones.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                inbound: Vec::new(),
                outbound: Vec::new(),
                requests: Vec::new(),
                connects: 0,
                model: "ACE Pro".to_string(),
                firmware: "v1.3.0".to_string(),
                serial_number: Some("ACE00001".to_string()),
                mac_address: None,
                slots: vec![
                    "ready".to_string(),
                    "empty".to_string(),
                    "empty".to_string(),
                    "empty".to_string(),
                ],
                rng: StdRng::seed_from_u64(0),
                mute: false,
                write_failures: 0,
                corrupt_next: false,
                wrong_id_next: false,
            })),
        }
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Override the identity reported by `get_info`.
    pub fn set_identity(
        &self,
        model: &str,
        firmware: &str,
        serial_number: Option<&str>,
        mac_address: Option<&str>,
    ) {
        let mut state = self.locked();
        state.model = model.to_string();
        state.firmware = firmware.to_string();
        state.serial_number = serial_number.map(str::to_string);
        state.mac_address = mac_address.map(str::to_string);
    }

    /// Stop answering entirely; requests are still recorded.
    pub fn set_mute(&self, mute: bool) {
        self.locked().mute = mute;
    }

    /// Fail the next `n` writes with an I/O error.
    pub fn fail_writes(&self, n: u32) {
        self.locked().write_failures = n;
    }

    /// Deliver the next response twice: once with a flipped payload bit,
    /// then intact.
    pub fn corrupt_next_response(&self) {
        self.locked().corrupt_next = true;
    }

    /// Answer the next request with a response carrying the wrong id.
    pub fn respond_with_wrong_id(&self) {
        self.locked().wrong_id_next = true;
    }

    /// All well-formed requests the device has seen.
    pub fn requests(&self) -> Vec<Request> {
        self.locked().requests.clone()
    }

    /// How many times a transport has been opened against this device.
    pub fn connect_count(&self) -> usize {
        self.locked().connects
    }

    fn process_inbound(state: &mut SimState) {
        while let Some(frame) = protocol::take_frame(&mut state.inbound) {
            let Ok(payload) = protocol::decode_payload(&frame) else {
                continue;
            };
            let Ok(request) = serde_json::from_slice::<Request>(payload) else {
                continue;
            };

            state.requests.push(request.clone());
            if state.mute {
                continue;
            }

            let response = state.respond_to(&request);
            state.wrong_id_next = false;
            let Ok(body) = serde_json::to_vec(&response) else {
                continue;
            };
            let Ok(frame) = protocol::encode_payload(&body) else {
                continue;
            };

            if state.corrupt_next {
                state.corrupt_next = false;
                let mut damaged = frame.clone();
                // Flip a low bit in the payload; keeps the byte out of the
                // sentinel's range so framing still splits correctly
                damaged[4] ^= 0x01;
                state.outbound.extend_from_slice(&damaged);
            }
            state.outbound.extend_from_slice(&frame);
        }
    }
}

impl Transport for SimDevice {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut state = self.locked();
        if state.write_failures > 0 {
            state.write_failures -= 1;
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated I/O failure",
            ));
        }
        state.inbound.extend_from_slice(buf);
        Self::process_inbound(&mut state);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn bytes_to_read(&mut self) -> io::Result<usize> {
        Ok(self.locked().outbound.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.locked();
        let n = buf.len().min(state.outbound.len());
        buf[..n].copy_from_slice(&state.outbound[..n]);
        state.outbound.drain(..n);
        Ok(n)
    }

    fn clear(&mut self) -> io::Result<()> {
        let mut state = self.locked();
        state.inbound.clear();
        state.outbound.clear();
        Ok(())
    }
}

impl Connector for SimDevice {
    fn open(&mut self) -> io::Result<Box<dyn Transport>> {
        let mut state = self.locked();
        state.connects += 1;
        state.inbound.clear();
        state.outbound.clear();
        Ok(Box::new(self.clone()))
    }

    fn describe(&self) -> String {
        "sim://ace".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode;

    fn roundtrip(device: &SimDevice, request: &Request) -> Value {
        let mut transport: Box<dyn Transport> = Box::new(device.clone());
        transport.write_all(&encode(request).unwrap()).unwrap();
        let mut buf = vec![0u8; 4096];
        let n = transport.read(&mut buf).unwrap();
        let mut wire = buf[..n].to_vec();
        let frame = protocol::take_frame(&mut wire).unwrap();
        serde_json::from_slice(protocol::decode_payload(&frame).unwrap()).unwrap()
    }

    #[test]
    fn answers_get_info_with_identity() {
        let device = SimDevice::new();
        device.set_identity("ACE Pro", "v2.0.0", Some("SN42"), None);
        let response = roundtrip(&device, &Request::new(1, "get_info", None));
        assert_eq!(response["id"], json!(1));
        assert_eq!(response["result"]["model"], json!("ACE Pro"));
        assert_eq!(response["result"]["serial_number"], json!("SN42"));
    }

    #[test]
    fn rejects_unknown_method() {
        let device = SimDevice::new();
        let response = roundtrip(&device, &Request::new(1, "self_destruct", None));
        assert_eq!(response["error"], json!("unknown method"));
        assert!(response.get("result").is_none());
    }

    #[test]
    fn mute_records_but_does_not_answer() {
        let device = SimDevice::new();
        device.set_mute(true);
        let mut transport: Box<dyn Transport> = Box::new(device.clone());
        transport
            .write_all(&encode(&Request::new(1, "get_status", None)).unwrap())
            .unwrap();
        assert_eq!(transport.bytes_to_read().unwrap(), 0);
        assert_eq!(device.requests().len(), 1);
    }
}
