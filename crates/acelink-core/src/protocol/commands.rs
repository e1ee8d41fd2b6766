//! Typed device operations
//!
//! The facade over [`Session::send_command`]: each operation maps to one
//! firmware method plus a parameter map, and each resolves to a single
//! request/response transaction.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::session::Session;
use super::{CommandError, DEFAULT_DRYER_MINUTES, SPEED_MAX, SPEED_MIN};

/// Device identification as reported by `get_info`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeviceInfo {
    /// Model name, e.g. "ACE Pro"
    #[serde(default)]
    pub model: Option<String>,
    /// Firmware version string
    #[serde(default)]
    pub firmware: Option<String>,
    /// Hardware serial number, when the firmware reports one
    #[serde(default)]
    pub serial_number: Option<String>,
    /// Hardware MAC address, when the firmware reports one
    #[serde(default)]
    pub mac_address: Option<String>,
}

/// Clamp a motor speed into the range the firmware accepts.
fn clamp_speed(speed: u32) -> u32 {
    speed.clamp(SPEED_MIN, SPEED_MAX)
}

impl Session {
    /// Query device identification (model, firmware, serial, MAC).
    pub fn get_info(&self) -> Result<DeviceInfo, CommandError> {
        let result = self.send_command("get_info", None)?;
        serde_json::from_value(result).map_err(CommandError::Malformed)
    }

    /// Query device status: per-slot state ("empty"/"ready"/"loading"/
    /// "error"), dryer state, temperature.
    pub fn get_status(&self) -> Result<Value, CommandError> {
        self.send_command("get_status", None)
    }

    /// Feed filament forward on one slot. Length is in millimeters and is
    /// rounded to a whole number; speed is clamped to 10-80.
    pub fn feed(&self, index: u32, length_mm: f64, speed: u32) -> Result<(), CommandError> {
        let mut params = Map::new();
        params.insert("index".to_string(), json!(index));
        params.insert("len".to_string(), json!(length_mm.round() as i64));
        params.insert("speed".to_string(), json!(clamp_speed(speed)));
        self.send_command("feed", Some(params)).map(|_| ())
    }

    /// Retract filament on one slot. Length is in millimeters; the firmware
    /// takes a positive magnitude, so the sign is dropped here.
    pub fn retract(&self, index: u32, length_mm: f64, speed: u32) -> Result<(), CommandError> {
        let mut params = Map::new();
        params.insert("index".to_string(), json!(index));
        params.insert("len".to_string(), json!(length_mm.abs().round() as i64));
        params.insert("speed".to_string(), json!(clamp_speed(speed)));
        self.send_command("back", Some(params)).map(|_| ())
    }

    /// Enable or disable the feed-assist motor for one slot. Disabling is a
    /// device-wide method and carries no parameters.
    pub fn set_feed_assist(&self, index: u32, enable: bool) -> Result<(), CommandError> {
        if enable {
            let mut params = Map::new();
            params.insert("index".to_string(), json!(index));
            self.send_command("feed_assist", Some(params)).map(|_| ())
        } else {
            self.send_command("feed_assist_off", None).map(|_| ())
        }
    }

    /// Start the dryer at `temp` degrees Celsius. When `duration_min` is
    /// `None` the firmware default of 240 minutes is used.
    pub fn start_dryer(&self, temp: u32, duration_min: Option<u32>) -> Result<(), CommandError> {
        let mut params = Map::new();
        params.insert("temp".to_string(), json!(temp));
        params.insert(
            "time".to_string(),
            json!(duration_min.unwrap_or(DEFAULT_DRYER_MINUTES)),
        );
        self.send_command("dryer_start", Some(params)).map(|_| ())
    }

    /// Stop the dryer.
    pub fn stop_dryer(&self) -> Result<(), CommandError> {
        self.send_command("dryer_stop", None).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speed_clamping() {
        assert_eq!(clamp_speed(0), SPEED_MIN);
        assert_eq!(clamp_speed(9), SPEED_MIN);
        assert_eq!(clamp_speed(50), 50);
        assert_eq!(clamp_speed(81), SPEED_MAX);
        assert_eq!(clamp_speed(u32::MAX), SPEED_MAX);
    }

    #[test]
    fn device_info_tolerates_missing_fields() {
        let info: DeviceInfo = serde_json::from_value(json!({"model": "ACE Pro"})).unwrap();
        assert_eq!(info.model.as_deref(), Some("ACE Pro"));
        assert!(info.firmware.is_none());
        assert!(info.mac_address.is_none());
    }
}
