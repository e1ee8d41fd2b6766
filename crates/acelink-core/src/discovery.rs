//! Device discovery
//!
//! Enumerates USB serial adapters, filters for ACE units by vendor
//! signature, and derives a device identity that survives reboots and USB
//! renumbering. Identity is anchored to the USB topology: the same physical
//! port always yields the same id, so slot-to-hardware bindings stay stable.

use serialport::{SerialPortInfo, SerialPortType};
use tracing::{debug, info, warn};

#[cfg(target_os = "linux")]
use std::fs;
#[cfg(target_os = "linux")]
use std::path::Path;

use crate::protocol::{Session, SessionConfig};

/// Vendor signature used to recognize ACE units on the bus.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// USB vendor id (GDMicroelectronics)
    pub vendor_id: u16,
    /// USB product id of the ACE unit
    pub product_id: u16,
    /// Manufacturer-string fallback match, case-insensitive
    pub manufacturer_match: String,
    /// Product-string fallback match, case-insensitive
    pub product_match: String,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            vendor_id: 0x28E9,
            product_id: 0x018A,
            manufacturer_match: "GDMicroelectronics".to_string(),
            product_match: "ACE".to_string(),
        }
    }
}

/// One enumerated serial port, flattened from the serialport API.
#[derive(Debug, Clone, Default)]
pub struct PortInfo {
    /// OS device name, e.g. "/dev/ttyACM0"
    pub name: String,
    /// USB vendor id, if the port is a USB adapter
    pub vid: Option<u16>,
    /// USB product id
    pub pid: Option<u16>,
    /// Manufacturer string
    pub manufacturer: Option<String>,
    /// Product string
    pub product: Option<String>,
    /// USB serial number
    pub serial_number: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let (vid, pid, manufacturer, product, serial_number) = match info.port_type {
            SerialPortType::UsbPort(usb) => (
                Some(usb.vid),
                Some(usb.pid),
                usb.manufacturer,
                usb.product,
                usb.serial_number,
            ),
            _ => (None, None, None, None, None),
        };

        Self {
            name: info.port_name,
            vid,
            pid,
            manufacturer,
            product,
            serial_number,
        }
    }
}

/// One identified ACE unit. Ephemeral: produced by a scan, consumed when the
/// caller opens a session from it.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    /// Stable port path (`/dev/serial/by-path/...`); survives renumbering
    pub port: String,
    /// Volatile OS device name ("/dev/ttyACM0"), informational only
    pub port_raw: String,
    /// USB vendor id
    pub vendor_id: Option<u16>,
    /// USB product id
    pub product_id: Option<u16>,
    /// Manufacturer string
    pub manufacturer: Option<String>,
    /// Product string
    pub product: Option<String>,
    /// USB serial number
    pub serial_number: Option<String>,
    /// USB topological location, e.g. "1-1.2"
    pub usb_location: Option<String>,
    /// Derived stable identity, e.g. "hub_1_port_1_2"
    pub device_id: String,
}

/// Raw signals an identity can be derived from, in priority order.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentitySource<'a> {
    /// USB topological location ("1-1.2")
    pub usb_location: Option<&'a str>,
    /// Hardware MAC address, if the firmware reports one
    pub mac_address: Option<&'a str>,
    /// Hardware serial number, if reported
    pub serial_number: Option<&'a str>,
    /// Model string, last-resort hash input
    pub model: Option<&'a str>,
    /// Firmware string, last-resort hash input
    pub firmware: Option<&'a str>,
}

/// Replace every character outside `[A-Za-z0-9_]` with `_`.
pub fn sanitize_device_id(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Derive a stable device identity.
///
/// Priority: USB location (stable as long as the unit stays in the same
/// physical port), then MAC address, then serial number. The final fallback
/// hashes model+firmware and is NOT unique across identical units; it only
/// exists so a device with no stable signal still gets a name.
pub fn generate_device_id(source: &IdentitySource<'_>) -> String {
    if let Some(location) = source.usb_location.filter(|l| !l.is_empty()) {
        // "1-1.2" means bus 1, port path 1.2
        let id = match location.split_once('-') {
            Some((bus, port_path)) => format!("hub_{bus}_port_{port_path}"),
            None => format!("usb_{location}"),
        };
        return sanitize_device_id(&id);
    }

    if let Some(mac) = source.mac_address.filter(|m| !m.is_empty()) {
        info!("using MAC address for device id (USB location not available)");
        return sanitize_device_id(&format!("mac_{mac}"));
    }

    if let Some(serial) = source.serial_number.filter(|s| !s.is_empty()) {
        info!("using serial number for device id (USB location not available)");
        return sanitize_device_id(&format!("sn_{serial}"));
    }

    let unique = format!(
        "{}_{}",
        source.model.unwrap_or(""),
        source.firmware.unwrap_or("")
    );
    warn!("using firmware hash for device id (not unique)");
    format!("fw_{:08x}", crc32fast::hash(unique.as_bytes()))
}

/// Whether a port matches the ACE vendor signature: vendor id first, then
/// the manufacturer/product substring fallback, case-insensitive.
fn matches_signature(config: &DiscoveryConfig, port: &PortInfo) -> bool {
    if port.vid == Some(config.vendor_id) {
        return true;
    }

    let contains = |haystack: &Option<String>, needle: &str| {
        haystack
            .as_deref()
            .is_some_and(|h| h.to_uppercase().contains(&needle.to_uppercase()))
    };

    contains(&port.manufacturer, &config.manufacturer_match)
        || contains(&port.product, &config.product_match)
}

/// Filter enumerated ports down to identified ACE units.
///
/// `resolve_stable` maps a tty device to its stable path and
/// `locate` to its USB topological location; both are injected so the pure
/// filtering/ordering logic is testable without hardware.
fn scan_ports(
    config: &DiscoveryConfig,
    ports: Vec<PortInfo>,
    resolve_stable: impl Fn(&str) -> Option<String>,
    locate: impl Fn(&str) -> Option<String>,
) -> Vec<DeviceDescriptor> {
    let mut devices = Vec::new();

    for port in ports {
        if !matches_signature(config, &port) {
            debug!(port = %port.name, "not an ACE device, skipping");
            continue;
        }
        info!(port = %port.name, vid = ?port.vid, "found ACE candidate");

        // A volatile tty name is worthless for slot bindings across reboots;
        // a device without a stable path is dropped entirely.
        let Some(stable) = resolve_stable(&port.name) else {
            warn!(
                port = %port.name,
                "no /dev/serial/by-path symlink, dropping device"
            );
            continue;
        };

        let usb_location = locate(&port.name);
        let device_id = generate_device_id(&IdentitySource {
            usb_location: usb_location.as_deref(),
            serial_number: port.serial_number.as_deref(),
            ..Default::default()
        });

        devices.push(DeviceDescriptor {
            port: stable,
            port_raw: port.name,
            vendor_id: port.vid,
            product_id: port.pid,
            manufacturer: port.manufacturer,
            product: port.product,
            serial_number: port.serial_number,
            usb_location,
            device_id,
        });
    }

    // Deterministic ordering across runs
    devices.sort_by(|a, b| a.usb_location.cmp(&b.usb_location));
    devices
}

/// Scan all serial adapters and identify ACE units, sorted by USB location.
pub fn find_ace_devices(config: &DiscoveryConfig) -> Vec<DeviceDescriptor> {
    let ports: Vec<PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .collect();

    info!(count = ports.len(), "scanning serial ports for ACE devices");
    let devices = scan_ports(config, ports, stable_path_for, usb_location_for);
    info!(count = devices.len(), "discovery finished");
    devices
}

/// Connect to `port`, verify it answers `get_info`, and build a descriptor.
///
/// Returns `None` when the port does not open, does not answer, or has no
/// resolvable stable path.
pub fn probe_ace_device(port: &str, config: &SessionConfig) -> Option<DeviceDescriptor> {
    info!(port, "probing candidate port");

    let session = Session::open(port, config.clone());
    if let Err(err) = session.connect() {
        warn!(port, %err, "probe: failed to connect");
        return None;
    }

    let info = session.get_info();
    session.disconnect();

    let info = match info {
        Ok(info) => info,
        Err(err) => {
            warn!(port, %err, "probe: no usable get_info response");
            return None;
        }
    };

    let Some(stable) = stable_path_for(port) else {
        warn!(port, "probe: no /dev/serial/by-path symlink");
        return None;
    };

    let usb_location = usb_location_for(port);
    let device_id = generate_device_id(&IdentitySource {
        usb_location: usb_location.as_deref(),
        mac_address: info.mac_address.as_deref(),
        serial_number: info.serial_number.as_deref(),
        model: info.model.as_deref(),
        firmware: info.firmware.as_deref(),
    });

    info!(
        port,
        model = info.model.as_deref().unwrap_or("unknown"),
        firmware = info.firmware.as_deref().unwrap_or("unknown"),
        device_id,
        "probe: verified ACE device"
    );

    Some(DeviceDescriptor {
        port: stable,
        port_raw: port.to_string(),
        vendor_id: None,
        product_id: None,
        manufacturer: None,
        product: info.model.clone(),
        serial_number: info.serial_number.clone(),
        usb_location,
        device_id,
    })
}

/// Resolve the `/dev/serial/by-path` symlink for a tty device. This is the
/// OS indirection mapping USB physical location to a device file, so the
/// result survives reboots and renumbering.
#[cfg(target_os = "linux")]
pub fn stable_path_for(tty_device: &str) -> Option<String> {
    resolve_symlink_in("/dev/serial/by-path", tty_device)
}

/// Resolve the `/dev/serial/by-id` symlink for a tty device. Stable as long
/// as the USB serial number is, regardless of which port the unit is in.
#[cfg(target_os = "linux")]
pub fn by_id_path_for(tty_device: &str) -> Option<String> {
    resolve_symlink_in("/dev/serial/by-id", tty_device)
}

#[cfg(target_os = "linux")]
fn resolve_symlink_in(dir: &str, tty_device: &str) -> Option<String> {
    let real_tty = fs::canonicalize(tty_device).ok()?;
    for entry in fs::read_dir(dir).ok()?.flatten() {
        let path = entry.path();
        if let Ok(target) = fs::canonicalize(&path) {
            if target == real_tty {
                return Some(path.to_string_lossy().into_owned());
            }
        }
    }
    debug!(tty_device, dir, "no matching symlink");
    None
}

/// Recover the USB topological location ("1-1.2") for a tty device from
/// sysfs; the serialport crate does not expose topology.
#[cfg(target_os = "linux")]
pub fn usb_location_for(tty_device: &str) -> Option<String> {
    let name = Path::new(tty_device).file_name()?.to_str()?;
    let device = fs::canonicalize(format!("/sys/class/tty/{name}/device")).ok()?;
    location_from_sysfs_path(&device.to_string_lossy())
}

/// Stable-path resolution is a Linux udev facility; elsewhere there is
/// nothing to resolve.
#[cfg(not(target_os = "linux"))]
pub fn stable_path_for(_tty_device: &str) -> Option<String> {
    None
}

/// See [`stable_path_for`]; Linux only.
#[cfg(not(target_os = "linux"))]
pub fn by_id_path_for(_tty_device: &str) -> Option<String> {
    None
}

/// USB topology comes from sysfs; Linux only.
#[cfg(not(target_os = "linux"))]
pub fn usb_location_for(_tty_device: &str) -> Option<String> {
    None
}

/// Pick the deepest sysfs path segment shaped like a USB device location:
/// `<bus>-<port[.port...]>`, with any `:<config>.<interface>` suffix
/// stripped.
fn location_from_sysfs_path(path: &str) -> Option<String> {
    path.split('/').rev().find_map(|segment| {
        let segment = segment.split(':').next()?;
        let (bus, ports) = segment.split_once('-')?;
        let bus_ok = !bus.is_empty() && bus.chars().all(|c| c.is_ascii_digit());
        let ports_ok = !ports.is_empty()
            && ports.chars().all(|c| c.is_ascii_digit() || c == '.');
        if bus_ok && ports_ok {
            Some(segment.to_string())
        } else {
            None
        }
    })
}
