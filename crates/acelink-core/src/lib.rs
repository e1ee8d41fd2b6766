//! # acelink core library
//!
//! Host-side driver core for ACE Pro class multi-slot filament units.
//!
//! This library provides:
//! - The ACE wire protocol: length-prefixed, CRC16-checked packets carrying
//!   JSON request/response payloads
//! - A transactional session with timeout, framing recovery, and one-shot
//!   reconnection
//! - Typed device operations (feed, retract, feed assist, dryer, status)
//! - USB discovery with stable device identities that survive reboots and
//!   renumbering
//!
//! ## Example
//!
//! ```rust,ignore
//! use acelink_core::discovery::{find_ace_devices, DiscoveryConfig};
//! use acelink_core::protocol::{Session, SessionConfig};
//!
//! for device in find_ace_devices(&DiscoveryConfig::default()) {
//!     let session = Session::open(&device.port, SessionConfig::default());
//!     session.connect()?;
//!     let status = session.get_status()?;
//!     println!("{}: {status}", device.device_id);
//! }
//! ```

#![warn(missing_docs)]

pub mod discovery;
pub mod protocol;
pub mod sim;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::discovery::{
        find_ace_devices, generate_device_id, probe_ace_device, DeviceDescriptor, DiscoveryConfig,
    };
    pub use crate::protocol::{
        CommandError, DeviceInfo, FramingError, Session, SessionConfig,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
