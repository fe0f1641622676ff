//! # Codelink Core Library
//!
//! Checksummed point-to-point command links over serial ports and other
//! byte streams.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - CRC-16 codewords with configurable polynomial, bit order and byte order
//! - Lock-free receive buffering and message framing by terminator or silence
//! - A threaded device controller with paced transmission, automatic reset
//!   after repeated CRC errors, and hot-plug reconnection
//! - Serial and TCP transports
//!
//! ## Example
//!
//! ```rust,no_run
//! use codelink_core::prelude::*;
//!
//! # fn main() -> Result<(), ProtocolError> {
//! let device = Device::new(DeviceConfig::for_port("/dev/ttyUSB0", 115200));
//! device.set_response_handler(|response| println!("<- {}", response));
//! device.connect()?;
//!
//! device.command("PING")?;
//! device.wait_for_idle(std::time::Duration::from_secs(1));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod device;
pub mod protocol;
mod signal;
pub mod trace;
pub mod transport;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{DeviceConfig, PortSettings};
    pub use crate::device::{ConnectionState, CounterSnapshot, Device, DeviceEvent};
    pub use crate::protocol::{Checksum, ChecksumConfig, Order, ProtocolError};
    pub use crate::trace::LogFormat;
    pub use crate::transport::{
        list_ports, Connector, PortMonitor, RtsMode, SerialConnector, TcpConnector, Transport,
    };
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
