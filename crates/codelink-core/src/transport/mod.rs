//! Byte-stream transports
//!
//! The link runs over anything that moves bytes in both directions: a serial
//! port, a TCP socket to a serial bridge, or a test double. A [`Connector`]
//! opens a [`Transport`]; the session then clones the transport so that the
//! receive and transmit workers each own a handle.

use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::time::Duration;

use crate::config::PortSettings;
use crate::protocol::ProtocolError;

pub mod monitor;
pub mod serial;
pub mod tcp;

pub use monitor::{
    DeviceMonitor, HotplugCallback, HotplugEvent, MonitorHandle, PortMonitor, SubscriptionId,
};
pub use serial::{list_ports, open_port, port_names, PortInfo, SerialConnector, SerialTransport};
pub use tcp::{TcpConnector, TcpTransport};

/// Default baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default read/write timeout in milliseconds
pub const DEFAULT_IO_TIMEOUT_MS: u64 = 100;

/// Operating mode of the Request-To-Send line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RtsMode {
    /// RTS asserted while the port is open
    #[default]
    Enabled,
    /// RTS never asserted
    Disabled,
    /// RTS asserted only while bytes are being sent (RS-485 adapters)
    Toggle,
}

/// An open, bidirectional byte stream
pub trait Transport: Read + Write + Send {
    /// Block until bytes are ready to read or `timeout` passes
    ///
    /// Returns `Ok(true)` when a following `read` will not block.
    fn wait_for_data(&mut self, timeout: Duration) -> io::Result<bool>;

    /// Discard bytes received but not yet read
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Discard bytes written but not yet sent
    fn clear_output_buffer(&mut self) -> io::Result<()>;

    /// Open a second handle on the same stream
    fn try_clone(&self) -> io::Result<Box<dyn Transport>>;

    /// Apply a Request-To-Send mode; transports without the line ignore it
    fn set_rts_mode(&mut self, _mode: RtsMode) -> io::Result<()> {
        Ok(())
    }
}

/// Opens transports from line settings
pub trait Connector: Send + Sync {
    /// Open and configure the transport named by `settings.port_name`
    fn open(&self, settings: &PortSettings) -> Result<Box<dyn Transport>, ProtocolError>;
}
