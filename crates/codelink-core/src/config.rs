//! Device configuration
//!
//! Everything a [`crate::device::Device`] needs to open its transport and run
//! a session. Stored as JSON; every field has a default so partial files load.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::protocol::{
    ChecksumConfig, FramingMode, ProtocolError, DEFAULT_RX_BUFFER_SIZE,
    DEFAULT_TERMINATOR_LOOKAHEAD,
};
use crate::trace::LogFormat;
use crate::transport::{RtsMode, DEFAULT_BAUD_RATE, DEFAULT_IO_TIMEOUT_MS};

/// Smallest receive buffer accepted by [`DeviceConfig::validate`]
pub const MIN_RX_BUFFER_SIZE: usize = 16;

/// Line parity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    /// No parity bit
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Data bits per character
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    /// 5 bits
    Five,
    /// 6 bits
    Six,
    /// 7 bits
    Seven,
    /// 8 bits
    #[default]
    Eight,
}

/// Stop bits per character
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    /// One stop bit
    #[default]
    One,
    /// Two stop bits
    Two,
}

/// Handshake
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowControl {
    /// No handshake
    #[default]
    None,
    /// XON/XOFF
    Software,
    /// RTS/CTS
    Hardware,
}

/// Line settings for the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSettings {
    /// Port identifier (e.g. "/dev/ttyUSB0", "COM3", or "host:port" for TCP)
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Parity
    pub parity: Parity,
    /// Data bits
    pub data_bits: DataBits,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Handshake
    pub flow_control: FlowControl,
    /// Read/write timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            parity: Parity::None,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            timeout_ms: DEFAULT_IO_TIMEOUT_MS,
        }
    }
}

impl PortSettings {
    /// 8N1 settings for the named port
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Self::default()
        }
    }

    /// Read/write timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Reject settings no transport can open
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.port_name.trim().is_empty() {
            return Err(ProtocolError::InvalidConfig("port name is empty".into()));
        }
        if self.baud_rate == 0 {
            return Err(ProtocolError::InvalidConfig("baud rate is zero".into()));
        }
        Ok(())
    }
}

/// Complete configuration of a device link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Line settings
    pub port: PortSettings,
    /// Checksum parameters; `None` sends bare text and frames by silence
    pub checksum: Option<ChecksumConfig>,
    /// Delay between transmitted bytes; `None` sends each codeword at once
    pub inter_byte_delay_ms: Option<u64>,
    /// Minimum gap between transmitted codewords
    pub inter_message_delay_ms: Option<u64>,
    /// Quiet period that ends a message in silence framing
    pub silence_timeout_ms: u64,
    /// Request-To-Send line mode
    pub rts_mode: RtsMode,
    /// Deliver messages that fail the checksum, verbatim, as well as counting them
    pub ignore_crc_errors: bool,
    /// Bytes examined after a failed terminator before declaring a CRC error
    pub terminator_lookahead: u8,
    /// Receive ring capacity in bytes
    pub rx_buffer_size: usize,
    /// Rendering of traffic in log lines
    pub log_format: LogFormat,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: PortSettings::default(),
            checksum: Some(ChecksumConfig::default()),
            inter_byte_delay_ms: None,
            inter_message_delay_ms: None,
            silence_timeout_ms: 5,
            rts_mode: RtsMode::Enabled,
            ignore_crc_errors: false,
            terminator_lookahead: DEFAULT_TERMINATOR_LOOKAHEAD,
            rx_buffer_size: DEFAULT_RX_BUFFER_SIZE,
            log_format: LogFormat::Plain,
        }
    }
}

impl DeviceConfig {
    /// Default configuration for the named port
    pub fn for_port(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: PortSettings::new(port_name, baud_rate),
            ..Self::default()
        }
    }

    /// Parse from JSON text
    pub fn from_json_str(json: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Serialize as pretty-printed JSON
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ProtocolError> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Reject configurations that cannot run a session
    ///
    /// Checksum parameters are deliberately not checked here; see
    /// [`ChecksumConfig::self_test`].
    pub fn validate(&self) -> Result<(), ProtocolError> {
        self.port.validate()?;
        if self.rx_buffer_size < MIN_RX_BUFFER_SIZE {
            return Err(ProtocolError::InvalidConfig(format!(
                "receive buffer of {} bytes is below the minimum of {}",
                self.rx_buffer_size, MIN_RX_BUFFER_SIZE
            )));
        }
        Ok(())
    }

    /// Framing mode implied by the checksum settings
    pub fn framing_mode(&self) -> FramingMode {
        FramingMode::for_checksum(self.checksum.as_ref())
    }

    /// Inter-byte pacing, if any
    pub fn inter_byte_delay(&self) -> Option<Duration> {
        self.inter_byte_delay_ms.map(Duration::from_millis)
    }

    /// Inter-message pacing
    pub fn inter_message_delay(&self) -> Duration {
        Duration::from_millis(self.inter_message_delay_ms.unwrap_or(0))
    }

    /// Quiet period that ends a message in silence framing
    pub fn silence_timeout(&self) -> Duration {
        Duration::from_millis(self.silence_timeout_ms)
    }
}
