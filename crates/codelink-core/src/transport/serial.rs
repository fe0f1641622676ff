//! Serial port transport
//!
//! Port discovery and a [`Transport`] over the `serialport` crate.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use super::{Connector, RtsMode, Transport};
use crate::config::{DataBits, FlowControl, Parity, PortSettings, StopBits};
use crate::protocol::ProtocolError;

/// Interval between input queue checks while waiting for data
const DATA_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Information about an available serial port
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,

    /// Serial number (if available)
    pub serial_number: Option<String>,
}

impl PortInfo {
    fn named(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                manufacturer: usb.manufacturer,
                product: usb.product,
                serial_number: usb.serial_number,
            },
            _ => Self::named(info.port_name),
        }
    }
}

/// Sort key placing ttyACM* first, then ttyUSB* (both numerically by
/// suffix), then everything else by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    match serialport::available_ports() {
        Ok(found) => {
            for info in found {
                let p = PortInfo::from(info);
                map.entry(p.name.clone()).or_insert(p);
            }
        }
        Err(e) => debug!("serial port enumeration failed: {}", e),
    }

    // Some USB CDC devices never show up in the enumeration API
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone()).or_insert_with(|| PortInfo::named(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Names of all available serial ports
pub fn port_names() -> Vec<String> {
    list_ports().into_iter().map(|p| p.name).collect()
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

fn serial_error(e: serialport::Error) -> ProtocolError {
    ProtocolError::SerialError(e.to_string())
}

fn io_error(e: serialport::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

/// Open a serial port with the given line settings
pub fn open_port(settings: &PortSettings) -> Result<Box<dyn SerialPort>, ProtocolError> {
    serialport::new(&settings.port_name, settings.baud_rate)
        .data_bits(settings.data_bits.into())
        .parity(settings.parity.into())
        .stop_bits(settings.stop_bits.into())
        .flow_control(settings.flow_control.into())
        .timeout(settings.timeout())
        .open()
        .map_err(|e| match e.kind() {
            serialport::ErrorKind::NoDevice => {
                ProtocolError::PortNotFound(settings.port_name.clone())
            }
            _ => serial_error(e),
        })
}

/// Serial port implementing [`Transport`]
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    rts_toggle: bool,
}

impl SerialTransport {
    /// Wrap an open port
    ///
    /// Asserts DTR; opening a port usually pulses it, and boards that reset on
    /// DTR stay up while it is held high.
    pub fn new(mut port: Box<dyn SerialPort>) -> Self {
        if let Err(e) = port.write_data_terminal_ready(true) {
            debug!("failed to set DTR high: {} (continuing)", e);
        }
        Self {
            port,
            rts_toggle: false,
        }
    }

    /// Bytes waiting in the driver's input queue
    pub fn bytes_to_read(&self) -> io::Result<u32> {
        self.port.bytes_to_read().map_err(io_error)
    }
}

impl Read for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.rts_toggle {
            return self.port.write(buf);
        }
        self.port.write_request_to_send(true).map_err(io_error)?;
        let written = self.port.write(buf);
        // RTS must stay up until the last bit leaves the shift register
        let drained = self.port.flush();
        let released = self.port.write_request_to_send(false).map_err(io_error);
        let n = written?;
        drained?;
        released?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Transport for SerialTransport {
    fn wait_for_data(&mut self, timeout: Duration) -> io::Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.bytes_to_read()? > 0 {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            thread::sleep(DATA_POLL_INTERVAL.min(deadline - now));
        }
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io_error)
    }

    fn clear_output_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Output)
            .map_err(io_error)
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        let port = self.port.try_clone().map_err(io_error)?;
        Ok(Box::new(SerialTransport {
            port,
            rts_toggle: self.rts_toggle,
        }))
    }

    fn set_rts_mode(&mut self, mode: RtsMode) -> io::Result<()> {
        self.rts_toggle = mode == RtsMode::Toggle;
        self.port
            .write_request_to_send(mode == RtsMode::Enabled)
            .map_err(io_error)?;
        debug!("RTS mode set to {:?}", mode);
        Ok(())
    }
}

/// Opens [`SerialTransport`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialConnector;

impl Connector for SerialConnector {
    fn open(&self, settings: &PortSettings) -> Result<Box<dyn Transport>, ProtocolError> {
        let port = open_port(settings)?;
        Ok(Box::new(SerialTransport::new(port)))
    }
}
