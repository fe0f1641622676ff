//! TCP transport
//!
//! For devices reached through a network serial bridge. The port name is the
//! bridge address, e.g. `192.168.4.1:23`.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

use super::{Connector, Transport};
use crate::config::PortSettings;
use crate::protocol::ProtocolError;

/// TCP stream implementing [`Transport`]
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Wrap a connected stream
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Connect to `address` within `timeout`
    pub fn connect(address: &str, timeout: Duration) -> io::Result<Self> {
        let mut last_err = None;
        for addr in address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_write_timeout(Some(timeout))?;
                    return Self::new(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "address resolved to nothing")
        }))
    }
}

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Transport for TcpTransport {
    fn wait_for_data(&mut self, timeout: Duration) -> io::Result<bool> {
        // A zero read timeout is rejected by the socket API
        self.stream
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
        let mut probe = [0u8; 1];
        match self.stream.peek(&mut probe) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed the connection",
            )),
            Ok(_) => Ok(true),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        // No purge call for sockets; drain without blocking instead
        self.stream.set_nonblocking(true)?;
        let mut buf = [0u8; 1024];
        let result = loop {
            match self.stream.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.stream.set_nonblocking(false)?;
        result
    }

    fn clear_output_buffer(&mut self) -> io::Result<()> {
        // The OS owns the send queue
        self.stream.flush()
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        let stream = self.stream.try_clone()?;
        Ok(Box::new(TcpTransport { stream }))
    }
}

/// Opens [`TcpTransport`]s, treating the port name as a socket address
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn open(&self, settings: &PortSettings) -> Result<Box<dyn Transport>, ProtocolError> {
        let transport = TcpTransport::connect(&settings.port_name, settings.timeout())
            .map_err(|e| {
                ProtocolError::ConnectionFailed(format!("{}: {}", settings.port_name, e))
            })?;
        debug!("connected to {}", settings.port_name);
        Ok(Box::new(transport))
    }
}
