//! Test doubles shared by the integration tests

#![allow(dead_code)]

use codelink_core::config::{DeviceConfig, PortSettings};
use codelink_core::protocol::{Checksum, ChecksumConfig, ProtocolError};
use codelink_core::transport::{Connector, RtsMode, Transport};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Port name used by every mock device
pub const MOCK_PORT: &str = "mock0";

/// Generous upper bound for anything the workers should do promptly
pub const PATIENCE: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Default)]
struct WireState {
    /// Bytes waiting for the device to read
    inbound: VecDeque<u8>,
    /// Bytes the device wrote
    outbound: Vec<u8>,
    /// When each write landed and how many bytes it carried
    writes: Vec<(Instant, usize)>,
    opens: usize,
    fail_open: bool,
    failing_writes: usize,
    rts: Vec<RtsMode>,
}

/// The far end of a mock serial line, shared by every transport opened on it
#[derive(Default)]
pub struct Wire {
    state: Mutex<WireState>,
    changed: Condvar,
}

impl Wire {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Send bytes to the device
    pub fn inject(&self, bytes: &[u8]) {
        self.state.lock().unwrap().inbound.extend(bytes);
        self.changed.notify_all();
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.lock().unwrap().outbound.clone()
    }

    /// Wait until the device has written at least `len` bytes
    pub fn wait_for_written(&self, len: usize, timeout: Duration) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |s| s.outbound.len() < len)
            .unwrap();
        state.outbound.clone()
    }

    pub fn writes(&self) -> Vec<(Instant, usize)> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub fn rts_modes(&self) -> Vec<RtsMode> {
        self.state.lock().unwrap().rts.clone()
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.state.lock().unwrap().fail_open = fail;
    }

    pub fn fail_next_writes(&self, count: usize) {
        self.state.lock().unwrap().failing_writes = count;
    }
}

pub struct MockConnector {
    pub wire: Arc<Wire>,
}

impl MockConnector {
    pub fn new(wire: &Arc<Wire>) -> Arc<Self> {
        Arc::new(Self { wire: wire.clone() })
    }
}

impl Connector for MockConnector {
    fn open(&self, settings: &PortSettings) -> Result<Box<dyn Transport>, ProtocolError> {
        let mut state = self.wire.state.lock().unwrap();
        if state.fail_open {
            return Err(ProtocolError::PortNotFound(settings.port_name.clone()));
        }
        state.opens += 1;
        Ok(Box::new(MockTransport {
            wire: self.wire.clone(),
        }))
    }
}

pub struct MockTransport {
    wire: Arc<Wire>,
}

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.wire.state.lock().unwrap();
        let n = buf.len().min(state.inbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.wire.state.lock().unwrap();
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write failure"));
        }
        state.outbound.extend_from_slice(buf);
        state.writes.push((Instant::now(), buf.len()));
        drop(state);
        self.wire.changed.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MockTransport {
    fn wait_for_data(&mut self, timeout: Duration) -> io::Result<bool> {
        let state = self.wire.state.lock().unwrap();
        let (state, _) = self
            .wire
            .changed
            .wait_timeout_while(state, timeout, |s| s.inbound.is_empty())
            .unwrap();
        Ok(!state.inbound.is_empty())
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.wire.state.lock().unwrap().inbound.clear();
        Ok(())
    }

    fn clear_output_buffer(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(MockTransport {
            wire: self.wire.clone(),
        }))
    }

    fn set_rts_mode(&mut self, mode: RtsMode) -> io::Result<()> {
        self.wire.state.lock().unwrap().rts.push(mode);
        Ok(())
    }
}

/// Messages seen by a response handler
#[derive(Default)]
pub struct Inbox {
    messages: Mutex<Vec<String>>,
    arrived: Condvar,
}

impl Inbox {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
        self.arrived.notify_all();
    }

    /// Wait until at least `count` messages arrived
    pub fn wait_for(&self, count: usize, timeout: Duration) -> Vec<String> {
        let messages = self.messages.lock().unwrap();
        let (messages, _) = self
            .arrived
            .wait_timeout_while(messages, timeout, |m| m.len() < count)
            .unwrap();
        messages.clone()
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

pub fn mock_config() -> DeviceConfig {
    DeviceConfig::for_port(MOCK_PORT, 115200)
}

/// Codeword under the default checksum
pub fn codeword(text: &str) -> Vec<u8> {
    Checksum::new(ChecksumConfig::default()).codeword(text)
}

/// Codeword whose first byte is replaced, so it fails validation
pub fn corrupted(text: &str) -> Vec<u8> {
    let mut bytes = codeword(text);
    bytes[0] = b'X';
    bytes
}
