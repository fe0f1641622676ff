//! State owned by one connected session

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::warn;

use super::queue::CommandQueue;
use crate::config::DeviceConfig;
use crate::protocol::RingBuffer;
use crate::signal::Signal;

/// Shared between the three workers of one session
#[derive(Debug)]
pub(crate) struct Session {
    active: AtomicBool,
    /// Configuration the session was opened with
    pub config: DeviceConfig,
    pub ring: RingBuffer,
    /// Set by the receiver when a batch was dropped
    pub overflowed: AtomicBool,
    /// Raised by the receiver after each batch
    pub rx_signal: Signal,
    /// Disconnect epoch the session was opened in
    pub epoch: u64,
}

impl Session {
    pub fn new(config: DeviceConfig, epoch: u64) -> Self {
        let ring = RingBuffer::new(config.rx_buffer_size);
        Self {
            active: AtomicBool::new(true),
            config,
            ring,
            overflowed: AtomicBool::new(false),
            rx_signal: Signal::new(),
            epoch,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::Release);
        self.rx_signal.set();
    }
}

/// A running session and its worker threads
pub(crate) struct SessionHandle {
    pub session: std::sync::Arc<Session>,
    pub workers: Vec<JoinHandle<()>>,
}

impl SessionHandle {
    /// Stop the workers and wait for them
    ///
    /// A worker calling this on its own session is not joined; it exits once
    /// it returns to its loop.
    pub fn shutdown(self, queue: &CommandQueue) {
        self.session.stop();
        queue.wake();
        let current = thread::current().id();
        for worker in self.workers {
            if worker.thread().id() == current {
                continue;
            }
            let name = worker.thread().name().unwrap_or("worker").to_string();
            if worker.join().is_err() {
                warn!("{} panicked", name);
            }
        }
    }
}
