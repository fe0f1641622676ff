//! Receive worker: transport to ring buffer

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use super::session::Session;
use super::Inner;
use crate::transport::Transport;

/// Longest single wait for incoming data
const RX_WAIT: Duration = Duration::from_millis(50);

/// Pause after a transport error
const RX_ERROR_BACKOFF: Duration = Duration::from_millis(100);

pub(super) fn run(inner: Arc<Inner>, session: Arc<Session>, mut transport: Box<dyn Transport>) {
    debug!("receive worker started");
    let mut xfer = vec![0u8; session.ring.capacity()];

    while session.is_active() {
        match transport.wait_for_data(RX_WAIT) {
            Ok(true) => receive(&inner, &session, transport.as_mut(), &mut xfer),
            Ok(false) => {}
            Err(e) => {
                if !session.is_active() {
                    break;
                }
                warn!("receive failed: {}", e);
                thread::sleep(RX_ERROR_BACKOFF);
            }
        }
    }
    debug!("receive worker stopped");
}

fn receive(inner: &Inner, session: &Session, transport: &mut dyn Transport, xfer: &mut [u8]) {
    inner.counters.record_event();

    let n = match transport.read(xfer) {
        Ok(n) => n,
        Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => 0,
        Err(e) => {
            warn!("read failed: {}", e);
            0
        }
    };
    if n == 0 {
        debug!("data event with nothing to read");
        return;
    }

    inner.rx_clock.restart();
    match session.ring.write(&xfer[..n]) {
        Ok(()) => {
            inner.counters.record_read(n);
            debug!(
                "received {} bytes: {}",
                n,
                session.config.log_format.render(&xfer[..n])
            );
        }
        Err(e) => {
            session.overflowed.store(true, Ordering::Release);
            inner.counters.record_overflow();
            warn!("{}; data dropped", e);
        }
    }
    session.rx_signal.set();
}
