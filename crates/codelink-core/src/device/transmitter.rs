//! Transmit worker: command queue to transport
//!
//! Codewords go out whole, at least the inter-message delay apart, or one
//! byte at a time when an inter-byte delay is configured.

use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use super::session::Session;
use super::Inner;
use crate::protocol::{encode_text, Checksum};
use crate::transport::Transport;

/// Longest wait for a queued command
const QUEUE_WAIT: Duration = Duration::from_secs(1);

/// Longest single sleep while pacing, so shutdown is noticed
const PACING_SLICE: Duration = Duration::from_millis(20);

/// Minimum pause after a failed write
const TX_ERROR_BACKOFF: Duration = Duration::from_millis(20);

pub(super) fn run(inner: Arc<Inner>, session: Arc<Session>, mut transport: Box<dyn Transport>) {
    let config = &session.config;
    let mut checksum = config.checksum.clone().map(Checksum::new);
    let inter_byte = config.inter_byte_delay();
    let inter_message = config.inter_message_delay();
    let gap = inter_byte.unwrap_or(inter_message);

    let mut current: Option<String> = None;
    let mut pending: Vec<u8> = Vec::new();
    let mut sent = 0;
    inner.tx_clock.restart();
    debug!("transmit worker started");

    while session.is_active() {
        if sent >= pending.len() {
            if let Some(command) = inner.queue.pop_timeout(QUEUE_WAIT) {
                pending = match checksum.as_mut() {
                    Some(crc) => crc.codeword(&command),
                    None => encode_text(&command),
                };
                sent = 0;
                current = Some(command);
            }
            continue;
        }

        let since = inner.tx_clock.elapsed().unwrap_or(Duration::MAX);
        if since < gap {
            thread::sleep((gap - since).min(PACING_SLICE));
            continue;
        }

        let end = match inter_byte {
            Some(_) => sent + 1,
            None => pending.len(),
        };
        let chunk = &pending[sent..end];
        match transport.write_all(chunk) {
            Ok(()) => {
                inner.tx_clock.restart();
                inner.counters.record_write(chunk.len());
                if inter_byte.is_none() {
                    debug!(
                        "transmit ({} ms since last): {}",
                        since.as_millis(),
                        config.log_format.render(chunk)
                    );
                }
                sent = end;
                if sent == pending.len() {
                    inner.counters.record_command();
                }
            }
            Err(e) => {
                warn!("transmit failed: {}", e);
                thread::sleep(inter_message.max(TX_ERROR_BACKOFF));
            }
        }
    }

    match current {
        Some(command) if sent < pending.len() => {
            debug!(
                "requeueing unsent command \"{}\"",
                config.log_format.render_text(&command)
            );
            inner.queue.requeue(command);
        }
        _ => inner.queue.abandon(),
    }
    debug!("transmit worker stopped");
}
