//! Framing worker: ring buffer to response handler

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::session::Session;
use super::Inner;
use crate::protocol::{FrameEvent, Framer};

/// Wait between scans when nothing is pending
const IDLE_WAIT: Duration = Duration::from_millis(100);

/// Shortest wait while a silence-framed message is pending
const MIN_SILENCE_WAIT: Duration = Duration::from_millis(1);

pub(super) fn run(inner: Arc<Inner>, session: Arc<Session>) {
    let config = &session.config;
    let mut framer = Framer::new(
        config.checksum.clone(),
        config.terminator_lookahead,
        config.silence_timeout(),
    );
    debug!("framing worker started ({:?} mode)", framer.mode());

    while session.is_active() {
        let overflowed = session.overflowed.swap(false, Ordering::AcqRel);
        // Tail before clock: anything stored later waits for the next pass
        let tail = session.ring.write_cursor();
        let quiet_for = inner.rx_clock.elapsed().unwrap_or(Duration::MAX);

        for event in framer.poll_until(&session.ring, tail, overflowed, quiet_for) {
            dispatch(&inner, &session, event);
        }
        if let Some(remainder) = framer.remainder() {
            inner.counters.set_rx_remainder(remainder);
        }

        let wait = if framer.awaiting_silence(&session.ring) {
            config.silence_timeout().max(MIN_SILENCE_WAIT)
        } else {
            IDLE_WAIT
        };
        session.rx_signal.wait_timeout(wait);
    }
    debug!("framing worker stopped");
}

fn dispatch(inner: &Arc<Inner>, session: &Session, event: FrameEvent) {
    match event {
        FrameEvent::Terminator => inner.counters.record_terminator(),
        FrameEvent::Message(text) => inner.deliver(&text),
        FrameEvent::CrcError { raw } => {
            match &raw {
                Some(raw) => warn!(
                    "\"{}\" [CRC error]",
                    session.config.log_format.render_text(raw)
                ),
                None => warn!("receive overflow [CRC error]"),
            }
            if session.config.ignore_crc_errors {
                if let Some(raw) = raw {
                    inner.deliver(&raw);
                }
            }
            inner.handle_crc_error(session.epoch);
        }
    }
}
