//! Message framing
//!
//! Turns the byte stream collected in a [`RingBuffer`] back into messages.
//!
//! Two modes, chosen once per session from the checksum configuration:
//!
//! - **Terminator**: bytes are folded into a running checksum as they arrive.
//!   At each terminator byte the register is tested; a valid register ends the
//!   message. A terminator that fails is not trusted right away, because the
//!   check bytes themselves may contain the terminator value. The framer looks
//!   at the next `lookahead` bytes, and only if none of them closes a valid
//!   message is the failure reported and framing resumed after the failed
//!   terminator. Bytes inside that window are scanned again, so a short
//!   codeword right after a corrupt one is still found.
//! - **Silence**: everything buffered once the line has been quiet for
//!   `min_silence` is one message. Used when no terminator is sent.
//!
//! The framer holds no locks and never blocks; the caller decides when to poll.

use std::time::Duration;

use super::{decode_text, Checksum, ChecksumConfig, RingBuffer};

/// How message boundaries are found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingMode {
    /// A configured terminator byte ends each message
    Terminator,
    /// An idle gap on the line ends each message
    Silence,
}

impl FramingMode {
    /// Mode implied by a checksum configuration (`None` = no checksum)
    pub fn for_checksum(checksum: Option<&ChecksumConfig>) -> Self {
        match checksum {
            Some(config) if config.uses_terminator() => FramingMode::Terminator,
            _ => FramingMode::Silence,
        }
    }
}

/// Something the framer found while scanning
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A terminator byte went past, valid or not
    Terminator,
    /// A validated message with its check bytes removed
    Message(String),
    /// A message failed validation
    ///
    /// `raw` is the span as received, check bytes included and terminator
    /// excluded. It is `None` when the content was lost to a buffer overflow.
    CrcError {
        /// The rejected span
        raw: Option<String>,
    },
}

/// A terminator that failed validation, waiting to be confirmed as an error
#[derive(Debug, Clone, Copy)]
struct Suspect {
    at: usize,
    seen: u8,
    /// Too short to be a codeword and inside the window of the previous
    /// failure, so it belongs to that failure
    folded: bool,
}

/// Message reassembly state for one direction of one session
#[derive(Debug)]
pub struct Framer {
    mode: FramingMode,
    checksum: Option<Checksum>,
    lookahead: u8,
    min_silence: Duration,
    /// Next byte to scan (terminator mode)
    read: usize,
    suspect: Option<Suspect>,
    /// Bytes being scanned a second time after a failed window
    replay: u8,
    /// Register value at the last validation
    checked: Option<u16>,
}

impl Framer {
    /// Create a framer; the mode follows from `checksum`
    pub fn new(checksum: Option<ChecksumConfig>, lookahead: u8, min_silence: Duration) -> Self {
        Self {
            mode: FramingMode::for_checksum(checksum.as_ref()),
            checksum: checksum.map(Checksum::new),
            lookahead,
            min_silence,
            read: 0,
            suspect: None,
            replay: 0,
            checked: None,
        }
    }

    /// The active framing mode
    pub fn mode(&self) -> FramingMode {
        self.mode
    }

    /// Checksum register as it stood at the last validation
    ///
    /// Equals the configured residue after a valid message.
    pub fn remainder(&self) -> Option<u16> {
        self.checked
    }

    /// Whether buffered bytes are waiting for the line to go quiet
    pub fn awaiting_silence(&self, ring: &RingBuffer) -> bool {
        self.mode == FramingMode::Silence && !ring.is_empty()
    }

    /// Drop everything buffered and start over at the write cursor
    pub fn resync(&mut self, ring: &RingBuffer) {
        self.read = ring.clear();
        self.suspect = None;
        self.replay = 0;
        if let Some(crc) = self.checksum.as_mut() {
            crc.init();
        }
    }

    /// Scan newly buffered bytes
    ///
    /// `overflowed` reports that the receive path dropped data since the last
    /// poll; `quiet_for` is the time since bytes last arrived.
    pub fn poll(
        &mut self,
        ring: &RingBuffer,
        overflowed: bool,
        quiet_for: Duration,
    ) -> Vec<FrameEvent> {
        self.poll_until(ring, ring.write_cursor(), overflowed, quiet_for)
    }

    /// Scan buffered bytes up to the cursor `tail`
    ///
    /// When another thread fills the ring, read `tail` from
    /// [`RingBuffer::write_cursor`] before measuring `quiet_for`. Bytes that
    /// land in between are then left for the next poll instead of closing a
    /// silence-framed message early.
    pub fn poll_until(
        &mut self,
        ring: &RingBuffer,
        tail: usize,
        overflowed: bool,
        quiet_for: Duration,
    ) -> Vec<FrameEvent> {
        let mut events = Vec::new();
        match self.mode {
            FramingMode::Terminator => {
                self.poll_terminated(ring, tail, &mut events);
                if overflowed {
                    events.push(FrameEvent::CrcError { raw: None });
                    self.resync(ring);
                }
            }
            FramingMode::Silence => {
                if overflowed {
                    // The partial message is unrecoverable
                    self.resync(ring);
                } else if quiet_for >= self.min_silence {
                    self.poll_silence(ring, tail, &mut events);
                }
            }
        }
        events
    }

    fn poll_terminated(&mut self, ring: &RingBuffer, tail: usize, events: &mut Vec<FrameEvent>) {
        let Some(crc) = self.checksum.as_mut() else {
            return;
        };
        let terminator = crc.config().terminator_byte;

        while self.read != tail {
            let pos = self.read;
            let byte = ring.byte_at(pos);
            let replaying = self.replay > 0;
            self.replay = self.replay.saturating_sub(1);
            if let Some(suspect) = self.suspect.as_mut() {
                suspect.seen = suspect.seen.saturating_add(1);
            }

            if byte == terminator {
                // Replayed terminators were counted on the first pass
                if !replaying {
                    events.push(FrameEvent::Terminator);
                }
                self.checked = Some(crc.remainder());
                // A real codeword has at least its two check bytes
                let span = ring.span(ring.head(), pos);
                if crc.good() && span >= 2 {
                    let end = ring.retreat_by(2, pos);
                    events.push(FrameEvent::Message(ring.extract(end)));

                    self.read = ring.advance(pos);
                    ring.set_head(self.read);
                    self.suspect = None;
                    crc.init();
                    continue;
                }
                // The window stays anchored at the first failure
                if self.suspect.is_none() {
                    self.suspect = Some(Suspect {
                        at: pos,
                        seen: 0,
                        folded: replaying && span < 2,
                    });
                }
            }

            crc.update(byte);
            self.read = ring.advance(pos);

            if let Some(suspect) = self.suspect {
                if suspect.seen >= self.lookahead {
                    // The failed terminator did end a message; rescan right after it
                    if !suspect.folded {
                        events.push(FrameEvent::CrcError {
                            raw: Some(ring.extract(suspect.at)),
                        });
                    }

                    self.read = ring.advance(suspect.at);
                    ring.set_head(self.read);
                    self.replay = suspect.seen;
                    self.suspect = None;
                    crc.init();
                }
            }
        }
    }

    fn poll_silence(&mut self, ring: &RingBuffer, tail: usize, events: &mut Vec<FrameEvent>) {
        if ring.head() == tail {
            return;
        }

        let mut bytes = ring.extract_bytes(tail);
        ring.set_head(tail);
        self.read = tail;

        match self.checksum.as_mut() {
            None => events.push(FrameEvent::Message(decode_text(&bytes))),
            Some(crc) => {
                crc.init();
                crc.update_all(&bytes);
                self.checked = Some(crc.remainder());
                if crc.good() && bytes.len() >= 2 {
                    bytes.truncate(bytes.len() - 2);
                    if !bytes.is_empty() {
                        events.push(FrameEvent::Message(decode_text(&bytes)));
                    }
                } else {
                    events.push(FrameEvent::CrcError {
                        raw: Some(decode_text(&bytes)),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DEFAULT_TERMINATOR_LOOKAHEAD, ETX};
    use pretty_assertions::assert_eq;

    const QUIET: Duration = Duration::from_millis(50);
    const BUSY: Duration = Duration::from_millis(0);

    fn codeword(text: &str) -> Vec<u8> {
        Checksum::new(ChecksumConfig::koopman()).codeword(text)
    }

    fn terminated() -> Framer {
        Framer::new(
            Some(ChecksumConfig::koopman()),
            DEFAULT_TERMINATOR_LOOKAHEAD,
            Duration::from_millis(5),
        )
    }

    fn messages(events: &[FrameEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                FrameEvent::Message(m) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    fn crc_errors(events: &[FrameEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, FrameEvent::CrcError { .. }))
            .count()
    }

    #[test]
    fn test_mode_selection() {
        assert_eq!(
            FramingMode::for_checksum(Some(&ChecksumConfig::koopman())),
            FramingMode::Terminator
        );
        let omitted = ChecksumConfig {
            omit_terminator: true,
            ..ChecksumConfig::koopman()
        };
        assert_eq!(FramingMode::for_checksum(Some(&omitted)), FramingMode::Silence);
        assert_eq!(FramingMode::for_checksum(None), FramingMode::Silence);
    }

    #[test]
    fn test_single_message() {
        let ring = RingBuffer::new(64);
        let mut framer = terminated();
        assert_eq!(framer.remainder(), None);
        ring.write(&codeword("PING")).unwrap();

        let events = framer.poll(&ring, false, BUSY);
        assert_eq!(
            events,
            vec![FrameEvent::Terminator, FrameEvent::Message("PING".into())]
        );
        assert!(ring.is_empty());
        assert_eq!(framer.remainder(), Some(0x82C0));
    }

    #[test]
    fn test_several_messages_in_one_write() {
        let ring = RingBuffer::new(64);
        let mut framer = terminated();
        let mut bytes = codeword("ONE");
        bytes.extend(codeword("TWO"));
        bytes.extend(codeword("THREE"));
        ring.write(&bytes).unwrap();

        let events = framer.poll(&ring, false, BUSY);
        assert_eq!(messages(&events), vec!["ONE", "TWO", "THREE"]);
    }

    #[test]
    fn test_byte_at_a_time() {
        let ring = RingBuffer::new(64);
        let mut framer = terminated();
        let mut delivered = Vec::new();
        for b in codeword("STATUS?") {
            ring.write(&[b]).unwrap();
            delivered.extend(messages(&framer.poll(&ring, false, BUSY)));
        }
        assert_eq!(delivered, vec!["STATUS?"]);
    }

    #[test]
    fn test_poll_without_new_bytes_is_a_no_op() {
        let ring = RingBuffer::new(64);
        let mut framer = terminated();
        ring.write(&codeword("PING")).unwrap();
        assert_eq!(messages(&framer.poll(&ring, false, BUSY)), vec!["PING"]);
        assert!(framer.poll(&ring, false, BUSY).is_empty());
        assert!(framer.poll(&ring, false, QUIET).is_empty());
    }

    #[test]
    fn test_terminator_value_in_first_check_byte() {
        // "CX" -> 43 58 03 24 03
        let bytes = codeword("CX");
        assert_eq!(bytes[2], ETX);

        let ring = RingBuffer::new(64);
        let mut framer = terminated();
        ring.write(&bytes).unwrap();
        let events = framer.poll(&ring, false, BUSY);
        assert_eq!(messages(&events), vec!["CX"]);
        assert_eq!(crc_errors(&events), 0);
    }

    #[test]
    fn test_terminator_value_in_second_check_byte() {
        // "PM" -> 50 4D E9 03 03
        let bytes = codeword("PM");
        assert_eq!(bytes[3], ETX);

        let ring = RingBuffer::new(64);
        let mut framer = terminated();
        ring.write(&bytes).unwrap();
        let events = framer.poll(&ring, false, BUSY);
        assert_eq!(messages(&events), vec!["PM"]);
        assert_eq!(crc_errors(&events), 0);
    }

    #[test]
    fn test_corrupt_message_is_reported_and_next_survives() {
        let ring = RingBuffer::new(64);
        let mut framer = terminated();
        let mut bad = codeword("HELLO");
        bad[1] = b'A';
        ring.write(&bad).unwrap();

        // Not reported until the lookahead window closes
        let events = framer.poll(&ring, false, BUSY);
        assert_eq!(events, vec![FrameEvent::Terminator]);

        ring.write(&codeword("PING")).unwrap();
        let events = framer.poll(&ring, false, BUSY);

        let raw: String = decode_text(&bad[..bad.len() - 1]);
        assert_eq!(
            events,
            vec![
                FrameEvent::CrcError { raw: Some(raw) },
                FrameEvent::Terminator,
                FrameEvent::Message("PING".into()),
            ]
        );
    }

    #[test]
    fn test_each_corrupt_codeword_counts_once() {
        let ring = RingBuffer::new(256);
        let mut framer = terminated();
        for _ in 0..4 {
            let mut bad = codeword("READ 12");
            bad[0] = b'X';
            ring.write(&bad).unwrap();
        }
        ring.write(&codeword("OK")).unwrap();

        let events = framer.poll(&ring, false, BUSY);
        assert_eq!(crc_errors(&events), 4);
        assert_eq!(messages(&events), vec!["OK"]);
    }

    #[test]
    fn test_short_codeword_after_corrupt_one() {
        // "'" -> 27 03 B2 03, whose first check byte falls in the window of
        // the corrupt codeword's terminator
        let short = codeword("'");
        assert_eq!(short, vec![0x27, ETX, 0xB2, ETX]);

        let ring = RingBuffer::new(64);
        let mut framer = terminated();
        let mut bad = codeword("READ 12");
        bad[0] = b'X';
        let mut bytes = bad.clone();
        bytes.extend(&short);
        bytes.extend(codeword("OK"));
        ring.write(&bytes).unwrap();

        let events = framer.poll(&ring, false, BUSY);
        assert_eq!(
            events,
            vec![
                FrameEvent::Terminator,
                FrameEvent::Terminator,
                FrameEvent::CrcError {
                    raw: Some(decode_text(&bad[..bad.len() - 1]))
                },
                FrameEvent::Terminator,
                FrameEvent::Message("'".into()),
                FrameEvent::Terminator,
                FrameEvent::Message("OK".into()),
            ]
        );
    }

    #[test]
    fn test_terminator_in_corrupt_check_bytes_counts_once() {
        // Find a text whose first check byte is the terminator value
        let text = (0..10_000)
            .map(|n| format!("R{}", n))
            .find(|t| codeword(t)[t.len()] == ETX)
            .unwrap();
        let mut bad = codeword(&text);
        bad[0] = b'X';

        let ring = RingBuffer::new(64);
        let mut framer = terminated();
        ring.write(&bad).unwrap();
        ring.write(&codeword("NEXT")).unwrap();

        let events = framer.poll(&ring, false, BUSY);
        assert_eq!(crc_errors(&events), 1);
        assert_eq!(messages(&events), vec!["NEXT"]);
    }

    #[test]
    fn test_stray_terminator() {
        let ring = RingBuffer::new(64);
        let mut framer = terminated();
        let mut bytes = vec![ETX];
        bytes.extend(codeword("PING"));
        ring.write(&bytes).unwrap();

        let events = framer.poll(&ring, false, BUSY);
        assert_eq!(crc_errors(&events), 1);
        assert_eq!(messages(&events), vec!["PING"]);
    }

    #[test]
    fn test_zero_lookahead_fails_fast() {
        let ring = RingBuffer::new(64);
        let mut framer = Framer::new(Some(ChecksumConfig::koopman()), 0, Duration::ZERO);
        ring.write(&codeword("CX")).unwrap();

        // The check byte that looks like a terminator is now fatal
        let events = framer.poll(&ring, false, BUSY);
        assert!(crc_errors(&events) >= 1);
        assert!(messages(&events).is_empty());
    }

    #[test]
    fn test_message_across_wraparound() {
        let ring = RingBuffer::new(16);
        let mut framer = terminated();
        for text in ["ABCDEFGH", "IJKLMNOP", "QRSTUVWX"] {
            ring.write(&codeword(text)).unwrap();
            assert_eq!(messages(&framer.poll(&ring, false, BUSY)), vec![text]);
        }
    }

    #[test]
    fn test_overflow_resyncs_terminator_mode() {
        let ring = RingBuffer::new(64);
        let mut framer = terminated();
        ring.write(b"HALF A MESS").unwrap();
        framer.poll(&ring, false, BUSY);

        let events = framer.poll(&ring, true, BUSY);
        assert_eq!(events, vec![FrameEvent::CrcError { raw: None }]);
        assert!(ring.is_empty());

        ring.write(&codeword("CLEAN")).unwrap();
        assert_eq!(messages(&framer.poll(&ring, false, BUSY)), vec!["CLEAN"]);
    }

    #[test]
    fn test_silence_waits_for_quiet_line() {
        let config = ChecksumConfig {
            omit_terminator: true,
            ..ChecksumConfig::koopman()
        };
        let mut framer = Framer::new(Some(config), 2, Duration::from_millis(20));
        let ring = RingBuffer::new(64);

        let bytes = codeword("HELLO");
        let bytes = &bytes[..bytes.len() - 1];
        ring.write(&bytes[..3]).unwrap();
        assert!(framer.poll(&ring, false, Duration::from_millis(2)).is_empty());
        assert!(framer.awaiting_silence(&ring));

        ring.write(&bytes[3..]).unwrap();
        assert!(framer.poll(&ring, false, Duration::from_millis(2)).is_empty());

        let events = framer.poll(&ring, false, Duration::from_millis(25));
        assert_eq!(events, vec![FrameEvent::Message("HELLO".into())]);
        assert!(!framer.awaiting_silence(&ring));
    }

    #[test]
    fn test_silence_ignores_bytes_after_tail() {
        let config = ChecksumConfig {
            omit_terminator: true,
            ..ChecksumConfig::koopman()
        };
        let mut framer = Framer::new(Some(config.clone()), 2, Duration::from_millis(5));
        let ring = RingBuffer::new(64);

        ring.write(&Checksum::new(config).codeword("DONE")).unwrap();
        let tail = ring.write_cursor();
        // Start of the next message lands after the quiet period was measured
        ring.write(b"HEL").unwrap();

        let events = framer.poll_until(&ring, tail, false, QUIET);
        assert_eq!(events, vec![FrameEvent::Message("DONE".into())]);
        assert_eq!(ring.len(), 3);
        assert!(framer.awaiting_silence(&ring));
    }

    #[test]
    fn test_silence_without_checksum_delivers_raw() {
        let mut framer = Framer::new(None, 2, Duration::ZERO);
        let ring = RingBuffer::new(64);
        ring.write(b"raw text\r\n").unwrap();
        let events = framer.poll(&ring, false, BUSY);
        assert_eq!(events, vec![FrameEvent::Message("raw text\r\n".into())]);
    }

    #[test]
    fn test_silence_crc_error_and_empty_window() {
        let config = ChecksumConfig {
            omit_terminator: true,
            ..ChecksumConfig::koopman()
        };
        let mut framer = Framer::new(Some(config), 2, Duration::ZERO);
        let ring = RingBuffer::new(64);

        // Empty window is not an error
        assert!(framer.poll(&ring, false, QUIET).is_empty());

        ring.write(b"garbage").unwrap();
        let events = framer.poll(&ring, false, QUIET);
        assert_eq!(
            events,
            vec![FrameEvent::CrcError {
                raw: Some("garbage".into())
            }]
        );
        assert!(ring.is_empty());
    }

    #[test]
    fn test_silence_overflow_discards_partial() {
        let config = ChecksumConfig {
            omit_terminator: true,
            ..ChecksumConfig::koopman()
        };
        let mut framer = Framer::new(Some(config.clone()), 2, Duration::from_millis(5));
        let ring = RingBuffer::new(16);

        ring.write(b"PARTIAL").unwrap();
        assert!(ring.write(&[b'x'; 20]).is_err());
        assert!(framer.poll(&ring, true, QUIET).is_empty());
        assert!(ring.is_empty());

        let next = Checksum::new(config).codeword("NEXT");
        ring.write(&next).unwrap();
        assert_eq!(
            framer.poll(&ring, false, QUIET),
            vec![FrameEvent::Message("NEXT".into())]
        );
    }
}
