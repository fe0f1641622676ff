//! Link Protocol
//!
//! Checksummed codewords and the receive-side reassembly of messages.
//!
//! A codeword is the command text, two check bytes and (optionally) a
//! terminator byte. Incoming bytes land in a [`RingBuffer`] and a [`Framer`]
//! turns them back into validated messages, either by watching for the
//! terminator or, when no terminator is used, by treating each burst of bytes
//! followed by a period of silence as one message.

pub mod checksum;
mod error;
pub mod framing;
pub mod ring;

pub use checksum::{Checksum, ChecksumConfig, Order};
pub use error::ProtocolError;
pub use framing::{FrameEvent, Framer, FramingMode};
pub use ring::RingBuffer;

/// Default receive ring capacity in bytes
pub const DEFAULT_RX_BUFFER_SIZE: usize = 4096;

/// Number of CRC errors tolerated per session before an automatic reset
pub const MAX_CRC_ERRORS: u64 = 3;

/// Bytes examined after a terminator that failed validation before the
/// failure is declared a CRC error
pub const DEFAULT_TERMINATOR_LOOKAHEAD: u8 = 2;

/// ASCII end-of-text, the customary terminator byte
pub const ETX: u8 = 0x03;

/// Encode text as 8-bit bytes, one byte per character
///
/// Characters outside the 8-bit range are sent as `?`.
pub fn encode_text(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// Decode 8-bit bytes into text, one character per byte
pub fn decode_text(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}
