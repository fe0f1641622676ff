//! 16-bit CRC engine
//!
//! A configurable shift-register CRC used to build and verify codewords.
//!
//! Codeword format:
//! - N bytes: command text (8-bit characters)
//! - 2 bytes: check word, ordered per [`ChecksumConfig::byte_order`]
//! - 1 byte: terminator, unless [`ChecksumConfig::omit_terminator`]
//!
//! A receiver validates a codeword by running the text *and* the check bytes
//! through a freshly initialised register: a valid codeword always leaves the
//! same remainder, the residue.
//!
//! # Configuration hazard
//!
//! Nothing here rejects a bad configuration. A zero polynomial, a residue that
//! does not belong to the polynomial, or bit and byte orders that disagree all
//! produce a checksum that silently never validates. Use
//! [`ChecksumConfig::self_test`] to catch these before connecting.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use super::{encode_text, ETX};

/// Samples used to derive the residue of a configuration
const SELF_TEST_SAMPLES: [&[u8]; 2] = [b"123456789", b"codelink"];

/// Significance order for bits within a byte, or bytes within the check word
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Order {
    /// Least significant first (RS-232, IEEE-802)
    #[default]
    LsbFirst,
    /// Most significant first (XMODEM, disk standards)
    MsbFirst,
}

/// Checksum parameters, fixed for the lifetime of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChecksumConfig {
    /// Register value at the start of every message
    pub initial_value: u16,
    /// Generator polynomial, in the form matching `bit_order`
    pub polynomial: u16,
    /// Remainder left by a valid codeword
    pub expected_residue: u16,
    /// Complement the remainder before appending it
    pub post_invert: bool,
    /// Bit processing order
    pub bit_order: Order,
    /// Order of the two check bytes on the wire
    pub byte_order: Order,
    /// End-of-message byte
    pub terminator_byte: u8,
    /// Send no terminator; messages are then delimited by silence
    pub omit_terminator: bool,
}

impl Default for ChecksumConfig {
    fn default() -> Self {
        Self::koopman()
    }
}

impl ChecksumConfig {
    /// Koopman 0xBAAD (HD=4 up to 2048 bits), reversed form for LSB-first links
    pub fn koopman() -> Self {
        Self {
            initial_value: 0xFFFF,
            polynomial: 0xDAAE,
            expected_residue: 0x82C0,
            post_invert: true,
            bit_order: Order::LsbFirst,
            byte_order: Order::LsbFirst,
            terminator_byte: ETX,
            omit_terminator: false,
        }
    }

    /// CRC-CCITT in reversed form (CRC-16/X-25)
    pub fn x25() -> Self {
        Self {
            polynomial: 0x8408,
            expected_residue: 0xF0B8,
            ..Self::koopman()
        }
    }

    /// CRC-CCITT, MSB-first with zero initial value (CRC-16/XMODEM)
    pub fn xmodem() -> Self {
        Self {
            initial_value: 0x0000,
            polynomial: 0x1021,
            expected_residue: 0x0000,
            post_invert: false,
            bit_order: Order::MsbFirst,
            byte_order: Order::MsbFirst,
            terminator_byte: ETX,
            omit_terminator: false,
        }
    }

    /// Whether codewords end with the terminator byte
    pub fn uses_terminator(&self) -> bool {
        !self.omit_terminator
    }

    /// Bytes appended to the text of every codeword
    pub fn overhead(&self) -> usize {
        if self.omit_terminator {
            2
        } else {
            3
        }
    }

    /// Remainder left after running a valid codeword for `sample` back
    /// through the register
    pub fn residue_of(&self, sample: &[u8]) -> u16 {
        let mut engine = Checksum::new(self.clone());
        let codeword = engine.append(sample);
        engine.init();
        engine.update_all(&codeword[..sample.len() + 2])
    }

    /// Check that the configured residue is what these parameters produce
    ///
    /// Fails for a zero polynomial, a residue copied from another polynomial,
    /// and order combinations whose residue depends on the data.
    pub fn self_test(&self) -> bool {
        self.polynomial != 0
            && SELF_TEST_SAMPLES
                .iter()
                .all(|sample| self.residue_of(sample) == self.expected_residue)
    }
}

/// Running CRC register
#[derive(Debug, Clone)]
pub struct Checksum {
    config: ChecksumConfig,
    remainder: u16,
}

impl Checksum {
    /// Create an engine, already initialised
    pub fn new(config: ChecksumConfig) -> Self {
        let remainder = config.initial_value;
        Self { config, remainder }
    }

    /// The parameters this engine runs with
    pub fn config(&self) -> &ChecksumConfig {
        &self.config
    }

    /// Restart the register for a new message
    pub fn init(&mut self) {
        self.remainder = self.config.initial_value;
    }

    /// Current register contents
    pub fn remainder(&self) -> u16 {
        self.remainder
    }

    /// Fold one byte into the register
    pub fn update(&mut self, byte: u8) -> u16 {
        let poly = self.config.polynomial;
        match self.config.bit_order {
            Order::LsbFirst => {
                self.remainder ^= u16::from(byte);
                for _ in 0..8 {
                    let lsb = self.remainder & 0x0001 != 0;
                    self.remainder >>= 1;
                    if lsb {
                        self.remainder ^= poly;
                    }
                }
            }
            Order::MsbFirst => {
                self.remainder ^= u16::from(byte) << 8;
                for _ in 0..8 {
                    let msb = self.remainder & 0x8000 != 0;
                    self.remainder <<= 1;
                    if msb {
                        self.remainder ^= poly;
                    }
                }
            }
        }
        self.remainder
    }

    /// Fold a run of bytes into the register
    pub fn update_all(&mut self, bytes: &[u8]) -> u16 {
        for &b in bytes {
            self.update(b);
        }
        self.remainder
    }

    /// Whether the register holds the residue of a valid codeword
    pub fn good(&self) -> bool {
        self.remainder == self.config.expected_residue
    }

    /// Compute the check word for `data`, starting from a fresh register
    pub fn finalize(&mut self, data: &[u8]) -> u16 {
        self.init();
        let remainder = self.update_all(data);
        if self.config.post_invert {
            !remainder
        } else {
            remainder
        }
    }

    /// Build the codeword for `data`: data, check bytes, terminator
    pub fn append(&mut self, data: &[u8]) -> Vec<u8> {
        let check = self.finalize(data);

        let mut check_bytes = [0u8; 2];
        match self.config.byte_order {
            Order::LsbFirst => LittleEndian::write_u16(&mut check_bytes, check),
            Order::MsbFirst => BigEndian::write_u16(&mut check_bytes, check),
        }

        let mut codeword = Vec::with_capacity(data.len() + self.config.overhead());
        codeword.extend_from_slice(data);
        codeword.extend_from_slice(&check_bytes);
        if self.config.uses_terminator() {
            codeword.push(self.config.terminator_byte);
        }
        codeword
    }

    /// Build the codeword for a text command
    pub fn codeword(&mut self, text: &str) -> Vec<u8> {
        self.append(&encode_text(text))
    }
}
