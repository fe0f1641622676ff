//! Link statistics

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Live counters, updated by the workers without locking
#[derive(Debug, Default)]
pub(crate) struct Counters {
    events_received: AtomicU64,
    bytes_read: AtomicU64,
    terminators_seen: AtomicU64,
    messages_delivered: AtomicU64,
    buffer_overflows: AtomicU64,
    crc_errors: AtomicU64,
    resets: AtomicU64,
    bytes_written: AtomicU64,
    commands_sent: AtomicU64,
    last_rx_remainder: AtomicU64,
}

/// Point-in-time copy of the link statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    /// Data-ready notifications from the transport
    pub events_received: u64,
    /// Bytes stored in the receive ring
    pub bytes_read: u64,
    /// Terminator bytes seen by the framer
    pub terminators_seen: u64,
    /// Messages handed to the response handler this session
    pub messages_delivered: u64,
    /// Receive batches dropped because the ring was full
    pub buffer_overflows: u64,
    /// Checksum failures this session
    pub crc_errors: u64,
    /// Resets, automatic and explicit
    pub resets: u64,
    /// Bytes handed to the transport
    pub bytes_written: u64,
    /// Codewords fully written
    pub commands_sent: u64,
    /// Longest gap between two received batches
    pub longest_silence_ms: u64,
    /// Checksum remainder after the last validation
    pub last_rx_remainder: u16,
}

impl Counters {
    pub fn record_event(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self, bytes: usize) {
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_terminator(&self) {
        self.terminators_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_overflow(&self) {
        self.buffer_overflows.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a checksum failure, returning the new session total
    pub fn record_crc_error(&self) -> u64 {
        self.crc_errors.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn record_reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self, bytes: usize) {
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_command(&self) {
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_rx_remainder(&self, remainder: u16) {
        self.last_rx_remainder.store(u64::from(remainder), Ordering::Relaxed);
    }

    /// Zero the per-session counters
    pub fn begin_session(&self) {
        self.crc_errors.store(0, Ordering::Release);
        self.messages_delivered.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self, longest_silence: Duration) -> CounterSnapshot {
        CounterSnapshot {
            events_received: self.events_received.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            terminators_seen: self.terminators_seen.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            buffer_overflows: self.buffer_overflows.load(Ordering::Relaxed),
            crc_errors: self.crc_errors.load(Ordering::Acquire),
            resets: self.resets.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            longest_silence_ms: u64::try_from(longest_silence.as_millis()).unwrap_or(u64::MAX),
            last_rx_remainder: self.last_rx_remainder.load(Ordering::Relaxed) as u16,
        }
    }
}
