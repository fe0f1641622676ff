//! Receive ring buffer
//!
//! Fixed-capacity circular byte store between the receive path and the framer.
//!
//! Exactly one thread writes (advancing the write cursor) and exactly one thread
//! reads (advancing the head cursor). The cursors are atomics published with
//! release/acquire ordering, so the two sides never share a lock. The buffer is
//! empty when the cursors are equal and full when one more byte would make
//! them equal, which leaves `capacity - 1` bytes usable.

use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use super::{decode_text, ProtocolError};

/// Circular byte buffer with a single writer and a single reader
pub struct RingBuffer {
    data: Box<[AtomicU8]>,
    /// Next slot the receive path writes
    write: AtomicUsize,
    /// First byte not yet consumed by the framer
    head: AtomicUsize,
}

impl RingBuffer {
    /// Create an empty buffer; capacities below 2 are raised to 2
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            data: (0..capacity).map(|_| AtomicU8::new(0)).collect(),
            write: AtomicUsize::new(0),
            head: AtomicUsize::new(0),
        }
    }

    /// Physical size of the buffer
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Current write cursor; may move concurrently
    pub fn write_cursor(&self) -> usize {
        self.write.load(Ordering::Acquire)
    }

    /// Current head cursor
    pub fn head(&self) -> usize {
        self.head.load(Ordering::Acquire)
    }

    /// Bytes between the head and the write cursor
    pub fn len(&self) -> usize {
        self.span(self.head(), self.write_cursor())
    }

    /// Whether there is nothing between the head and the write cursor
    pub fn is_empty(&self) -> bool {
        self.head() == self.write_cursor()
    }

    /// Bytes that can be written before the buffer is full
    pub fn free(&self) -> usize {
        self.capacity() - 1 - self.len()
    }

    /// Cursor one position after `cursor`
    pub fn advance(&self, cursor: usize) -> usize {
        (cursor + 1) % self.capacity()
    }

    /// Cursor `n` positions before `cursor`
    pub fn retreat_by(&self, n: usize, cursor: usize) -> usize {
        let cap = self.capacity();
        (cursor + cap - n % cap) % cap
    }

    /// Logical distance from `from` forward to `to`
    pub fn span(&self, from: usize, to: usize) -> usize {
        let cap = self.capacity();
        (to + cap - from) % cap
    }

    /// Byte stored at `cursor`
    pub fn byte_at(&self, cursor: usize) -> u8 {
        self.data[cursor % self.capacity()].load(Ordering::Relaxed)
    }

    /// Append received bytes (receive path only)
    ///
    /// If `bytes` does not fit, nothing is written and the unread content is
    /// left untouched; the caller drops the data and records the overflow.
    pub fn write(&self, bytes: &[u8]) -> Result<(), ProtocolError> {
        let available = self.free();
        if bytes.len() > available {
            return Err(ProtocolError::BufferOverflow {
                incoming: bytes.len(),
                available,
            });
        }

        // Only this thread moves the write cursor
        let start = self.write.load(Ordering::Relaxed);
        let first = bytes.len().min(self.capacity() - start);
        let (before_wrap, after_wrap) = bytes.split_at(first);

        for (slot, &b) in self.data[start..start + first].iter().zip(before_wrap) {
            slot.store(b, Ordering::Relaxed);
        }
        for (slot, &b) in self.data[..after_wrap.len()].iter().zip(after_wrap) {
            slot.store(b, Ordering::Relaxed);
        }

        self.write.store((start + bytes.len()) % self.capacity(), Ordering::Release);
        Ok(())
    }

    /// Bytes from the head up to (not including) `tail`
    pub fn extract_bytes(&self, tail: usize) -> Vec<u8> {
        let head = self.head();
        let tail = tail % self.capacity();
        let mut out = Vec::with_capacity(self.span(head, tail));
        if tail >= head {
            out.extend(self.data[head..tail].iter().map(|b| b.load(Ordering::Relaxed)));
        } else {
            out.extend(self.data[head..].iter().map(|b| b.load(Ordering::Relaxed)));
            out.extend(self.data[..tail].iter().map(|b| b.load(Ordering::Relaxed)));
        }
        out
    }

    /// Text from the head up to (not including) `tail`
    pub fn extract(&self, tail: usize) -> String {
        decode_text(&self.extract_bytes(tail))
    }

    /// Consume everything before `cursor` (framer only)
    pub fn set_head(&self, cursor: usize) {
        self.head.store(cursor % self.capacity(), Ordering::Release);
    }

    /// Discard all unread content, returning the new head
    pub fn clear(&self) -> usize {
        let write = self.write_cursor();
        self.head.store(write, Ordering::Release);
        write
    }
}

impl fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("head", &self.head())
            .field("write", &self.write_cursor())
            .finish()
    }
}
