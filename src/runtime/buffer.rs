//! Per-connection receive buffer.
//!
//! Bytes are appended at the tail as they are read and removed from the head
//! as they are written back out. The buffer has no size limit; it grows until
//! the bytes it holds are consumed.

use bytes::{Buf, BytesMut};

/// Growable byte queue with front truncation.
///
/// Backed by `BytesMut`, so consuming a prefix only moves the start offset
/// and never shifts the remaining bytes.
#[derive(Debug, Default)]
pub struct ReceiveBuffer {
    bytes: BytesMut,
}

impl ReceiveBuffer {
    /// Create an empty buffer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: BytesMut::with_capacity(capacity),
        }
    }

    /// Read up to `max` bytes into the tail of the buffer.
    ///
    /// `read` receives a zeroed slice of `max` bytes and returns how many of
    /// them it filled; the rest is discarded. Returns the number appended.
    pub fn fill_with<F>(&mut self, max: usize, read: F) -> usize
    where
        F: FnOnce(&mut [u8]) -> usize,
    {
        let start = self.bytes.len();
        self.bytes.resize(start + max, 0);

        let n = read(&mut self.bytes[start..start + max]).min(max);

        // Adjust buffer to actual bytes read
        self.bytes.truncate(start + n);
        n
    }

    /// Append bytes to the tail.
    #[cfg(test)]
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    /// Remove `cnt` bytes from the head.
    ///
    /// # Panics
    /// Panics if `cnt` exceeds the buffered length.
    pub fn consume(&mut self, cnt: usize) {
        assert!(cnt <= self.bytes.len(), "consumed past end of buffer");
        self.bytes.advance(cnt);
    }

    /// The buffered bytes, oldest first.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
