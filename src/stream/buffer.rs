//! Incoming byte accumulator for the shell stream.
//!
//! The transport appends at the tail; accepted matches and plain reads
//! consume from the head. Data once appended stays visible to every pending
//! wait until a match or a read consumes it. `BytesMut::split_to` makes the
//! prefix consume an O(1) pointer bump plus the freeze.

use bytes::{Bytes, BytesMut};

/// Buffer for bytes received from the transport.
///
/// All mutation happens under the stream's single critical section, so
/// `as_slice` is a consistent snapshot for the duration of a lock hold.
#[derive(Debug)]
pub(crate) struct IncomingBuffer {
    data: BytesMut,

    /// Total bytes consumed over the stream's lifetime (the read cursor).
    consumed: u64,
}

impl IncomingBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            consumed: 0,
        }
    }

    /// Append bytes received from the transport.
    pub(crate) fn append(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }

    /// Remove and return the prefix `[0, up_to)` once a match has been
    /// accepted. Remaining bytes shift to the head.
    pub(crate) fn consume(&mut self, up_to: usize) -> Bytes {
        let prefix = self.data.split_to(up_to).freeze();
        self.consumed += prefix.len() as u64;
        prefix
    }

    /// Drain the entire buffer (a plain read).
    pub(crate) fn drain(&mut self) -> Bytes {
        let len = self.data.len();
        self.consume(len)
    }

    /// Copy up to `out.len()` bytes into `out`, consuming what was copied.
    pub(crate) fn copy_into(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.data.len());
        out[..n].copy_from_slice(&self.data[..n]);
        self.consume(n);
        n
    }

    /// Current contents, for matching.
    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Total bytes consumed so far.
    pub(crate) fn total_consumed(&self) -> u64 {
        self.consumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_consume_prefix() {
        let mut buffer = IncomingBuffer::new(64);
        buffer.append(b"hello world");

        let prefix = buffer.consume(6);
        assert_eq!(&prefix[..], b"hello ");
        assert_eq!(buffer.as_slice(), b"world");
        assert_eq!(buffer.total_consumed(), 6);
    }

    #[test]
    fn data_spans_multiple_appends() {
        let mut buffer = IncomingBuffer::new(64);
        buffer.append(b"fo");
        buffer.append(b"o");
        assert_eq!(buffer.as_slice(), b"foo");
    }

    #[test]
    fn drain_empties_and_advances_cursor() {
        let mut buffer = IncomingBuffer::new(64);
        buffer.append(b"abc");
        assert_eq!(&buffer.drain()[..], b"abc");
        assert!(buffer.is_empty());
        assert_eq!(buffer.total_consumed(), 3);
    }

    #[test]
    fn copy_into_partial() {
        let mut buffer = IncomingBuffer::new(64);
        buffer.append(b"abcdef");

        let mut out = [0u8; 4];
        assert_eq!(buffer.copy_into(&mut out), 4);
        assert_eq!(&out, b"abcd");
        assert_eq!(buffer.as_slice(), b"ef");

        let mut large = [0u8; 16];
        assert_eq!(buffer.copy_into(&mut large), 2);
        assert_eq!(&large[..2], b"ef");
        assert!(buffer.is_empty());
    }
}
