//! Append-only response buffer with deferred placeholders.
//!
//! Bytes only ever go on the end. The one exception is a placeholder: a
//! fixed-width run of spaces reserved with [`OutputBuffer::allocate`] whose
//! contents are filled in later with [`OutputBuffer::patch`], once the value
//! is known (typically the Content-Length of a body that was measured by
//! writing it).

use std::io;

use crate::errors::{WriteError, WriteResult};

mod pool;
pub use pool::{BufferPool, PooledBuffer};

const PAD: u8 = b' ';

pub struct OutputBuffer {
    buf: Vec<u8>,
}

/// Reservation of `width` bytes at `offset`.
///
/// Not `Clone`: `patch` consumes it, so a region is filled at most once.
#[derive(Debug)]
#[must_use = "an unpatched placeholder leaves spaces on the wire"]
pub struct Placeholder {
    offset: usize,
    width: usize,
}

impl Placeholder {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

impl OutputBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn from_vec(mut buf: Vec<u8>) -> Self {
        buf.clear();
        Self { buf }
    }

    pub(crate) fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_text(&mut self, text: &str) {
        self.buf.extend_from_slice(text.as_bytes());
    }

    pub fn position(&self) -> usize {
        self.buf.len()
    }

    /// Reserve `width` bytes, pre-filled with spaces.
    pub fn allocate(&mut self, width: usize) -> Placeholder {
        let offset = self.buf.len();
        self.buf.resize(offset + width, PAD);

        Placeholder { offset, width }
    }

    /// Fill a reserved region, left-justified and space padded.
    ///
    /// Text wider than the reservation is rejected and the region is left
    /// untouched.
    pub fn patch(&mut self, placeholder: Placeholder, text: &str) -> WriteResult {
        let Placeholder { offset, width } = placeholder;

        if text.len() > width {
            return Err(WriteError::PlaceholderOverflow {
                width,
                needed: text.len(),
            });
        }

        let region = self
            .buf
            .get_mut(offset..offset + width)
            .ok_or(WriteError::PlaceholderOutOfRange)?;

        region[..text.len()].copy_from_slice(text.as_bytes());
        region[text.len()..].fill(PAD);

        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl io::Write for OutputBuffer {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_allocate_reserves_spaces() {
        let mut out = OutputBuffer::with_capacity(64);
        out.write_text("Content-Length: ");
        let placeholder = out.allocate(10);
        out.write_bytes(b"\r\n");

        assert_eq!(placeholder.offset(), 16);
        assert_eq!(placeholder.width(), 10);
        assert_eq!(out.as_bytes(), b"Content-Length:           \r\n");
    }

    #[test]
    fn test_patch_left_justifies_and_pads() {
        let mut out = OutputBuffer::with_capacity(64);
        out.write_text("[");
        let placeholder = out.allocate(6);
        out.write_text("]tail");

        out.patch(placeholder, "42").unwrap();

        assert_eq!(out.as_bytes(), b"[42    ]tail");
    }

    #[test]
    fn test_patch_full_width() {
        let mut out = OutputBuffer::with_capacity(16);
        let placeholder = out.allocate(4);
        out.patch(placeholder, "1234").unwrap();

        assert_eq!(out.as_bytes(), b"1234");
    }

    #[test]
    fn test_patch_overflow_rejected() {
        let mut out = OutputBuffer::with_capacity(16);
        let placeholder = out.allocate(3);
        out.write_text("x");

        match out.patch(placeholder, "1234") {
            Err(WriteError::PlaceholderOverflow { width, needed }) => {
                assert_eq!(width, 3);
                assert_eq!(needed, 4);
            }
            other => panic!("unexpected patch result {:?}", other),
        }

        // Region untouched
        assert_eq!(out.as_bytes(), b"   x");
    }

    #[test]
    fn test_patch_after_clear_out_of_range() {
        let mut out = OutputBuffer::with_capacity(16);
        let placeholder = out.allocate(8);
        out.clear();

        assert!(matches!(
            out.patch(placeholder, "1"),
            Err(WriteError::PlaceholderOutOfRange)
        ));
    }

    #[test]
    fn test_io_write_appends() {
        let mut out = OutputBuffer::with_capacity(16);
        let start = out.position();
        write!(out, "{}-{}", 7, "x").unwrap();

        assert_eq!(out.position() - start, 3);
        assert_eq!(out.as_bytes(), b"7-x");
    }
}
