//! Byte sinks the writer emits into.
//!
//! A sink is a small capability: accept bytes, flush. Three implementations
//! cover the write surface: a caller-provided fixed buffer, a growable
//! in-memory buffer, and a buffered adapter over any `io::Write`.

use std::io;

use crate::error::WriteError;

/// Byte-accepting output capability.
pub trait ByteSink {
    fn write_byte(&mut self, b: u8) -> Result<(), WriteError>;
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), WriteError>;

    /// Push any buffered bytes downstream. In-memory sinks have nothing to
    /// do here.
    fn flush(&mut self) -> Result<(), WriteError> {
        Ok(())
    }
}

/// Writes into a caller-provided slice; overflow fails with
/// [`WriteError::Overflow`].
pub struct FixedSink<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> FixedSink<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0 }
    }

    /// Bytes written so far.
    #[must_use]
    pub fn written(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl ByteSink for FixedSink<'_> {
    fn write_byte(&mut self, b: u8) -> Result<(), WriteError> {
        if self.len >= self.buf.len() {
            return Err(WriteError::Overflow);
        }
        self.buf[self.len] = b;
        self.len += 1;
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), WriteError> {
        let end = self.len.checked_add(bytes.len()).ok_or(WriteError::Overflow)?;
        if end > self.buf.len() {
            return Err(WriteError::Overflow);
        }
        self.buf[self.len..end].copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }
}

/// Growable in-memory sink; doubles capacity as needed.
pub struct GrowableSink {
    buf: Vec<u8>,
}

impl GrowableSink {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

impl ByteSink for GrowableSink {
    fn write_byte(&mut self, b: u8) -> Result<(), WriteError> {
        self.buf.push(b);
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), WriteError> {
        self.buf.extend_from_slice(bytes);
        Ok(())
    }
}

const STREAM_BUFFER: usize = 4096;

/// Buffered sink over an `io::Write`; the internal buffer drains whenever it
/// fills, and [`flush`](ByteSink::flush) drains it and flushes the
/// underlying writer.
pub struct StreamSink<W: io::Write> {
    out: W,
    buf: Vec<u8>,
    capacity: usize,
}

impl<W: io::Write> StreamSink<W> {
    pub fn new(out: W) -> Self {
        Self::with_capacity(out, STREAM_BUFFER)
    }

    pub fn with_capacity(out: W, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            out,
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn drain(&mut self) -> Result<(), WriteError> {
        if !self.buf.is_empty() {
            self.out.write_all(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }
}

impl<W: io::Write> ByteSink for StreamSink<W> {
    fn write_byte(&mut self, b: u8) -> Result<(), WriteError> {
        if self.buf.len() >= self.capacity {
            self.drain()?;
        }
        self.buf.push(b);
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), WriteError> {
        if self.buf.len() + bytes.len() > self.capacity {
            self.drain()?;
        }
        if bytes.len() >= self.capacity {
            self.out.write_all(bytes)?;
        } else {
            self.buf.extend_from_slice(bytes);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), WriteError> {
        self.drain()?;
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_sink_overflows() {
        let mut buf = [0u8; 4];
        let mut sink = FixedSink::new(&mut buf);
        sink.write_bytes(b"abc").unwrap();
        sink.write_byte(b'd').unwrap();
        assert!(matches!(sink.write_byte(b'e'), Err(WriteError::Overflow)));
        assert_eq!(sink.written(), b"abcd");
    }

    #[test]
    fn stream_sink_drains_on_pressure() {
        let mut out = Vec::new();
        {
            let mut sink = StreamSink::with_capacity(&mut out, 4);
            sink.write_bytes(b"abcdef").unwrap();
            sink.write_bytes(b"gh").unwrap();
            sink.flush().unwrap();
        }
        assert_eq!(out, b"abcdefgh");
    }
}
