//! Buffered byte streams for a connected client.
//!
//! [`InputStream`] is filled from the socket by the event loop and consumed
//! by the request handler. Its capacity is fixed at creation; it only grows
//! through an explicit [`InputStream::resize`]. [`OutputStream`] accumulates
//! replies until the event loop flushes them.

use std::io::{self, Read, Write};

/// Fixed-capacity receive buffer.
///
/// Layout: `buf[position..limit]` holds unread bytes, `buf[limit..]` is free.
#[derive(Debug)]
pub struct InputStream {
    buf: Vec<u8>,
    position: usize,
    limit: usize,
}

impl InputStream {
    /// Create a buffer of `capacity` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "InputStream capacity must be > 0");
        Self {
            buf: vec![0; capacity],
            position: 0,
            limit: 0,
        }
    }

    /// Total buffer size.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of unread bytes.
    pub fn available(&self) -> usize {
        self.limit - self.position
    }

    /// Returns `true` when no further bytes can be received without
    /// consuming or resizing.
    pub fn is_full(&self) -> bool {
        self.available() == self.capacity()
    }

    /// Consume one byte.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedEof` if nothing is buffered.
    pub fn read_u8(&mut self) -> io::Result<u8> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte)?;
        Ok(byte[0])
    }

    /// Consume exactly `out.len()` bytes.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedEof` (consuming nothing) if fewer bytes are buffered.
    pub fn read_exact(&mut self, out: &mut [u8]) -> io::Result<()> {
        if self.available() < out.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("need {} bytes, {} buffered", out.len(), self.available()),
            ));
        }
        let end = self.position + out.len();
        out.copy_from_slice(&self.buf[self.position..end]);
        self.position = end;
        Ok(())
    }

    /// Grow (or shrink) the buffer, keeping unread bytes.
    ///
    /// # Panics
    ///
    /// Panics if `new_capacity` cannot hold the unread bytes.
    pub fn resize(&mut self, new_capacity: usize) {
        assert!(
            new_capacity >= self.available() && new_capacity > 0,
            "resize to {new_capacity} would drop {} unread bytes",
            self.available()
        );
        self.compact();
        self.buf.resize(new_capacity, 0);
    }

    /// Move unread bytes to the front of the buffer.
    fn compact(&mut self) {
        if self.position == 0 {
            return;
        }
        self.buf.copy_within(self.position..self.limit, 0);
        self.limit -= self.position;
        self.position = 0;
    }

    /// Read once from `reader` into the free space.
    ///
    /// Returns the number of bytes received; `0` means the peer closed.
    ///
    /// # Errors
    ///
    /// Propagates reader errors (including `WouldBlock`). Fails with
    /// `OutOfMemory` if the buffer is full of unread bytes.
    pub fn fill_from(&mut self, reader: &mut impl Read) -> io::Result<usize> {
        self.compact();
        if self.limit == self.buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::OutOfMemory,
                "input buffer full of unread bytes",
            ));
        }
        let n = reader.read(&mut self.buf[self.limit..])?;
        self.limit += n;
        Ok(n)
    }
}

/// Send buffer flushed to the socket by the event loop.
#[derive(Debug)]
pub struct OutputStream {
    buf: Vec<u8>,
}

impl OutputStream {
    /// Create a buffer with `capacity` bytes reserved.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Number of bytes waiting to be flushed.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Queue one byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Queue raw bytes.
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Write as much as `writer` accepts. Bytes not accepted stay queued
    /// when the writer would block.
    ///
    /// # Errors
    ///
    /// Propagates writer errors other than `WouldBlock`.
    pub fn flush_to(&mut self, writer: &mut impl Write) -> io::Result<()> {
        let mut written = 0;
        while written < self.buf.len() {
            match writer.write(&self.buf[written..]) {
                Ok(0) => {
                    self.buf.drain(..written);
                    return Err(io::ErrorKind::WriteZero.into());
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.buf.drain(..written);
                    return Err(e);
                }
            }
        }
        self.buf.drain(..written);
        Ok(())
    }
}
