//! Per-connection state for a socket client.
//!
//! A [`Client`] owns the accepted socket, its buffered streams, and one
//! attachment value of a type chosen by the connection handler. Only the
//! handler interprets the attachment; the connector just stores it.

use std::io::{self, Read};
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use super::stream::{InputStream, OutputStream};

/// One accepted connection.
///
/// The socket is closed when the `Client` is dropped. The connector removes
/// the client from its table before that happens, so a descriptor number is
/// never shared by two registered clients.
pub struct Client<A> {
    stream: UnixStream,
    input: Option<InputStream>,
    output: Option<OutputStream>,
    initial_input_capacity: usize,
    initial_output_capacity: usize,
    tag: A,
    killed: bool,
}

impl<A: std::fmt::Debug> std::fmt::Debug for Client<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("fd", &self.fd())
            .field("tag", &self.tag)
            .field("killed", &self.killed)
            .finish_non_exhaustive()
    }
}

impl<A: Default> Client<A> {
    /// Wrap an accepted socket. Streams are created later by
    /// [`Client::create_io_streams`], usually from the new-connection
    /// callback.
    pub fn new(stream: UnixStream, initial_input_capacity: usize, initial_output_capacity: usize) -> Self {
        Self {
            stream,
            input: None,
            output: None,
            initial_input_capacity,
            initial_output_capacity,
            tag: A::default(),
            killed: false,
        }
    }

    /// Take the attachment, leaving the default value behind.
    pub fn take_tag(&mut self) -> A {
        mem::take(&mut self.tag)
    }
}

impl<A> Client<A> {
    /// Socket descriptor.
    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    /// Create the input and output streams with the connector's configured
    /// capacities. A zero capacity leaves that stream absent. Existing
    /// streams are kept.
    pub fn create_io_streams(&mut self) {
        if self.input.is_none() && self.initial_input_capacity > 0 {
            self.input = Some(InputStream::new(self.initial_input_capacity));
        }
        if self.output.is_none() && self.initial_output_capacity > 0 {
            self.output = Some(OutputStream::new(self.initial_output_capacity));
        }
    }

    /// Input stream, if created.
    pub fn input_stream(&mut self) -> Option<&mut InputStream> {
        self.input.as_mut()
    }

    /// Output stream, if created.
    pub fn output_stream(&mut self) -> Option<&mut OutputStream> {
        self.output.as_mut()
    }

    /// Returns `true` if an input stream exists.
    pub fn has_input_stream(&self) -> bool {
        self.input.is_some()
    }

    /// Handler-owned attachment.
    pub fn tag(&self) -> &A {
        &self.tag
    }

    /// Replace the attachment, returning the previous value.
    pub fn set_tag(&mut self, tag: A) -> A {
        mem::replace(&mut self.tag, tag)
    }

    /// Ask the connector to shut this connection down as soon as the current
    /// callback returns.
    pub fn kill(&mut self) {
        self.killed = true;
    }

    /// Returns `true` once [`Client::kill`] was called.
    pub fn is_killed(&self) -> bool {
        self.killed
    }

    /// Receive more bytes from the socket into the input stream.
    ///
    /// A full buffer is doubled first. Returns `Ok(0)` on peer close.
    pub(crate) fn fill_input(&mut self) -> io::Result<usize> {
        let Some(input) = self.input.as_mut() else {
            return Ok(0);
        };
        if input.is_full() {
            let grown = input.capacity() * 2;
            log::debug!(
                "[Connector] Input buffer of client {} full, resizing to {grown}",
                self.stream.as_raw_fd()
            );
            input.resize(grown);
        }
        input.fill_from(&mut &self.stream)
    }

    /// Read and drop bytes for a client that has no input stream.
    ///
    /// Returns `Ok(0)` on peer close.
    pub(crate) fn discard_input(&mut self) -> io::Result<usize> {
        let mut scratch = [0u8; 256];
        (&self.stream).read(&mut scratch)
    }

    /// Returns `true` if output is queued but not yet written.
    pub(crate) fn has_pending_output(&self) -> bool {
        self.output.as_ref().is_some_and(|output| output.pending() > 0)
    }

    /// Flush queued output, if any.
    pub(crate) fn flush_output(&mut self) -> io::Result<()> {
        match self.output.as_mut() {
            Some(output) if output.pending() > 0 => output.flush_to(&mut &self.stream),
            _ => Ok(()),
        }
    }

    /// Release both streams. The socket closes when the client is dropped.
    pub(crate) fn destroy(&mut self) {
        self.input = None;
        self.output = None;
    }
}
