//! Request dispatch for render clients.
//!
//! Every request is a single code byte. Only [`RequestCode::CreateContext`]
//! is defined; other bytes are consumed and ignored so a newer client does
//! not lose its connection to an older server.

use std::os::unix::io::RawFd;

use anyhow::Result;

use crate::config::RenderOptions;
use crate::connector::Client;

use super::backend::ContextHandle;
use super::bridge::GpuContextBridge;

/// Request codes understood by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestCode {
    /// Create a render context bound to the requesting connection.
    CreateContext = 1,
}

impl RequestCode {
    /// Decode a request byte.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::CreateContext),
            _ => None,
        }
    }
}

/// Render state attached to each connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No context yet.
    #[default]
    Idle,
    /// Owns a live render context.
    Context(ContextHandle),
}

impl ClientState {
    /// The owned context handle, if any.
    #[must_use]
    pub fn context(self) -> Option<ContextHandle> {
        match self {
            Self::Context(handle) => Some(handle),
            Self::Idle => None,
        }
    }
}

/// Consume one request from `client`'s input.
///
/// Returns `Ok(false)` when no complete request is buffered.
pub(crate) fn handle_request(
    bridge: &GpuContextBridge,
    options: &RenderOptions,
    client: &mut Client<ClientState>,
) -> Result<bool> {
    let fd = client.fd();
    let Some(input) = client.input_stream() else {
        return Ok(false);
    };
    if input.available() < 1 {
        return Ok(false);
    }
    let byte = input.read_u8()?;

    match RequestCode::from_byte(byte) {
        Some(RequestCode::CreateContext) => create_context(bridge, options, client, fd),
        None => log::debug!("[Renderer] Client {fd} sent unknown request code {byte}, ignoring"),
    }
    Ok(true)
}

fn create_context(
    bridge: &GpuContextBridge,
    options: &RenderOptions,
    client: &mut Client<ClientState>,
    fd: RawFd,
) {
    if let ClientState::Context(existing) = *client.tag() {
        log::warn!("[Renderer] Client {fd} already owns context {existing}, ignoring create request");
        return;
    }

    match bridge.create_context(fd, options) {
        Some(handle) => {
            client.set_tag(ClientState::Context(handle));
        }
        None => {
            log::warn!("[Renderer] Closing client {fd} after failed context creation");
            client.kill();
        }
    }
}

/// Release the context owned by a departing client, if any.
pub(crate) fn handle_shutdown(bridge: &GpuContextBridge, client: &mut Client<ClientState>) {
    if let ClientState::Context(handle) = client.take_tag() {
        bridge.destroy_context(handle);
    }
}
