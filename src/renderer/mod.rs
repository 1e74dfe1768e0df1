//! Render context service.
//!
//! [`RendererComponent`] wires an [`XConnector`] to the request protocol and
//! the [`GpuContextBridge`]:
//!
//! ```text
//! client ──(1)──► XConnector ──► RenderRequestHandler ──► GpuContextBridge ──► RenderBackend
//!                    │                   │ tag: ClientState
//!                    │ close/kill        ▼
//!                    └──────────► handle_shutdown ──► destroy_context
//! ```
//!
//! Clients get a 1-byte input buffer and no output buffer: the protocol has
//! no replies.

pub mod backend;
pub mod bridge;
pub mod loopback;
pub mod protocol;
pub mod render_thread;

pub use backend::{ContextHandle, RenderBackend};
pub use bridge::{GpuContextBridge, WindowSurface};
pub use loopback::LoopbackBackend;
pub use protocol::{ClientState, RequestCode};
pub use render_thread::{RenderQueue, RenderReceiver, RenderTask, RenderThread};

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::config::{RenderOptions, SocketConfig};
use crate::connector::{Client, ConnectionHandler, RequestHandler, XConnector};
use crate::window::WindowManager;

/// Input buffer per client: one request byte.
const CLIENT_INPUT_CAPACITY: usize = 1;
/// Output buffer per client: none.
const CLIENT_OUTPUT_CAPACITY: usize = 0;

/// Connection handler for render clients.
#[derive(Debug)]
pub struct RenderRequestHandler {
    bridge: Arc<GpuContextBridge>,
    options: RenderOptions,
}

impl ConnectionHandler for RenderRequestHandler {
    type Attachment = ClientState;

    fn handle_new_connection(&self, client: &mut Client<ClientState>) {
        client.create_io_streams();
    }

    fn handle_connection_shutdown(&self, client: &mut Client<ClientState>) {
        protocol::handle_shutdown(&self.bridge, client);
    }
}

impl RequestHandler for RenderRequestHandler {
    fn handle_request(&self, client: &mut Client<ClientState>) -> Result<bool> {
        protocol::handle_request(&self.bridge, &self.options, client)
    }
}

/// Render context service bound to a socket.
#[derive(Debug)]
pub struct RendererComponent {
    handler: Arc<RenderRequestHandler>,
    connector: XConnector<RenderRequestHandler>,
}

impl RendererComponent {
    /// Create a stopped component.
    ///
    /// `render_queue` must feed the thread that owns window textures.
    pub fn new(
        window_manager: Arc<dyn WindowManager>,
        backend: Arc<dyn RenderBackend>,
        render_queue: RenderQueue,
        socket_config: SocketConfig,
        options: RenderOptions,
    ) -> Self {
        let bridge = Arc::new(GpuContextBridge::new(backend, window_manager, render_queue));
        let handler = Arc::new(RenderRequestHandler { bridge, options });

        let mut connector = XConnector::new(socket_config, Arc::clone(&handler));
        connector.set_initial_input_buffer_capacity(CLIENT_INPUT_CAPACITY);
        connector.set_initial_output_buffer_capacity(CLIENT_OUTPUT_CAPACITY);

        Self { handler, connector }
    }

    /// Start accepting clients. A second call while running is a logged no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub fn start(&mut self) -> Result<()> {
        if !self.connector.start()? {
            log::info!("[Renderer] Already started");
            return Ok(());
        }
        log::info!(
            "[Renderer] Serving render contexts (api {}, {} MiB device memory)",
            self.handler.options.max_api_version,
            self.handler.options.max_device_memory
        );
        Ok(())
    }

    /// Stop accepting clients and destroy every live context. Idempotent.
    pub fn stop(&mut self) {
        if !self.connector.is_running() {
            log::debug!("[Renderer] Not running, nothing to stop");
            return;
        }
        self.connector.stop();
        log::info!("[Renderer] Stopped");
    }

    /// Returns `true` while the connector is serving.
    pub fn is_running(&self) -> bool {
        self.connector.is_running()
    }

    /// Bridge for window-surface callbacks from the native renderer.
    pub fn bridge(&self) -> &Arc<GpuContextBridge> {
        &self.handler.bridge
    }

    /// Options passed to every context creation.
    pub fn options(&self) -> &RenderOptions {
        &self.handler.options
    }

    /// Path of the listening socket.
    pub fn socket_path(&self) -> &Path {
        self.connector.socket_path()
    }
}
