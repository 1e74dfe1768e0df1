//! Vortek bridge - render context broker for an in-process display server.
//!
//! Clients connect over a local Unix socket and ask for a native GPU render
//! context. Windows owned by the display server are exposed to the native
//! renderer as GPU-importable hardware buffers.
//!
//! # Architecture
//!
//! ```text
//!  client process                 this crate                       render thread
//! ┌─────────────┐  request byte  ┌──────────────────────┐  tasks  ┌──────────────┐
//! │ UnixStream  │───────────────►│ XConnector (epoll)   │────────►│ RenderThread │
//! └─────────────┘                │   RendererComponent  │         └──────────────┘
//!                                │     GpuContextBridge │
//!                                └──────────┬───────────┘
//!                                           │ RenderBackend / WindowManager
//!                                           ▼
//!                                 native backend, window model
//! ```
//!
//! # Modules
//!
//! - [`connector`] - epoll-driven Unix socket multiplexer and per-client state
//! - [`renderer`] - request protocol, context bridge, render-thread queue
//! - [`window`] - window/drawable traits and an in-memory window model
//! - [`config`] - render options, socket and server configuration

pub mod config;
pub mod connector;
pub mod renderer;
pub mod window;

pub use config::{ApiVersion, ExposedExtensions, RenderOptions, ServerConfig, SocketConfig};
pub use connector::{Client, ConnectionHandler, RequestHandler, XConnector};
pub use renderer::{
    ClientState, ContextHandle, GpuContextBridge, RenderBackend, RenderQueue, RenderThread,
    RendererComponent, WindowSurface,
};
pub use window::{Drawable, GpuImage, HardwareBuffer, PlainTexture, Texture, Window, WindowManager};
