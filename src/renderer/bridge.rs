//! GPU context bridge.
//!
//! Owns the seam between clients, windows, and the native backend:
//!
//! - render context creation/destruction for connected clients
//! - window surface queries from the native renderer, which need a window's
//!   content as a GPU-importable hardware buffer
//! - forced content refreshes under the drawable's render lock
//!
//! Texture destruction is never executed here. A replaced texture is moved
//! into a task on the [`RenderQueue`] and destroyed by the render thread.

use std::os::unix::io::RawFd;
use std::sync::Arc;

use crate::config::RenderOptions;
use crate::window::{lock, Texture, WindowManager};

use super::backend::{ContextHandle, RenderBackend};
use super::render_thread::RenderQueue;

/// Geometry and import handle for a window's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSurface {
    /// Window width in pixels.
    pub width: u16,
    /// Window height in pixels.
    pub height: u16,
    /// Hardware buffer of the content image.
    pub hardware_buffer: Option<crate::window::HardwareBuffer>,
}

impl WindowSurface {
    /// Result for a window that does not exist.
    pub const EMPTY: Self = Self {
        width: 0,
        height: 0,
        hardware_buffer: None,
    };

    /// Raw handle value, `0` when absent.
    #[must_use]
    pub fn hardware_buffer_raw(&self) -> u64 {
        self.hardware_buffer.map_or(0, crate::window::HardwareBuffer::raw)
    }
}

/// Bridges the connector, the window model, and the native backend.
pub struct GpuContextBridge {
    backend: Arc<dyn RenderBackend>,
    windows: Arc<dyn WindowManager>,
    render_queue: RenderQueue,
}

impl std::fmt::Debug for GpuContextBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContextBridge").finish_non_exhaustive()
    }
}

impl GpuContextBridge {
    /// Create a bridge over explicit collaborators.
    pub fn new(
        backend: Arc<dyn RenderBackend>,
        windows: Arc<dyn WindowManager>,
        render_queue: RenderQueue,
    ) -> Self {
        Self {
            backend,
            windows,
            render_queue,
        }
    }

    // ── Render contexts ─────────────────────────────────────────────────────

    /// Create a native render context for the client on `fd`.
    ///
    /// Returns `None` if the backend reports failure.
    pub fn create_context(&self, fd: RawFd, options: &RenderOptions) -> Option<ContextHandle> {
        let raw = self.backend.create_context(fd, options);
        let handle = ContextHandle::from_raw(raw);
        match handle {
            Some(handle) => log::info!("[Renderer] Render context {handle} created for client {fd}"),
            None => log::warn!("[Renderer] Render context creation failed for client {fd} (returned {raw})"),
        }
        handle
    }

    /// Destroy a context created by [`GpuContextBridge::create_context`].
    ///
    /// Takes the handle by value; callers hand over their only copy.
    pub fn destroy_context(&self, handle: ContextHandle) {
        log::info!("[Renderer] Destroying render context {handle}");
        self.backend.destroy_context(handle);
    }

    // ── Window surfaces ─────────────────────────────────────────────────────

    /// Size and hardware buffer of a window's content.
    ///
    /// Swaps a non-importable texture for a freshly allocated GPU image sized
    /// to the window; the old texture is destroyed on the render thread. An
    /// existing GPU image is returned as is. A missing window gives
    /// [`WindowSurface::EMPTY`].
    pub fn resolve_window_surface(&self, window_id: u32) -> WindowSurface {
        let Some(window) = self.windows.window(window_id) else {
            log::debug!("[Renderer] Window {window_id} not found, returning empty surface");
            return WindowSurface::EMPTY;
        };

        let width = window.width();
        let height = window.height();
        let drawable = window.content();

        let _render_guard = lock(drawable.render_lock());
        let mut slot = lock(drawable.texture_slot());

        if let Some(image) = slot.as_ref().and_then(Texture::as_gpu_image) {
            return WindowSurface {
                width,
                height,
                hardware_buffer: Some(image.hardware_buffer()),
            };
        }

        let Some(image) = self.backend.allocate_gpu_image(width, height) else {
            log::warn!("[Renderer] GPU image allocation failed for window {window_id} ({width}x{height})");
            return WindowSurface {
                width,
                height,
                hardware_buffer: None,
            };
        };

        let hardware_buffer = image.hardware_buffer();
        if let Some(old) = slot.replace(Texture::GpuImage(image)) {
            log::debug!("[Renderer] Window {window_id} texture is not a GPU image, replacing");
            self.queue_destroy_texture(window_id, old);
        }

        WindowSurface {
            width,
            height,
            hardware_buffer: Some(hardware_buffer),
        }
    }

    /// Window width, `0` if the window is absent.
    pub fn window_width(&self, window_id: u32) -> u16 {
        self.windows.window(window_id).map_or(0, |w| w.width())
    }

    /// Window height, `0` if the window is absent.
    pub fn window_height(&self, window_id: u32) -> u16 {
        self.windows.window(window_id).map_or(0, |w| w.height())
    }

    /// Raw hardware buffer for the window's content, `0` if the window is
    /// absent or allocation failed.
    pub fn window_hardware_buffer(&self, window_id: u32) -> u64 {
        self.resolve_window_surface(window_id).hardware_buffer_raw()
    }

    /// Force the window's drawable to recompute its content while holding its
    /// render lock. No-op for a missing window.
    pub fn refresh_window_content(&self, window_id: u32) {
        let Some(window) = self.windows.window(window_id) else {
            log::debug!("[Renderer] Window {window_id} not found, nothing to update");
            return;
        };
        let drawable = window.content();
        let _render_guard = lock(drawable.render_lock());
        drawable.force_update();
    }

    // ── Textures ────────────────────────────────────────────────────────────

    /// Destroy a texture immediately. Call only on the render thread.
    pub fn destroy_texture(&self, texture: Texture) {
        self.backend.destroy_texture(texture);
    }

    /// Hand `texture` to the render thread for destruction. Returns `false`
    /// if the render thread is gone and the texture was dropped undestroyed.
    fn queue_destroy_texture(&self, window_id: u32, texture: Texture) -> bool {
        let description = format!("{texture:?}");
        let backend = Arc::clone(&self.backend);
        let queued = self
            .render_queue
            .queue_event(move || backend.destroy_texture(texture));
        if !queued {
            log::warn!("[Renderer] Render thread gone, leaking replaced texture of window {window_id}: {description}");
        }
        queued
    }
}
