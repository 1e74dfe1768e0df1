//! In-process backend with no GPU behind it.
//!
//! Hands out sequential context handles and fake hardware buffers so the
//! `serve` command and tests can run the full request path without the
//! native renderer.

use std::collections::HashSet;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::config::RenderOptions;
use crate::window::{lock, GpuImage, HardwareBuffer, Texture};

use super::backend::{ContextHandle, RenderBackend};

/// Device extensions the loopback device claims to support.
const SUPPORTED_EXTENSIONS: &[&str] = &[
    "VK_KHR_swapchain",
    "VK_KHR_maintenance1",
    "VK_KHR_external_memory_fd",
    "VK_ANDROID_external_memory_android_hardware_buffer",
];

/// Supported extensions left after applying the context's allow-list.
#[must_use]
pub fn exposed_extensions(options: &RenderOptions) -> Vec<&'static str> {
    SUPPORTED_EXTENSIONS
        .iter()
        .copied()
        .filter(|name| options.exposed_device_extensions.allows(name))
        .collect()
}

/// Bookkeeping-only [`RenderBackend`].
#[derive(Debug)]
pub struct LoopbackBackend {
    next_context: AtomicI64,
    next_buffer: AtomicU64,
    live: Mutex<HashSet<i64>>,
    context_limit: Option<usize>,
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackBackend {
    /// Backend with no context limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_context: AtomicI64::new(1),
            next_buffer: AtomicU64::new(1),
            live: Mutex::new(HashSet::new()),
            context_limit: None,
        }
    }

    /// Fail context creation once `limit` contexts are live.
    #[must_use]
    pub fn with_context_limit(mut self, limit: usize) -> Self {
        self.context_limit = Some(limit);
        self
    }

    /// Number of contexts created and not yet destroyed.
    pub fn live_contexts(&self) -> usize {
        lock(&self.live).len()
    }
}

impl RenderBackend for LoopbackBackend {
    fn create_context(&self, fd: RawFd, options: &RenderOptions) -> i64 {
        let mut live = lock(&self.live);
        if self.context_limit.is_some_and(|limit| live.len() >= limit) {
            log::warn!("[Loopback] Context limit reached, refusing client {fd}");
            return -1;
        }
        let handle = self.next_context.fetch_add(1, Ordering::Relaxed);
        live.insert(handle);
        log::debug!(
            "[Loopback] Context {handle} for client {fd} (api {}, {} MiB, extensions {:?})",
            options.max_api_version,
            options.max_device_memory,
            exposed_extensions(options)
        );
        handle
    }

    fn destroy_context(&self, handle: ContextHandle) {
        if !lock(&self.live).remove(&handle.raw()) {
            log::warn!("[Loopback] Destroy for unknown context {handle}");
        }
    }

    fn allocate_gpu_image(&self, width: u16, height: u16) -> Option<GpuImage> {
        let raw = self.next_buffer.fetch_add(1, Ordering::Relaxed);
        HardwareBuffer::from_raw(raw).map(|buffer| GpuImage::new(width, height, buffer))
    }

    fn destroy_texture(&self, texture: Texture) {
        log::debug!("[Loopback] Destroyed texture {texture:?}");
    }
}
