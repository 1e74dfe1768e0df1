//! Native rendering backend interface.
//!
//! The GPU work itself happens in a native library. The bridge reaches it only
//! through [`RenderBackend`], so protocol and connector logic can run against
//! a fake in tests.

use std::fmt;
use std::num::NonZeroI64;
use std::os::unix::io::RawFd;

use crate::config::RenderOptions;
use crate::window::{GpuImage, Texture};

/// Opaque handle to a live native render context. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(NonZeroI64);

impl ContextHandle {
    /// Interpret a raw backend return value. Zero and negative values are
    /// failure sentinels and yield `None`.
    #[must_use]
    pub fn from_raw(raw: i64) -> Option<Self> {
        if raw > 0 {
            NonZeroI64::new(raw).map(Self)
        } else {
            None
        }
    }

    /// Raw value passed back to the backend.
    #[must_use]
    pub fn raw(self) -> i64 {
        self.0.get()
    }
}

impl fmt::Display for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0.get())
    }
}

/// Native render backend.
///
/// The backend serializes its own use of a context against in-flight render
/// submissions. The bridge guarantees one `destroy_context` per created
/// handle and no calls with a handle after it was destroyed.
pub trait RenderBackend: Send + Sync {
    /// Create a render context serving the client connected on `fd`.
    ///
    /// Returns a positive handle, or a non-positive value on failure.
    fn create_context(&self, fd: RawFd, options: &RenderOptions) -> i64;

    /// Release every native resource held by `handle`.
    fn destroy_context(&self, handle: ContextHandle);

    /// Allocate a hardware-buffer backed image. `None` on allocation failure.
    fn allocate_gpu_image(&self, width: u16, height: u16) -> Option<GpuImage>;

    /// Destroy a texture. Only ever called on the render thread.
    fn destroy_texture(&self, texture: Texture);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_positive_values_are_handles() {
        assert!(ContextHandle::from_raw(0).is_none());
        assert!(ContextHandle::from_raw(-1).is_none());
        assert!(ContextHandle::from_raw(i64::MIN).is_none());
        assert_eq!(ContextHandle::from_raw(0x7f00).map(ContextHandle::raw), Some(0x7f00));
    }

    #[test]
    fn test_display_is_hex() {
        assert_eq!(ContextHandle::from_raw(255).unwrap().to_string(), "0xff");
    }
}
