//! Window and drawable interfaces consumed from the display server.
//!
//! The display server owns windows and their content drawables; this crate
//! only looks them up by id, reads their geometry, swaps the drawable's
//! texture for a GPU-importable one, and forces content refreshes. The
//! [`local`] module provides an in-memory implementation.

pub mod local;

use std::num::NonZeroU64;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use local::{LocalDrawable, LocalWindow, LocalWindowManager};

/// Platform hardware-buffer handle (an `AHardwareBuffer*` on Android) that
/// the native renderer can import across APIs and processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HardwareBuffer(NonZeroU64);

impl HardwareBuffer {
    /// Wrap a raw handle. Returns `None` for a null handle.
    #[must_use]
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// The raw handle value.
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0.get()
    }
}

/// Ordinary GL texture backing a drawable.
#[derive(Debug, PartialEq, Eq)]
pub struct PlainTexture {
    /// GL texture name.
    pub id: u32,
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
}

/// GPU-importable image backed by a hardware buffer.
#[derive(Debug, PartialEq, Eq)]
pub struct GpuImage {
    width: u16,
    height: u16,
    hardware_buffer: HardwareBuffer,
}

impl GpuImage {
    /// Describe an image the backend has allocated.
    #[must_use]
    pub fn new(width: u16, height: u16, hardware_buffer: HardwareBuffer) -> Self {
        Self {
            width,
            height,
            hardware_buffer,
        }
    }

    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> u16 {
        self.width
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> u16 {
        self.height
    }

    /// Handle for cross-API import.
    #[must_use]
    pub fn hardware_buffer(&self) -> HardwareBuffer {
        self.hardware_buffer
    }
}

/// Texture currently backing a drawable.
///
/// Not `Clone`: a texture is a render-thread GPU object with exactly one owner.
#[derive(Debug, PartialEq, Eq)]
pub enum Texture {
    /// Plain GL texture, not importable by the native renderer.
    Plain(PlainTexture),
    /// Hardware-buffer backed image.
    GpuImage(GpuImage),
}

impl Texture {
    /// The image, if this texture is GPU-importable.
    #[must_use]
    pub fn as_gpu_image(&self) -> Option<&GpuImage> {
        match self {
            Self::GpuImage(image) => Some(image),
            Self::Plain(_) => None,
        }
    }
}

/// Content surface of a window.
pub trait Drawable: Send + Sync {
    /// Width in pixels.
    fn width(&self) -> u16;

    /// Height in pixels.
    fn height(&self) -> u16;

    /// Lock held while the content is being updated or read; shared with the
    /// render thread.
    fn render_lock(&self) -> &Mutex<()>;

    /// The texture slot. Lock order: `render_lock` first, then this.
    fn texture_slot(&self) -> &Mutex<Option<Texture>>;

    /// Recompute and flush the drawable's content. Callers hold `render_lock`.
    fn force_update(&self);

    /// Replace the texture, returning the previous one.
    fn set_texture(&self, texture: Texture) -> Option<Texture> {
        lock(self.texture_slot()).replace(texture)
    }

    /// Hardware buffer of the current texture, if it is a [`GpuImage`].
    fn hardware_buffer(&self) -> Option<HardwareBuffer> {
        lock(self.texture_slot())
            .as_ref()
            .and_then(Texture::as_gpu_image)
            .map(GpuImage::hardware_buffer)
    }
}

/// A display-server window.
pub trait Window: Send + Sync {
    /// Window id.
    fn id(&self) -> u32;

    /// Current width in pixels.
    fn width(&self) -> u16;

    /// Current height in pixels.
    fn height(&self) -> u16;

    /// Content drawable.
    fn content(&self) -> Arc<dyn Drawable>;
}

/// Window lookup.
pub trait WindowManager: Send + Sync {
    /// Find a window by id. Absence is normal (clients race window teardown).
    fn window(&self, id: u32) -> Option<Arc<dyn Window>>;
}

/// Lock a mutex, recovering the data if a panicking holder poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
