//! In-memory window model.
//!
//! Used by the `serve` command (no display server attached) and by tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::{Drawable, Texture, Window, WindowManager};

/// Drawable holding a texture slot and counting content refreshes.
#[derive(Debug)]
pub struct LocalDrawable {
    width: u16,
    height: u16,
    render_lock: Mutex<()>,
    texture: Mutex<Option<Texture>>,
    updates: AtomicU64,
}

impl LocalDrawable {
    /// Drawable with no texture yet.
    #[must_use]
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            width,
            height,
            render_lock: Mutex::new(()),
            texture: Mutex::new(None),
            updates: AtomicU64::new(0),
        }
    }

    /// Drawable already backed by `texture`.
    #[must_use]
    pub fn with_texture(width: u16, height: u16, texture: Texture) -> Self {
        let drawable = Self::new(width, height);
        drawable.set_texture(texture);
        drawable
    }

    /// Number of `force_update` calls so far.
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Acquire)
    }
}

impl Drawable for LocalDrawable {
    fn width(&self) -> u16 {
        self.width
    }

    fn height(&self) -> u16 {
        self.height
    }

    fn render_lock(&self) -> &Mutex<()> {
        &self.render_lock
    }

    fn texture_slot(&self) -> &Mutex<Option<Texture>> {
        &self.texture
    }

    fn force_update(&self) {
        self.updates.fetch_add(1, Ordering::AcqRel);
    }
}

/// Window with fixed geometry and one content drawable.
#[derive(Debug)]
pub struct LocalWindow {
    id: u32,
    width: u16,
    height: u16,
    content: Arc<LocalDrawable>,
}

impl LocalWindow {
    /// Window whose content drawable matches its size.
    #[must_use]
    pub fn new(id: u32, width: u16, height: u16) -> Self {
        Self::with_content(id, width, height, Arc::new(LocalDrawable::new(width, height)))
    }

    /// Window with an explicit content drawable.
    #[must_use]
    pub fn with_content(id: u32, width: u16, height: u16, content: Arc<LocalDrawable>) -> Self {
        Self {
            id,
            width,
            height,
            content,
        }
    }

    /// Concrete content drawable.
    #[must_use]
    pub fn local_content(&self) -> &Arc<LocalDrawable> {
        &self.content
    }
}

impl Window for LocalWindow {
    fn id(&self) -> u32 {
        self.id
    }

    fn width(&self) -> u16 {
        self.width
    }

    fn height(&self) -> u16 {
        self.height
    }

    fn content(&self) -> Arc<dyn Drawable> {
        Arc::clone(&self.content) as Arc<dyn Drawable>
    }
}

/// Window table keyed by id.
#[derive(Debug, Default)]
pub struct LocalWindowManager {
    windows: RwLock<HashMap<u32, Arc<LocalWindow>>>,
}

impl LocalWindowManager {
    /// Empty window table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) a window.
    pub fn add_window(&self, window: LocalWindow) -> Arc<LocalWindow> {
        let window = Arc::new(window);
        self.windows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(window.id(), Arc::clone(&window));
        window
    }

    /// Remove a window, returning it if it existed.
    pub fn remove_window(&self, id: u32) -> Option<Arc<LocalWindow>> {
        self.windows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }
}

impl WindowManager for LocalWindowManager {
    fn window(&self, id: u32) -> Option<Arc<dyn Window>> {
        self.windows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(|w| Arc::clone(w) as Arc<dyn Window>)
    }
}
