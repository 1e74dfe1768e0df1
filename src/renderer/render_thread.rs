//! Work queue onto the render thread.
//!
//! Texture objects belong to the render thread. Anything that must touch them
//! from another thread (the connector's event loop, native callbacks) is sent
//! here as a task instead of being called directly.
//!
//! Queue clones keep the channel open, so shutdown uses an explicit
//! [`RenderMessage::Shutdown`] sentinel rather than waiting for every sender
//! to be dropped.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};

/// A unit of render-thread work.
pub type RenderTask = Box<dyn FnOnce() + Send + 'static>;

enum RenderMessage {
    Run(RenderTask),
    Shutdown,
}

/// Sending side: cheap to clone, usable from any thread.
#[derive(Clone)]
pub struct RenderQueue {
    tx: Sender<RenderMessage>,
}

impl std::fmt::Debug for RenderQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderQueue").finish_non_exhaustive()
    }
}

impl RenderQueue {
    /// Create a queue and the receiving side, for render loops that drain
    /// tasks themselves (e.g. once per frame).
    #[must_use]
    pub fn channel() -> (Self, RenderReceiver) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, RenderReceiver { rx })
    }

    /// Queue `task` for the render thread.
    ///
    /// Returns `false` (and drops the task) if the render side has gone away.
    pub fn queue_event(&self, task: impl FnOnce() + Send + 'static) -> bool {
        if self.tx.send(RenderMessage::Run(Box::new(task))).is_err() {
            log::warn!("[RenderThread] Render thread gone, dropping queued task");
            return false;
        }
        true
    }

    fn request_shutdown(&self) {
        let _ = self.tx.send(RenderMessage::Shutdown);
    }
}

/// Receiving side, owned by the render thread.
pub struct RenderReceiver {
    rx: Receiver<RenderMessage>,
}

impl std::fmt::Debug for RenderReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderReceiver").finish_non_exhaustive()
    }
}

impl RenderReceiver {
    /// Run every task queued so far without blocking. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            match self.rx.try_recv() {
                Ok(RenderMessage::Run(task)) => {
                    task();
                    ran += 1;
                }
                Ok(RenderMessage::Shutdown) | Err(TryRecvError::Empty | TryRecvError::Disconnected) => {
                    return ran;
                }
            }
        }
    }

    /// Block running tasks in order until shutdown is requested or every
    /// queue is dropped.
    fn run_until_shutdown(&self) {
        for message in &self.rx {
            match message {
                RenderMessage::Run(task) => task(),
                RenderMessage::Shutdown => break,
            }
        }
    }
}

/// Dedicated render thread executing queued tasks.
pub struct RenderThread {
    queue: RenderQueue,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for RenderThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderThread")
            .field("running", &self.handle.is_some())
            .finish()
    }
}

impl RenderThread {
    /// Spawn the thread.
    pub fn spawn(name: &str) -> Result<Self> {
        let (queue, receiver) = RenderQueue::channel();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                receiver.run_until_shutdown();
                log::debug!("[RenderThread] Exiting");
            })
            .context("Failed to spawn render thread")?;
        Ok(Self {
            queue,
            handle: Some(handle),
        })
    }

    /// A queue feeding this thread.
    #[must_use]
    pub fn queue(&self) -> RenderQueue {
        self.queue.clone()
    }

    /// Finish queued tasks and join the thread.
    pub fn shutdown(mut self) {
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.queue.request_shutdown();
            if handle.join().is_err() {
                log::error!("[RenderThread] Render thread panicked");
            }
        }
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        self.join();
    }
}
