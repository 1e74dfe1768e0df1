//! Event-multiplexed Unix socket server.
//!
//! [`XConnector`] binds a local socket and services every accepted client on
//! one `epoll`-driven thread instead of one thread per connection.
//!
//! # Event loop
//!
//! ```text
//! epoll_wait ──► listener readable ──► accept all ──► handle_new_connection
//!            ──► client readable   ──► fill input ──► handle_request (repeat while true)
//!            ──► client writable   ──► flush queued output (EPOLLOUT armed only while pending)
//!            ──► peer closed / error / killed      ──► handle_connection_shutdown, drop
//!            ──► waker              ──► stop requested ──► shut down every client
//! ```
//!
//! All handler callbacks run on the event-loop thread. Handlers are shared
//! as `Arc<H>` so other threads may call into them concurrently; they must
//! not block on unrelated I/O.

pub mod client;
pub(crate) mod epoll;
pub mod stream;

pub use client::Client;
pub use stream::{InputStream, OutputStream};

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{bail, Context, Result};

use crate::config::SocketConfig;
use epoll::{Epoll, Waker, EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLRDHUP};

/// Events fetched per `epoll_wait` call.
const MAX_EVENTS: usize = 64;

/// Connection lifecycle callbacks.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Per-connection state stored in [`Client`]; only the handler reads it.
    type Attachment: Default + Send + 'static;

    /// A client was accepted and registered. Typically creates its streams.
    fn handle_new_connection(&self, client: &mut Client<Self::Attachment>);

    /// The client is going away (peer close, I/O error, kill, or connector
    /// stop). Called exactly once per client, before its buffers and socket
    /// are released.
    fn handle_connection_shutdown(&self, client: &mut Client<Self::Attachment>);
}

/// Request servicing callback.
pub trait RequestHandler: ConnectionHandler {
    /// Consume buffered input.
    ///
    /// Returns `Ok(false)` when there is nothing to process until the socket
    /// becomes readable again, `Ok(true)` after consuming a request. Errors
    /// are fatal to this connection only.
    fn handle_request(&self, client: &mut Client<Self::Attachment>) -> Result<bool>;
}

// ─── Connector ─────────────────────────────────────────────────────────────

/// Handle to a running event loop.
struct Running {
    waker: Arc<Waker>,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Unix socket server driven by a single `epoll` loop.
pub struct XConnector<H: RequestHandler> {
    socket_config: SocketConfig,
    handler: Arc<H>,
    initial_input_buffer_capacity: usize,
    initial_output_buffer_capacity: usize,
    running: Option<Running>,
}

impl<H: RequestHandler> std::fmt::Debug for XConnector<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XConnector")
            .field("socket_path", &self.socket_config.path())
            .field("running", &self.running.is_some())
            .finish_non_exhaustive()
    }
}

impl<H: RequestHandler> XConnector<H> {
    /// Create a stopped connector.
    pub fn new(socket_config: SocketConfig, handler: Arc<H>) -> Self {
        Self {
            socket_config,
            handler,
            initial_input_buffer_capacity: 4096,
            initial_output_buffer_capacity: 4096,
            running: None,
        }
    }

    /// Input buffer size for clients accepted after this call. Must be
    /// non-zero by the time `start` is called.
    pub fn set_initial_input_buffer_capacity(&mut self, capacity: usize) {
        self.initial_input_buffer_capacity = capacity;
    }

    /// Output buffer size for clients accepted after this call. `0` means
    /// clients get no output stream.
    pub fn set_initial_output_buffer_capacity(&mut self, capacity: usize) {
        self.initial_output_buffer_capacity = capacity;
    }

    /// Path of the listening socket.
    pub fn socket_path(&self) -> &Path {
        self.socket_config.path()
    }

    /// Returns `true` between a successful `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bind the socket and spawn the event loop.
    ///
    /// Removes a stale socket file, creates the parent directory, and restricts
    /// the socket to its owner (0600). Returns `Ok(false)` without touching
    /// anything if already running. If setup fails after the socket was bound,
    /// the socket file is removed again.
    ///
    /// # Errors
    ///
    /// Returns an error if the input buffer capacity is zero, or if the socket
    /// cannot be bound or the event loop cannot be set up.
    pub fn start(&mut self) -> Result<bool> {
        let socket_path = self.socket_config.path();
        if self.running.is_some() {
            log::info!(
                "[Connector] Already listening on {}, skipping start",
                socket_path.display()
            );
            return Ok(false);
        }

        // Without an input stream a client's socket is never read, so a
        // peer close would go unnoticed.
        if self.initial_input_buffer_capacity == 0 {
            bail!("Initial input buffer capacity must be greater than zero");
        }

        if let Some(parent) = socket_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create socket dir: {}", parent.display()))?;
        }

        if socket_path.exists() {
            fs::remove_file(socket_path)
                .with_context(|| format!("Failed to remove stale socket: {}", socket_path.display()))?;
        }

        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("Failed to bind socket: {}", socket_path.display()))?;
        let socket_file = SocketFileGuard::new(socket_path);

        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(socket_path, fs::Permissions::from_mode(0o600))
                .with_context(|| format!("Failed to set socket permissions: {}", socket_path.display()))?;
        }

        listener
            .set_nonblocking(true)
            .context("Failed to make listener non-blocking")?;

        let epoll = Epoll::new().context("Failed to create epoll instance")?;
        let waker = Arc::new(Waker::new().context("Failed to create eventfd waker")?);
        epoll
            .add(listener.as_raw_fd(), EPOLLIN)
            .context("Failed to register listener with epoll")?;
        epoll
            .add(waker.as_raw_fd(), EPOLLIN)
            .context("Failed to register waker with epoll")?;

        let stop = Arc::new(AtomicBool::new(false));
        let event_loop = EventLoop {
            listener,
            epoll,
            waker: Arc::clone(&waker),
            stop: Arc::clone(&stop),
            handler: Arc::clone(&self.handler),
            clients: HashMap::new(),
            write_armed: HashSet::new(),
            accept_paused: false,
            input_capacity: self.initial_input_buffer_capacity,
            output_capacity: self.initial_output_buffer_capacity,
        };

        let thread = thread::Builder::new()
            .name("vortek-connector".to_string())
            .spawn(move || event_loop.run())
            .context("Failed to spawn connector thread")?;

        socket_file.disarm();
        log::info!("[Connector] Listening on {}", socket_path.display());
        self.running = Some(Running { waker, stop, thread });
        Ok(true)
    }

    /// Stop the event loop, shut down every client, and remove the socket
    /// file. Safe to call repeatedly or before `start`.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            log::debug!("[Connector] Not running, nothing to stop");
            return;
        };

        running.stop.store(true, Ordering::Release);
        if let Err(e) = running.waker.wake() {
            log::error!("[Connector] Failed to wake event loop: {e}");
        }
        if running.thread.join().is_err() {
            log::error!("[Connector] Event loop thread panicked");
        }

        let socket_path = self.socket_config.path();
        if let Err(e) = fs::remove_file(socket_path) {
            if e.kind() != io::ErrorKind::NotFound {
                log::warn!("[Connector] Failed to remove {}: {e}", socket_path.display());
            }
        }
        log::info!("[Connector] Stopped");
    }
}

impl<H: RequestHandler> Drop for XConnector<H> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Removes a freshly bound socket file unless disarmed.
struct SocketFileGuard<'a> {
    path: Option<&'a Path>,
}

impl<'a> SocketFileGuard<'a> {
    fn new(path: &'a Path) -> Self {
        Self { path: Some(path) }
    }

    /// Keep the file: setup succeeded.
    fn disarm(mut self) {
        self.path = None;
    }
}

impl Drop for SocketFileGuard<'_> {
    fn drop(&mut self) {
        if let Some(path) = self.path {
            if let Err(e) = fs::remove_file(path) {
                log::warn!("[Connector] Failed to remove {} after failed start: {e}", path.display());
            }
        }
    }
}

// ─── Event loop ────────────────────────────────────────────────────────────

/// `epoll_wait` timeout while accepting is paused for lack of descriptors.
const ACCEPT_RETRY_MS: i32 = 100;

/// State owned by the event-loop thread.
struct EventLoop<H: RequestHandler> {
    listener: UnixListener,
    epoll: Epoll,
    waker: Arc<Waker>,
    stop: Arc<AtomicBool>,
    handler: Arc<H>,
    clients: HashMap<RawFd, Client<H::Attachment>>,
    /// Clients currently registered for `EPOLLOUT`.
    write_armed: HashSet<RawFd>,
    /// Listener removed from epoll after descriptor exhaustion.
    accept_paused: bool,
    input_capacity: usize,
    output_capacity: usize,
}

impl<H: RequestHandler> EventLoop<H> {
    fn run(mut self) {
        let listener_fd = self.listener.as_raw_fd();
        let waker_fd = self.waker.as_raw_fd();
        let mut events = [libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS];

        while !self.stop.load(Ordering::Acquire) {
            let timeout = if self.accept_paused { ACCEPT_RETRY_MS } else { -1 };
            let n = match self.epoll.wait(&mut events, timeout) {
                Ok(n) => n,
                Err(e) => {
                    log::error!("[Connector] epoll_wait failed, stopping event loop: {e}");
                    break;
                }
            };

            if n == 0 && self.accept_paused {
                self.resume_accepting();
            }

            for event in events.iter().take(n).copied() {
                let fd = event.u64 as RawFd;
                let flags = event.events;

                if fd == waker_fd {
                    self.waker.drain();
                } else if fd == listener_fd {
                    self.accept_pending();
                } else {
                    self.handle_existing_connection(fd, flags);
                }
            }
        }

        self.shutdown_all();
    }

    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => self.register_client(stream),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if is_descriptor_exhaustion(&e) => {
                    log::error!("[Connector] Accept error: {e}, pausing accepts");
                    self.pause_accepting();
                    break;
                }
                Err(e) => {
                    log::error!("[Connector] Accept error: {e}");
                    break;
                }
            }
        }
    }

    /// Stop watching the listener. A level-triggered listener with a pending
    /// connection that cannot be accepted would otherwise wake us forever.
    fn pause_accepting(&mut self) {
        if self.accept_paused {
            return;
        }
        if let Err(e) = self.epoll.delete(self.listener.as_raw_fd()) {
            log::error!("[Connector] Failed to pause listener: {e}");
            return;
        }
        self.accept_paused = true;
    }

    /// Watch the listener again after a client released a descriptor or the
    /// retry timeout elapsed.
    fn resume_accepting(&mut self) {
        if !self.accept_paused {
            return;
        }
        if let Err(e) = self.epoll.add(self.listener.as_raw_fd(), EPOLLIN) {
            log::error!("[Connector] Failed to resume listener: {e}");
            return;
        }
        self.accept_paused = false;
        log::info!("[Connector] Resuming accepts");
    }

    fn register_client(&mut self, stream: UnixStream) {
        if let Err(e) = stream.set_nonblocking(true) {
            log::error!("[Connector] Failed to make client socket non-blocking: {e}");
            return;
        }

        let mut client = Client::new(stream, self.input_capacity, self.output_capacity);
        let fd = client.fd();
        if let Err(e) = self.epoll.add(fd, EPOLLIN | EPOLLRDHUP) {
            log::error!("[Connector] Failed to register client {fd} with epoll: {e}");
            return;
        }

        log::info!("[Connector] Client connected: {fd}");
        self.handler.handle_new_connection(&mut client);
        self.clients.insert(fd, client);
    }

    fn handle_existing_connection(&mut self, fd: RawFd, flags: u32) {
        let (keep, wants_write) = match self.clients.get_mut(&fd) {
            Some(client) => {
                let keep = service_client(&*self.handler, client, flags);
                (keep, client.has_pending_output())
            }
            None => return,
        };
        if !keep {
            self.kill_connection(fd);
            return;
        }
        self.update_write_interest(fd, wants_write);
    }

    /// Register `EPOLLOUT` only while output is queued.
    fn update_write_interest(&mut self, fd: RawFd, wants_write: bool) {
        if wants_write == self.write_armed.contains(&fd) {
            return;
        }
        let interest = if wants_write {
            EPOLLIN | EPOLLRDHUP | EPOLLOUT
        } else {
            EPOLLIN | EPOLLRDHUP
        };
        if let Err(e) = self.epoll.modify(fd, interest) {
            log::error!("[Connector] Failed to update write interest for client {fd}: {e}");
            return;
        }
        if wants_write {
            self.write_armed.insert(fd);
        } else {
            self.write_armed.remove(&fd);
        }
    }

    /// Remove a client, deliver its shutdown callback, and release it.
    fn kill_connection(&mut self, fd: RawFd) {
        let Some(mut client) = self.clients.remove(&fd) else {
            return;
        };
        self.write_armed.remove(&fd);
        if let Err(e) = self.epoll.delete(fd) {
            log::debug!("[Connector] epoll delete for client {fd}: {e}");
        }
        self.handler.handle_connection_shutdown(&mut client);
        client.destroy();
        drop(client);
        log::info!("[Connector] Client disconnected: {fd}");

        self.resume_accepting();
    }

    fn shutdown_all(&mut self) {
        let fds: Vec<RawFd> = self.clients.keys().copied().collect();
        if !fds.is_empty() {
            log::info!("[Connector] Shutting down {} client(s)", fds.len());
        }
        for fd in fds {
            self.kill_connection(fd);
        }
    }
}

/// `EMFILE`/`ENFILE`: the pending connection stays queued until a descriptor
/// frees up.
fn is_descriptor_exhaustion(error: &io::Error) -> bool {
    matches!(error.raw_os_error(), Some(libc::EMFILE | libc::ENFILE))
}

/// Service one readiness event. Returns `false` if the client must be torn
/// down.
fn service_client<H: RequestHandler>(
    handler: &H,
    client: &mut Client<H::Attachment>,
    flags: u32,
) -> bool {
    let fd = client.fd();

    if flags & (EPOLLIN | EPOLLOUT) == 0 {
        if flags & (EPOLLHUP | EPOLLERR) != 0 {
            log::info!("[Connector] Client {fd} hung up");
            return false;
        }
        return true;
    }

    if flags & EPOLLIN != 0 && !receive(handler, client) {
        return false;
    }

    if let Err(e) = client.flush_output() {
        log::warn!("[Connector] Write error for client {fd}: {e}");
        return false;
    }

    !client.is_killed()
}

/// Read from a readable client and dispatch its requests. Returns `false` if
/// the client must be torn down.
fn receive<H: RequestHandler>(handler: &H, client: &mut Client<H::Attachment>) -> bool {
    let fd = client.fd();

    let received = if client.has_input_stream() {
        client.fill_input()
    } else {
        // Handler declined an input stream: drop the bytes, but still read so
        // a peer close is seen.
        client.discard_input().inspect(|&n| {
            if n > 0 {
                log::debug!("[Connector] Client {fd} has no input stream, discarded {n} bytes");
            }
        })
    };

    let result = match received {
        Ok(0) => {
            log::info!("[Connector] Client {fd} closed connection");
            return false;
        }
        Ok(_) => drain_requests(handler, client),
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
            return true;
        }
        Err(e) => {
            log::warn!("[Connector] Read error for client {fd}: {e}");
            return false;
        }
    };

    if let Err(e) = result {
        log::warn!("[Connector] Request handling failed for client {fd}: {e:#}");
        return false;
    }
    true
}

fn drain_requests<H: RequestHandler>(handler: &H, client: &mut Client<H::Attachment>) -> Result<()> {
    while !client.is_killed() && handler.handle_request(client)? {}
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::fs::MetadataExt;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    /// Bytes queued in reply to request byte `0xEE`; larger than a socket
    /// send buffer.
    const LARGE_REPLY: usize = 1 << 20;

    /// Records callbacks; request byte `0xFF` asks for a kill, `0xEE` queues
    /// a [`LARGE_REPLY`]. With `skip_streams` no streams are created.
    #[derive(Default)]
    struct RecordingHandler {
        skip_streams: bool,
        connected: Mutex<Vec<RawFd>>,
        shutdowns: Mutex<Vec<(RawFd, Vec<u8>)>>,
        requests: std::sync::atomic::AtomicUsize,
    }

    impl ConnectionHandler for RecordingHandler {
        type Attachment = Vec<u8>;

        fn handle_new_connection(&self, client: &mut Client<Vec<u8>>) {
            if !self.skip_streams {
                client.create_io_streams();
            }
            self.connected.lock().unwrap().push(client.fd());
        }

        fn handle_connection_shutdown(&self, client: &mut Client<Vec<u8>>) {
            let seen = client.take_tag();
            self.shutdowns.lock().unwrap().push((client.fd(), seen));
        }
    }

    impl RequestHandler for RecordingHandler {
        fn handle_request(&self, client: &mut Client<Vec<u8>>) -> Result<bool> {
            self.requests.fetch_add(1, Ordering::Relaxed);
            let Some(input) = client.input_stream() else {
                return Ok(false);
            };
            if input.available() < 1 {
                return Ok(false);
            }
            let byte = input.read_u8()?;
            let mut seen = client.take_tag();
            seen.push(byte);
            client.set_tag(seen);
            if byte == 0xFF {
                client.kill();
            }
            if byte == 0xEE {
                if let Some(output) = client.output_stream() {
                    output.write_bytes(&vec![0xAB; LARGE_REPLY]);
                }
            }
            Ok(true)
        }
    }

    fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if check() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn connector(tmp: &tempfile::TempDir) -> (XConnector<RecordingHandler>, Arc<RecordingHandler>) {
        connector_with(tmp, RecordingHandler::default())
    }

    fn connector_with(
        tmp: &tempfile::TempDir,
        handler: RecordingHandler,
    ) -> (XConnector<RecordingHandler>, Arc<RecordingHandler>) {
        let handler = Arc::new(handler);
        let config = SocketConfig::new(tmp.path().join("sock/V0")).unwrap();
        let mut connector = XConnector::new(config, Arc::clone(&handler));
        connector.set_initial_input_buffer_capacity(1);
        connector.set_initial_output_buffer_capacity(0);
        (connector, handler)
    }

    #[test]
    fn test_start_twice_keeps_single_endpoint() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (mut connector, handler) = connector(&tmp);

        assert!(connector.start().unwrap());
        let inode = fs::metadata(connector.socket_path()).unwrap().ino();
        assert!(!connector.start().unwrap());
        assert!(connector.is_running());
        assert_eq!(fs::metadata(connector.socket_path()).unwrap().ino(), inode);

        let _stream = UnixStream::connect(connector.socket_path()).unwrap();
        assert!(wait_until(Duration::from_secs(2), || handler.connected.lock().unwrap().len() == 1));

        connector.stop();
        assert!(!connector.socket_path().exists());
    }

    #[test]
    fn test_stop_is_idempotent_and_safe_before_start() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (mut connector, _handler) = connector(&tmp);
        connector.stop();

        connector.start().unwrap();
        connector.stop();
        connector.stop();
        assert!(!connector.is_running());
    }

    #[test]
    fn test_requests_then_peer_close_delivers_one_shutdown() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (mut connector, handler) = connector(&tmp);
        connector.start().unwrap();

        let mut stream = UnixStream::connect(connector.socket_path()).unwrap();
        stream.write_all(&[1, 2, 3]).unwrap();
        drop(stream);

        assert!(wait_until(Duration::from_secs(2), || !handler.shutdowns.lock().unwrap().is_empty()));
        connector.stop();

        let shutdowns = handler.shutdowns.lock().unwrap();
        assert_eq!(shutdowns.len(), 1);
        assert_eq!(shutdowns[0].1, vec![1, 2, 3]);
    }

    #[test]
    fn test_kill_closes_connection() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (mut connector, handler) = connector(&tmp);
        connector.start().unwrap();

        let mut stream = UnixStream::connect(connector.socket_path()).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        stream.write_all(&[7, 0xFF]).unwrap();

        let mut buf = [0u8; 1];
        assert_eq!(stream.read(&mut buf).unwrap(), 0, "server should close the socket");

        let shutdowns = handler.shutdowns.lock().unwrap();
        assert_eq!(shutdowns.len(), 1);
        assert_eq!(shutdowns[0].1, vec![7, 0xFF]);
    }

    #[test]
    fn test_stop_shuts_down_live_clients() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (mut connector, handler) = connector(&tmp);
        connector.start().unwrap();

        let _a = UnixStream::connect(connector.socket_path()).unwrap();
        let _b = UnixStream::connect(connector.socket_path()).unwrap();
        assert!(wait_until(Duration::from_secs(2), || handler.connected.lock().unwrap().len() == 2));

        connector.stop();
        assert_eq!(handler.shutdowns.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_restart_after_stop() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (mut connector, handler) = connector(&tmp);
        connector.start().unwrap();
        connector.stop();
        assert!(connector.start().unwrap());

        let _stream = UnixStream::connect(connector.socket_path()).unwrap();
        assert!(wait_until(Duration::from_secs(2), || handler.connected.lock().unwrap().len() == 1));
    }

    #[test]
    fn test_zero_input_capacity_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (mut connector, _handler) = connector(&tmp);
        connector.set_initial_input_buffer_capacity(0);

        assert!(connector.start().is_err());
        assert!(!connector.is_running());
        assert!(!connector.socket_path().exists());
    }

    #[test]
    fn test_peer_close_without_input_stream_delivers_one_shutdown() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (mut connector, handler) = connector_with(
            &tmp,
            RecordingHandler {
                skip_streams: true,
                ..RecordingHandler::default()
            },
        );
        connector.start().unwrap();

        let mut stream = UnixStream::connect(connector.socket_path()).unwrap();
        stream.write_all(&[1]).unwrap();
        drop(stream);

        assert!(wait_until(Duration::from_secs(2), || handler.shutdowns.lock().unwrap().len() == 1));

        // Level-triggered readiness must not keep re-dispatching a closed client.
        thread::sleep(Duration::from_millis(100));
        assert!(handler.requests.load(Ordering::Relaxed) < 10);
        connector.stop();
        assert_eq!(handler.shutdowns.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_large_reply_is_flushed_without_further_requests() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (mut connector, _handler) = connector(&tmp);
        connector.set_initial_output_buffer_capacity(4096);
        connector.start().unwrap();

        let mut stream = UnixStream::connect(connector.socket_path()).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        stream.write_all(&[0xEE]).unwrap();

        // The reply exceeds the socket buffer; the rest must go out once the
        // socket drains, with no further input from this client.
        let mut reply = vec![0u8; LARGE_REPLY];
        stream.read_exact(&mut reply).unwrap();
        assert!(reply.iter().all(|&b| b == 0xAB));
    }

    fn bare_event_loop(tmp: &tempfile::TempDir) -> (EventLoop<RecordingHandler>, std::path::PathBuf) {
        let path = tmp.path().join("loop.sock");
        let listener = UnixListener::bind(&path).unwrap();
        listener.set_nonblocking(true).unwrap();
        let epoll = Epoll::new().unwrap();
        epoll.add(listener.as_raw_fd(), EPOLLIN).unwrap();
        let event_loop = EventLoop {
            listener,
            epoll,
            waker: Arc::new(Waker::new().unwrap()),
            stop: Arc::new(AtomicBool::new(false)),
            handler: Arc::new(RecordingHandler::default()),
            clients: HashMap::new(),
            write_armed: HashSet::new(),
            accept_paused: false,
            input_capacity: 1,
            output_capacity: 0,
        };
        (event_loop, path)
    }

    #[test]
    fn test_descriptor_exhaustion_errors() {
        assert!(is_descriptor_exhaustion(&io::Error::from_raw_os_error(libc::EMFILE)));
        assert!(is_descriptor_exhaustion(&io::Error::from_raw_os_error(libc::ENFILE)));
        assert!(!is_descriptor_exhaustion(&io::Error::from_raw_os_error(libc::ECONNABORTED)));
        assert!(!is_descriptor_exhaustion(&io::ErrorKind::WouldBlock.into()));
    }

    #[test]
    fn test_paused_listener_stops_reporting_pending_connections() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (mut event_loop, path) = bare_event_loop(&tmp);
        let mut events = [libc::epoll_event { events: 0, u64: 0 }; 4];

        let _pending = UnixStream::connect(&path).unwrap();
        assert_eq!(event_loop.epoll.wait(&mut events, 0).unwrap(), 1);

        event_loop.pause_accepting();
        assert!(event_loop.accept_paused);
        assert_eq!(event_loop.epoll.wait(&mut events, 0).unwrap(), 0);

        event_loop.resume_accepting();
        assert!(!event_loop.accept_paused);
        assert_eq!(event_loop.epoll.wait(&mut events, 0).unwrap(), 1);
    }

    #[test]
    fn test_client_teardown_resumes_paused_listener() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (mut event_loop, path) = bare_event_loop(&tmp);
        let mut events = [libc::epoll_event { events: 0, u64: 0 }; 4];

        let _first = UnixStream::connect(&path).unwrap();
        event_loop.accept_pending();
        let fd = *event_loop.clients.keys().next().unwrap();

        let _second = UnixStream::connect(&path).unwrap();
        event_loop.pause_accepting();
        event_loop.kill_connection(fd);

        assert!(!event_loop.accept_paused);
        assert_eq!(event_loop.handler.shutdowns.lock().unwrap().len(), 1);
        assert_eq!(event_loop.epoll.wait(&mut events, 0).unwrap(), 1);
        let token = events[0].u64;
        assert_eq!(token, event_loop.listener.as_raw_fd() as u64);
    }

    #[test]
    fn test_socket_file_guard_removes_unless_disarmed() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("guarded");

        fs::write(&path, b"").unwrap();
        drop(SocketFileGuard::new(&path));
        assert!(!path.exists());

        fs::write(&path, b"").unwrap();
        SocketFileGuard::new(&path).disarm();
        assert!(path.exists());
    }
}
