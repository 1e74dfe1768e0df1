//! End-to-end tests: real Unix socket, real event loop, recording backend.

use std::io::{ErrorKind, Read, Write};
use std::os::unix::io::RawFd;
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use vortek_bridge::window::LocalWindowManager;
use vortek_bridge::{
    ContextHandle, GpuImage, RenderBackend, RenderOptions, RenderQueue, RendererComponent,
    SocketConfig, Texture,
};

/// Records every context call. Handles count up from 100.
#[derive(Default)]
struct RecordingBackend {
    fail_create: bool,
    created: Mutex<Vec<i64>>,
    destroyed: Mutex<Vec<ContextHandle>>,
}

impl RecordingBackend {
    fn failing() -> Self {
        Self {
            fail_create: true,
            ..Self::default()
        }
    }

    fn created(&self) -> Vec<i64> {
        self.created.lock().unwrap().clone()
    }

    fn destroyed(&self) -> Vec<i64> {
        self.destroyed.lock().unwrap().iter().map(|h| h.raw()).collect()
    }
}

impl RenderBackend for RecordingBackend {
    fn create_context(&self, _fd: RawFd, _options: &RenderOptions) -> i64 {
        let mut created = self.created.lock().unwrap();
        let handle = if self.fail_create { 0 } else { 100 + created.len() as i64 };
        created.push(handle);
        handle
    }

    fn destroy_context(&self, handle: ContextHandle) {
        self.destroyed.lock().unwrap().push(handle);
    }

    fn allocate_gpu_image(&self, _width: u16, _height: u16) -> Option<GpuImage> {
        None
    }

    fn destroy_texture(&self, _texture: Texture) {}
}

struct Harness {
    _dir: TempDir,
    renderer: RendererComponent,
    backend: Arc<RecordingBackend>,
}

impl Harness {
    fn start(backend: RecordingBackend) -> Self {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(backend);
        let (queue, _receiver) = RenderQueue::channel();
        let socket = SocketConfig::create(dir.path(), "tmp/.vortek/V0").unwrap();
        let mut renderer = RendererComponent::new(
            Arc::new(LocalWindowManager::new()),
            Arc::clone(&backend) as Arc<dyn RenderBackend>,
            queue,
            socket,
            RenderOptions::default(),
        );
        renderer.start().unwrap();
        Self {
            _dir: dir,
            renderer,
            backend,
        }
    }

    fn connect(&self) -> UnixStream {
        let stream = UnixStream::connect(self.renderer.socket_path()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        stream
    }
}

fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(10));
    }
}

/// `true` if the server has not closed the connection.
fn still_open(stream: &mut UnixStream) -> bool {
    let mut buf = [0u8; 1];
    match stream.read(&mut buf) {
        Ok(0) => false,
        Ok(_) => panic!("server never writes to clients"),
        Err(e) => matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut),
    }
}

#[test]
fn test_create_then_close_destroys_context_once() {
    let harness = Harness::start(RecordingBackend::default());
    let mut client = harness.connect();

    client.write_all(&[1]).unwrap();
    wait_until("context creation", || harness.backend.created().len() == 1);
    assert!(still_open(&mut client));
    assert!(harness.backend.destroyed().is_empty());

    drop(client);
    wait_until("context destruction", || !harness.backend.destroyed().is_empty());
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(harness.backend.destroyed(), harness.backend.created());
}

#[test]
fn test_failed_create_closes_connection() {
    let harness = Harness::start(RecordingBackend::failing());
    let mut client = harness.connect();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    client.write_all(&[1]).unwrap();
    let mut buf = [0u8; 1];
    assert_eq!(client.read(&mut buf).unwrap(), 0, "server should close the connection");
    assert_eq!(harness.backend.created(), vec![0]);
    assert!(harness.backend.destroyed().is_empty());
}

#[test]
fn test_unknown_codes_keep_connection_open() {
    let harness = Harness::start(RecordingBackend::default());
    let mut client = harness.connect();

    client.write_all(&[0, 2, 42, 255]).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    assert!(still_open(&mut client));
    assert!(harness.backend.created().is_empty());

    // Still serviceable afterwards.
    client.write_all(&[1]).unwrap();
    wait_until("context creation", || harness.backend.created().len() == 1);
}

#[test]
fn test_double_create_keeps_first_context() {
    let harness = Harness::start(RecordingBackend::default());
    let mut client = harness.connect();

    client.write_all(&[1, 1]).unwrap();
    wait_until("context creation", || harness.backend.created().len() == 1);
    std::thread::sleep(Duration::from_millis(100));
    assert!(still_open(&mut client));
    assert_eq!(harness.backend.created(), vec![100]);

    drop(client);
    wait_until("context destruction", || harness.backend.destroyed() == vec![100]);
}

#[test]
fn test_clients_get_independent_contexts() {
    let harness = Harness::start(RecordingBackend::default());
    let mut a = harness.connect();
    let mut b = harness.connect();

    a.write_all(&[1]).unwrap();
    wait_until("first context", || harness.backend.created().len() == 1);
    b.write_all(&[1]).unwrap();
    wait_until("second context", || harness.backend.created().len() == 2);

    drop(a);
    wait_until("first destruction", || harness.backend.destroyed() == vec![100]);
    assert!(still_open(&mut b));
}

#[test]
fn test_stop_destroys_live_contexts() {
    let mut harness = Harness::start(RecordingBackend::default());
    let mut client = harness.connect();
    client.write_all(&[1]).unwrap();
    wait_until("context creation", || harness.backend.created().len() == 1);

    harness.renderer.stop();
    assert_eq!(harness.backend.destroyed(), vec![100]);
    assert!(!harness.renderer.socket_path().exists());

    harness.renderer.stop();
    assert_eq!(harness.backend.destroyed().len(), 1);
}

#[test]
fn test_start_twice_keeps_one_endpoint() {
    let mut harness = Harness::start(RecordingBackend::default());
    harness.renderer.start().unwrap();
    assert!(harness.renderer.is_running());

    let mut client = harness.connect();
    client.write_all(&[1]).unwrap();
    wait_until("context creation", || harness.backend.created().len() == 1);
}
