//! Mock HTTP server lifecycle.
//!
//! WHY: Client comparison tests need a real HTTP server whose responses they
//! script up front and whose received requests they inspect afterwards.
//!
//! WHAT: [`MockServer`] binds a loopback listener, serves every connection on
//! its own thread, records each request and answers from its response queue.
//!
//! HOW: stdlib `TcpListener` polled in non-blocking mode so the acceptor can
//! observe shutdown; `stop()` shuts every open socket down to unblock readers
//! and joins all threads before returning.

use core::time::Duration;
use std::collections::HashMap;
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use url::Url;

use crate::config::MockServerConfig;
use crate::connection::Connection;
use crate::dispatcher::{Dispatcher, QueueDispatcher};
use crate::errors::{MockServerError, MockServerResult};
use crate::recorder::RequestRecorder;
use crate::request::RecordedRequest;
use crate::response::MockResponse;

const SHUTDOWN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// State shared by the acceptor, the connection workers and the test thread.
pub(crate) struct ServerShared {
    config: MockServerConfig,
    recorder: RequestRecorder,
    dispatcher: QueueDispatcher,
    shutting_down: AtomicBool,
    next_connection_id: AtomicU64,
    connections: Mutex<HashMap<u64, TcpStream>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ServerShared {
    fn new(config: MockServerConfig) -> Self {
        Self {
            dispatcher: QueueDispatcher::from_config(&config),
            recorder: RequestRecorder::new(),
            config,
            shutting_down: AtomicBool::new(false),
            next_connection_id: AtomicU64::new(0),
            connections: Mutex::new(HashMap::new()),
            workers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn config(&self) -> &MockServerConfig {
        &self.config
    }

    pub(crate) fn recorder(&self) -> &RequestRecorder {
        &self.recorder
    }

    pub(crate) fn dispatcher(&self) -> &QueueDispatcher {
        &self.dispatcher
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    fn worker_count(&self) -> usize {
        lock(&self.workers).len()
    }

    pub(crate) fn deregister_connection(&self, id: u64) {
        lock(&self.connections).remove(&id);
    }

    /// Sleeps for `duration`, returning early once shutdown starts.
    pub(crate) fn sleep_unless_shutting_down(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.is_shutting_down() {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep((deadline - now).min(SHUTDOWN_CHECK_INTERVAL));
        }
    }

    fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        while !self.is_shutting_down() {
            match listener.accept() {
                Ok((stream, peer)) => {
                    tracing::info!("Got a client connection: {peer:?}");
                    Self::spawn_connection(&self, stream, peer);
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(self.config.accept_poll_interval);
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::error!("MockServer accept error: {e}");
                    break;
                }
            }
        }
        tracing::debug!("MockServer acceptor exiting");
    }

    fn spawn_connection(shared: &Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        // accepted sockets may inherit the listener's non-blocking mode
        if let Err(err) = stream.set_nonblocking(false) {
            tracing::warn!("Dropping connection from {peer}: {err}");
            return;
        }

        let registry_handle = match stream.try_clone() {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!("Dropping connection from {peer}: {err}");
                return;
            }
        };

        let id = shared.next_connection_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut connections = lock(&shared.connections);
            if shared.is_shutting_down() {
                let _ = stream.shutdown(Shutdown::Both);
                return;
            }
            connections.insert(id, registry_handle);
        }

        let worker_shared = Arc::clone(shared);
        let spawned = thread::Builder::new()
            .name(format!("mockserver-conn-{id}"))
            .spawn(move || Connection::new(id, peer, stream).serve(&worker_shared));

        match spawned {
            Ok(handle) => {
                let mut workers = lock(&shared.workers);
                // finished workers have nothing left to join
                workers.retain(|worker| !worker.is_finished());
                workers.push(handle);
            }
            Err(err) => {
                tracing::error!("Failed to spawn worker for connection {id}: {err}");
                if let Some(orphan) = lock(&shared.connections).remove(&id) {
                    let _ = orphan.shutdown(Shutdown::Both);
                }
            }
        }
    }
}

#[derive(Clone)]
struct Listening {
    address: SocketAddr,
    base_url: Url,
}

enum Lifecycle {
    Idle,
    Running {
        listening: Listening,
        acceptor: JoinHandle<()>,
    },
    Stopped(Option<Listening>),
}

impl Lifecycle {
    fn listening(&self) -> Option<&Listening> {
        match self {
            Lifecycle::Idle => None,
            Lifecycle::Running { listening, .. } => Some(listening),
            Lifecycle::Stopped(listening) => listening.as_ref(),
        }
    }
}

/// Scriptable mock HTTP/1.1 server.
///
/// Every method takes `&self`, so a server can be shared through an `Arc` and
/// stopped while another thread is blocked in [`MockServer::take_request`].
///
/// # Examples
///
/// ```rust
/// use std::io::{Read, Write};
/// use std::net::TcpStream;
/// use std::time::Duration;
///
/// use foundation_mockserver::{MockResponse, MockServer};
///
/// let server = MockServer::new();
/// let base = server.start().expect("should bind");
/// assert!(base.as_str().starts_with("http://127.0.0.1:"));
/// server.enqueue(MockResponse::ok("hello"));
///
/// let mut client = TcpStream::connect(server.socket_addr().unwrap()).unwrap();
/// client
///     .write_all(b"GET /greeting HTTP/1.1\r\nHost: mock\r\nConnection: close\r\n\r\n")
///     .unwrap();
/// let mut response = String::new();
/// client.read_to_string(&mut response).unwrap();
/// assert!(response.ends_with("hello"));
///
/// let recorded = server.take_request(Duration::from_secs(5)).unwrap();
/// assert_eq!(recorded.path(), "/greeting");
/// assert_eq!(recorded.header("host"), Some("mock"));
///
/// server.stop().unwrap();
/// ```
pub struct MockServer {
    shared: Arc<ServerShared>,
    lifecycle: Mutex<Lifecycle>,
}

impl MockServer {
    /// An unstarted server with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockServerConfig::default())
    }

    #[must_use]
    pub fn with_config(config: MockServerConfig) -> Self {
        Self {
            shared: Arc::new(ServerShared::new(config)),
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    /// Builds and starts a server with the default configuration.
    ///
    /// # Errors
    /// See [`MockServer::start`].
    pub fn started() -> MockServerResult<Self> {
        let server = Self::new();
        server.start()?;
        Ok(server)
    }

    /// Binds the listener and starts accepting connections.
    ///
    /// Returns the base URL, e.g. `http://127.0.0.1:54321/`.
    ///
    /// # Errors
    /// [`MockServerError::Bind`] when the listener cannot be set up (nothing is
    /// left running), [`MockServerError::AlreadyStarted`] on a second call and
    /// [`MockServerError::Shutdown`] after [`MockServer::stop`].
    pub fn start(&self) -> MockServerResult<Url> {
        let mut lifecycle = lock(&self.lifecycle);
        match *lifecycle {
            Lifecycle::Idle => {}
            Lifecycle::Running { .. } => return Err(MockServerError::AlreadyStarted),
            Lifecycle::Stopped(_) => return Err(MockServerError::Shutdown),
        }

        let config = self.shared.config();
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .map_err(MockServerError::Bind)?;
        let address = listener.local_addr().map_err(MockServerError::Bind)?;
        listener
            .set_nonblocking(true)
            .map_err(MockServerError::Bind)?;

        let base_url = Url::parse(&format!("http://{address}/"))?;

        let acceptor_shared = Arc::clone(&self.shared);
        let acceptor = thread::Builder::new()
            .name(format!("mockserver-accept-{}", address.port()))
            .spawn(move || acceptor_shared.accept_loop(listener))?;

        tracing::info!("MockServer listening on {base_url}");

        *lifecycle = Lifecycle::Running {
            listening: Listening {
                address,
                base_url: base_url.clone(),
            },
            acceptor,
        };
        Ok(base_url)
    }

    /// Stops accepting, closes every connection and joins all threads.
    ///
    /// Blocked [`MockServer::take_request`] callers and workers waiting for a
    /// queued response are woken with [`MockServerError::Shutdown`]. Calling it
    /// again is a no-op.
    ///
    /// # Errors
    /// Teardown does not fail; the result is always `Ok`.
    pub fn stop(&self) -> MockServerResult<()> {
        let mut lifecycle = lock(&self.lifecycle);
        let (listening, acceptor) =
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped(None)) {
                Lifecycle::Stopped(listening) => {
                    *lifecycle = Lifecycle::Stopped(listening);
                    return Ok(());
                }
                Lifecycle::Idle => (None, None),
                Lifecycle::Running {
                    listening,
                    acceptor,
                } => (Some(listening), Some(acceptor)),
            };

        self.shared.shutting_down.store(true, Ordering::SeqCst);
        self.shared.recorder.shutdown();
        self.shared.dispatcher.shutdown();

        if let Some(acceptor) = acceptor {
            if acceptor.join().is_err() {
                tracing::error!("MockServer acceptor thread panicked");
            }
        }

        // the acceptor is gone, so the registry can only shrink from here
        let open: Vec<(u64, TcpStream)> = lock(&self.shared.connections).drain().collect();
        for (id, stream) in open {
            tracing::debug!("Closing connection {id}");
            let _ = stream.shutdown(Shutdown::Both);
        }

        let workers = std::mem::take(&mut *lock(&self.shared.workers));
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("MockServer connection worker panicked");
            }
        }

        if let Some(listening) = &listening {
            tracing::info!("MockServer on {} stopped", listening.base_url);
        }
        *lifecycle = Lifecycle::Stopped(listening);
        Ok(())
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(*lock(&self.lifecycle), Lifecycle::Running { .. })
    }

    /// Absolute URL for `path` on this server.
    ///
    /// # Errors
    /// [`MockServerError::NotStarted`] before [`MockServer::start`], or
    /// [`MockServerError::InvalidUrl`] when `path` cannot be joined.
    pub fn url(&self, path: &str) -> MockServerResult<Url> {
        Ok(self.base_url()?.join(path)?)
    }

    /// # Errors
    /// [`MockServerError::NotStarted`] before [`MockServer::start`].
    pub fn base_url(&self) -> MockServerResult<Url> {
        self.listening().map(|listening| listening.base_url)
    }

    /// # Errors
    /// [`MockServerError::NotStarted`] before [`MockServer::start`].
    pub fn socket_addr(&self) -> MockServerResult<SocketAddr> {
        self.listening().map(|listening| listening.address)
    }

    /// # Errors
    /// [`MockServerError::NotStarted`] before [`MockServer::start`].
    pub fn port(&self) -> MockServerResult<u16> {
        self.socket_addr().map(|address| address.port())
    }

    /// # Errors
    /// [`MockServerError::NotStarted`] before [`MockServer::start`].
    pub fn host(&self) -> MockServerResult<IpAddr> {
        self.socket_addr().map(|address| address.ip())
    }

    #[must_use]
    pub fn config(&self) -> &MockServerConfig {
        self.shared.config()
    }

    /// Queues the response for the next request that finds the queue non-empty.
    pub fn enqueue(&self, response: MockResponse) {
        self.shared.dispatcher.enqueue(response);
    }

    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.shared.dispatcher.queued_count()
    }

    /// Answers requests with `dispatcher` whenever the queue is empty.
    pub fn set_fallback<D: Dispatcher + 'static>(&self, dispatcher: D) {
        self.shared.dispatcher.set_fallback(dispatcher);
    }

    pub fn clear_fallback(&self) {
        self.shared.dispatcher.clear_fallback();
    }

    /// Oldest request not taken yet, waiting up to `timeout`.
    ///
    /// # Errors
    /// [`MockServerError::Timeout`] if none arrives in time, or
    /// [`MockServerError::Shutdown`] once stopped with nothing left to take.
    pub fn take_request(&self, timeout: Duration) -> MockServerResult<RecordedRequest> {
        self.shared.recorder.take_request(timeout)
    }

    /// [`MockServer::take_request`] with the configured `take_timeout`.
    ///
    /// # Errors
    /// As [`MockServer::take_request`].
    pub fn take_request_default(&self) -> MockServerResult<RecordedRequest> {
        self.take_request(self.shared.config.take_timeout)
    }

    #[must_use]
    pub fn try_take_request(&self) -> Option<RecordedRequest> {
        self.shared.recorder.try_take_request()
    }

    /// Requests received so far, including ones already taken.
    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.shared.recorder.request_count()
    }

    fn listening(&self) -> MockServerResult<Listening> {
        lock(&self.lifecycle)
            .listening()
            .cloned()
            .ok_or(MockServerError::NotStarted)
    }
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::error!("MockServer failed to stop cleanly: {err}");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(g) => g,
        Err(e) => e.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn start_binds_an_ephemeral_loopback_port() {
        let server = MockServer::new();
        let base = server.start().expect("should start");

        assert_eq!(base.scheme(), "http");
        assert_eq!(base.host_str(), Some("127.0.0.1"));
        assert_eq!(base.path(), "/");
        assert_ne!(server.port().expect("port"), 0);
        assert!(server.host().expect("host").is_loopback());
        assert!(server.is_running());

        let url = server.url("/api/users?page=2").expect("url");
        assert_eq!(url.path(), "/api/users");
        assert_eq!(url.query(), Some("page=2"));
        assert_eq!(url.port(), base.port());
    }

    #[test]
    fn url_requires_a_started_server() {
        let server = MockServer::new();
        assert!(matches!(server.url("/"), Err(MockServerError::NotStarted)));
        assert!(matches!(server.port(), Err(MockServerError::NotStarted)));
    }

    #[test]
    #[ntest::timeout(5000)]
    fn stop_is_idempotent_and_final() {
        let server = MockServer::started().expect("should start");

        server.stop().expect("first stop");
        server.stop().expect("second stop");
        assert!(!server.is_running());

        assert!(matches!(server.start(), Err(MockServerError::Shutdown)));
    }

    #[test]
    fn start_twice_is_rejected() {
        let server = MockServer::started().expect("should start");
        assert!(matches!(server.start(), Err(MockServerError::AlreadyStarted)));
    }

    #[test]
    fn stop_without_start_is_fine() {
        let server = MockServer::new();
        server.stop().expect("stop on idle server");
        assert!(matches!(server.start(), Err(MockServerError::Shutdown)));
    }

    #[test]
    fn bind_failure_is_reported() {
        let holder = TcpListener::bind("127.0.0.1:0").expect("bind holder");
        let taken_port = holder.local_addr().expect("addr").port();

        let server = MockServer::with_config(MockServerConfig::new().port(taken_port));
        assert!(matches!(server.start(), Err(MockServerError::Bind(_))));
        assert!(!server.is_running());
        assert!(matches!(server.url("/"), Err(MockServerError::NotStarted)));
    }

    #[test]
    #[ntest::timeout(5000)]
    fn stop_from_another_thread_unblocks_take_request() {
        let server = Arc::new(MockServer::started().expect("should start"));

        let taker = {
            let server = Arc::clone(&server);
            thread::spawn(move || server.take_request(Duration::from_secs(30)))
        };

        thread::sleep(Duration::from_millis(50));
        server.stop().expect("stop");

        assert!(matches!(
            taker.join().expect("taker thread"),
            Err(MockServerError::Shutdown)
        ));
    }

    #[test]
    fn addresses_stay_readable_after_stop() {
        let server = MockServer::started().expect("should start");
        let before = server.base_url().expect("base url");
        server.stop().expect("stop");
        assert_eq!(server.base_url().expect("base url after stop"), before);
    }

    #[test]
    #[ntest::timeout(10000)]
    fn finished_workers_are_reclaimed() {
        use std::io::{Read, Write};

        let config = MockServerConfig::new()
            .empty_queue_policy(crate::config::EmptyQueuePolicy::RespondEmpty);
        let server = MockServer::with_config(config);
        server.start().expect("should start");
        let address = server.socket_addr().expect("addr");

        let exchange = || {
            let mut client = TcpStream::connect(address).expect("connect");
            client
                .write_all(b"GET / HTTP/1.1\r\nHost: mock\r\nConnection: close\r\n\r\n")
                .expect("write");
            let mut response = Vec::new();
            client.read_to_end(&mut response).expect("read");
            assert!(response.starts_with(b"HTTP/1.1 200 OK\r\n"));
        };

        for _ in 0..20 {
            exchange();
        }
        thread::sleep(Duration::from_millis(200));
        exchange();

        assert!(server.shared.worker_count() <= 2);
        assert_eq!(server.request_count(), 21);
    }

    #[test]
    fn sleep_returns_early_on_shutdown() {
        let shared = ServerShared::new(MockServerConfig::default());
        shared.shutting_down.store(true, Ordering::SeqCst);

        let started = Instant::now();
        shared.sleep_unless_shutting_down(Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
