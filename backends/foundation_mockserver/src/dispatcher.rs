//! Response queue and dispatch.
//!
//! WHY: Tests script responses before (or while) the client runs, from a different
//! thread than the connection workers that answer requests.
//!
//! WHAT: [`QueueDispatcher`] holds a FIFO of [`MockResponse`]s. Each request pops
//! one; when the queue is empty an optional fallback [`Dispatcher`] answers, and
//! without one the configured [`EmptyQueuePolicy`] applies.
//!
//! HOW: `Mutex` + `Condvar`, so a worker parked on an empty queue wakes on
//! `enqueue`, on shutdown, or when `response_timeout` elapses.

use core::time::Duration;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Instant;

use crate::config::{EmptyQueuePolicy, MockServerConfig};
use crate::errors::{MockServerError, MockServerResult};
use crate::request::RecordedRequest;
use crate::response::MockResponse;

/// Produces a response for a recorded request.
///
/// Closures of the shape `Fn(&RecordedRequest) -> MockResponse` implement it:
///
/// ```rust
/// use foundation_mockserver::{Dispatcher, MockResponse, RecordedRequest};
///
/// let not_found = |req: &RecordedRequest| {
///     if req.path() == "/health" {
///         MockResponse::ok("up")
///     } else {
///         MockResponse::new().with_status(404)
///     }
/// };
///
/// fn takes_dispatcher<D: Dispatcher>(_: D) {}
/// takes_dispatcher(not_found);
/// ```
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, request: &RecordedRequest) -> MockResponse;
}

impl<F> Dispatcher for F
where
    F: Fn(&RecordedRequest) -> MockResponse + Send + Sync,
{
    fn dispatch(&self, request: &RecordedRequest) -> MockResponse {
        self(request)
    }
}

struct QueueState {
    responses: VecDeque<MockResponse>,
    fallback: Option<Arc<dyn Dispatcher>>,
    shutdown: bool,
}

pub struct QueueDispatcher {
    state: Mutex<QueueState>,
    available: Condvar,
    policy: EmptyQueuePolicy,
    response_timeout: Duration,
}

impl QueueDispatcher {
    #[must_use]
    pub fn new(policy: EmptyQueuePolicy, response_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState {
                responses: VecDeque::new(),
                fallback: None,
                shutdown: false,
            }),
            available: Condvar::new(),
            policy,
            response_timeout,
        }
    }

    #[must_use]
    pub fn from_config(config: &MockServerConfig) -> Self {
        Self::new(config.empty_queue_policy, config.response_timeout)
    }

    /// Appends a response and wakes one waiting worker.
    pub fn enqueue(&self, response: MockResponse) {
        let mut guard = self.lock();
        guard.responses.push_back(response);
        drop(guard);
        self.available.notify_one();
    }

    /// Installs the dispatcher consulted when the queue is empty.
    pub fn set_fallback<D: Dispatcher + 'static>(&self, dispatcher: D) {
        let mut guard = self.lock();
        guard.fallback = Some(Arc::new(dispatcher));
        drop(guard);
        // parked workers should now be answered by the fallback
        self.available.notify_all();
    }

    pub fn clear_fallback(&self) {
        self.lock().fallback = None;
    }

    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.lock().responses.len()
    }

    /// Wakes every waiting worker with [`MockServerError::Shutdown`].
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.available.notify_all();
    }

    /// Picks the response for `request`.
    ///
    /// # Errors
    /// [`MockServerError::Timeout`] when blocking on an empty queue ran past
    /// `response_timeout`, [`MockServerError::Shutdown`] once shut down.
    pub(crate) fn take_next(&self, request: &RecordedRequest) -> MockServerResult<MockResponse> {
        let deadline = Instant::now() + self.response_timeout;
        let mut guard = self.lock();

        loop {
            if guard.shutdown {
                return Err(MockServerError::Shutdown);
            }

            if let Some(response) = guard.responses.pop_front() {
                return Ok(response);
            }

            if let Some(fallback) = guard.fallback.clone() {
                drop(guard);
                return Ok(fallback.dispatch(request));
            }

            if self.policy == EmptyQueuePolicy::RespondEmpty {
                return Ok(MockResponse::new());
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    "No response queued for {:?} within {:?}",
                    request.request_line(),
                    self.response_timeout
                );
                return Err(MockServerError::Timeout(self.response_timeout));
            }

            guard = match self.available.wait_timeout(guard, deadline - now) {
                Ok((g, _)) => g,
                Err(e) => e.into_inner().0,
            };
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParsedRequest;
    use std::thread;

    fn request(target: &str) -> RecordedRequest {
        RecordedRequest::new(
            ParsedRequest {
                method: "GET".into(),
                target: target.into(),
                version: "HTTP/1.1".into(),
                headers: crate::Headers::new(),
                body: Vec::new(),
                chunk_sizes: Vec::new(),
            },
            0,
            0,
            0,
        )
    }

    #[test]
    fn responses_come_out_in_fifo_order() {
        let queue = QueueDispatcher::new(EmptyQueuePolicy::Block, Duration::from_millis(50));
        queue.enqueue(MockResponse::ok("one"));
        queue.enqueue(MockResponse::ok("two"));
        assert_eq!(queue.queued_count(), 2);

        let first = queue.take_next(&request("/")).expect("first");
        let second = queue.take_next(&request("/")).expect("second");
        assert_eq!(first.body(), b"one");
        assert_eq!(second.body(), b"two");
        assert_eq!(queue.queued_count(), 0);
    }

    #[test]
    fn fallback_answers_when_queue_is_empty() {
        let queue = QueueDispatcher::new(EmptyQueuePolicy::Block, Duration::from_millis(50));
        queue.set_fallback(|req: &RecordedRequest| MockResponse::ok(req.path().to_string()));
        queue.enqueue(MockResponse::ok("queued"));

        assert_eq!(queue.take_next(&request("/a")).expect("queued").body(), b"queued");
        assert_eq!(queue.take_next(&request("/b")).expect("fallback").body(), b"/b");

        queue.clear_fallback();
        assert!(matches!(
            queue.take_next(&request("/c")),
            Err(MockServerError::Timeout(_))
        ));
    }

    #[test]
    fn respond_empty_policy_answers_200() {
        let queue = QueueDispatcher::new(EmptyQueuePolicy::RespondEmpty, Duration::from_secs(5));
        let response = queue.take_next(&request("/")).expect("default response");
        assert_eq!(response, MockResponse::new());
    }

    #[test]
    fn blocked_worker_wakes_on_enqueue() {
        let queue = Arc::new(QueueDispatcher::new(
            EmptyQueuePolicy::Block,
            Duration::from_secs(5),
        ));

        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.take_next(&request("/late")))
        };

        thread::sleep(Duration::from_millis(50));
        queue.enqueue(MockResponse::ok("late"));

        let response = waiter.join().unwrap().expect("should receive response");
        assert_eq!(response.body(), b"late");
    }

    #[test]
    fn blocked_worker_wakes_on_shutdown() {
        let queue = Arc::new(QueueDispatcher::new(
            EmptyQueuePolicy::Block,
            Duration::from_secs(30),
        ));

        let waiter = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.take_next(&request("/")))
        };

        thread::sleep(Duration::from_millis(50));
        let started = Instant::now();
        queue.shutdown();

        assert!(matches!(
            waiter.join().unwrap(),
            Err(MockServerError::Shutdown)
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
