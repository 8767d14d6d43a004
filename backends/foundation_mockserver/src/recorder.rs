//! Request log shared by every connection worker of a server.
//!
//! The sequence number is assigned in the same critical section that appends the
//! request, so log order is arrival order across all connections.

use core::time::Duration;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Instant;

use crate::errors::{MockServerError, MockServerResult};
use crate::parser::ParsedRequest;
use crate::request::RecordedRequest;

struct RecorderState {
    unread: VecDeque<RecordedRequest>,
    next_sequence: u64,
    shutdown: bool,
}

pub struct RequestRecorder {
    state: Mutex<RecorderState>,
    arrived: Condvar,
}

impl RequestRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RecorderState {
                unread: VecDeque::new(),
                next_sequence: 0,
                shutdown: false,
            }),
            arrived: Condvar::new(),
        }
    }

    /// Stamps and appends a parsed request, returning the recorded copy.
    pub fn record(
        &self,
        parsed: ParsedRequest,
        connection_id: u64,
        connection_sequence: u64,
    ) -> RecordedRequest {
        let mut guard = self.lock();

        let recorded = RecordedRequest::new(
            parsed,
            guard.next_sequence,
            connection_id,
            connection_sequence,
        );
        guard.next_sequence += 1;
        guard.unread.push_back(recorded.clone());

        drop(guard);
        self.arrived.notify_all();

        tracing::debug!(
            "Recorded request #{} on connection {}: {}",
            recorded.sequence_number(),
            connection_id,
            recorded.request_line()
        );
        recorded
    }

    /// Pops the oldest unread request, waiting up to `timeout` for one.
    ///
    /// # Errors
    /// [`MockServerError::Timeout`] when nothing arrives in time;
    /// [`MockServerError::Shutdown`] when the server stopped and nothing is left.
    pub fn take_request(&self, timeout: Duration) -> MockServerResult<RecordedRequest> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();

        loop {
            if let Some(request) = guard.unread.pop_front() {
                return Ok(request);
            }

            if guard.shutdown {
                return Err(MockServerError::Shutdown);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(MockServerError::Timeout(timeout));
            }

            guard = match self.arrived.wait_timeout(guard, deadline - now) {
                Ok((g, _)) => g,
                Err(e) => e.into_inner().0,
            };
        }
    }

    #[must_use]
    pub fn try_take_request(&self) -> Option<RecordedRequest> {
        self.lock().unread.pop_front()
    }

    /// Total requests recorded so far, taken or not.
    #[must_use]
    pub fn request_count(&self) -> u64 {
        self.lock().next_sequence
    }

    /// Number of requests not yet taken.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.lock().unread.len()
    }

    /// Wakes waiters; takes on an empty log now fail with `Shutdown`.
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.arrived.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }
}

impl Default for RequestRecorder {
    fn default() -> Self {
        Self::new()
    }
}
