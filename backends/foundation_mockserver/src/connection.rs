//! Per-connection worker.
//!
//! WHY: Each client connection must make progress on its own (a redirect test has
//! the client talking to two servers with connections still open on the first).
//!
//! WHAT: [`Connection`] owns one accepted socket for its whole life, parsing
//! requests off it, recording them and writing the dispatched responses back.
//!
//! HOW: runs on its own thread; the socket is closed when the peer closes,
//! on any protocol or socket error, or when either side asks for `close`.

use std::io::{BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;

use crate::errors::MockServerError;
use crate::parser::{ParseLimits, RequestParser};
use crate::response::{MockResponse, SocketPolicy};
use crate::server::ServerShared;

pub(crate) struct Connection {
    id: u64,
    peer: SocketAddr,
    stream: TcpStream,
    requests_served: u64,
}

impl Connection {
    pub(crate) fn new(id: u64, peer: SocketAddr, stream: TcpStream) -> Self {
        Self {
            id,
            peer,
            stream,
            requests_served: 0,
        }
    }

    /// Serves requests until the connection ends, then deregisters it.
    pub(crate) fn serve(mut self, shared: &Arc<ServerShared>) {
        match self.stream.try_clone() {
            Ok(read_stream) => self.serve_requests(read_stream, shared),
            Err(err) => tracing::warn!("Connection {} could not clone stream: {err}", self.id),
        }

        // errors here only mean the peer is already gone
        let _ = self.stream.shutdown(Shutdown::Both);
        shared.deregister_connection(self.id);

        tracing::debug!(
            "Connection {} from {} closed after {} request(s)",
            self.id,
            self.peer,
            self.requests_served
        );
    }

    fn serve_requests(&mut self, read_stream: TcpStream, shared: &Arc<ServerShared>) {
        let limits = ParseLimits::from(shared.config());
        let mut parser = RequestParser::new(BufReader::new(read_stream), limits);

        loop {
            let parsed = match parser.next_request() {
                Ok(Some(parsed)) => parsed,
                Ok(None) => {
                    tracing::debug!("Connection {}: peer closed", self.id);
                    return;
                }
                Err(err) => {
                    if shared.is_shutting_down() {
                        tracing::debug!("Connection {}: read ended by shutdown", self.id);
                    } else {
                        tracing::warn!(
                            "Connection {}: protocol error in state {:?}: {err}",
                            self.id,
                            parser.state()
                        );
                    }
                    return;
                }
            };

            let client_wants_close = parsed.wants_close();
            let recorded = shared
                .recorder()
                .record(parsed, self.id, self.requests_served);
            self.requests_served += 1;

            let response = match shared.dispatcher().take_next(&recorded) {
                Ok(response) => response,
                Err(MockServerError::Shutdown) => return,
                Err(err) => {
                    tracing::warn!(
                        "Connection {}: no response for {:?}: {err}",
                        self.id,
                        recorded.request_line()
                    );
                    return;
                }
            };

            match response.socket_policy() {
                SocketPolicy::DisconnectAtStart => {
                    tracing::debug!("Connection {}: disconnecting at start", self.id);
                    return;
                }
                SocketPolicy::NoResponse => {
                    if client_wants_close {
                        return;
                    }
                    continue;
                }
                SocketPolicy::KeepOpen | SocketPolicy::DisconnectAtEnd => {}
            }

            if let Err(err) = self.write_response(&response, shared) {
                tracing::debug!("Connection {}: write failed: {err}", self.id);
                return;
            }

            tracing::info!(
                "Connection {}: answered {:?} with {}",
                self.id,
                recorded.request_line(),
                response.status()
            );

            if client_wants_close || response.closes_connection() {
                return;
            }
        }
    }

    fn write_response(
        &mut self,
        response: &MockResponse,
        shared: &Arc<ServerShared>,
    ) -> std::io::Result<()> {
        self.stream.write_all(&response.render_head())?;

        if let Some(delay) = response.body_delay() {
            self.stream.flush()?;
            shared.sleep_unless_shutting_down(delay);
        }

        self.stream.write_all(&response.render_body())?;
        self.stream.flush()
    }
}
