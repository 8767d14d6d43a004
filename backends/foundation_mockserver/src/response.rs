//! Scripted responses.
//!
//! WHAT: [`MockResponse`], a canned HTTP/1.1 response queued by test code and
//! consumed once by the dispatcher, and [`SocketPolicy`] which tells the
//! connection worker what to do with the socket around the write.
//!
//! HOW: Responses are rendered by hand into HTTP/1.1 bytes, headers in the order
//! they were added.

use core::time::Duration;

use crate::headers::Headers;

/// What the connection worker does with the socket for a given response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketPolicy {
    /// Write the response and keep serving the connection if both sides allow it.
    #[default]
    KeepOpen,
    /// Write the response, then close the connection.
    DisconnectAtEnd,
    /// Close the connection without writing anything.
    DisconnectAtStart,
    /// Write nothing and keep reading from the connection.
    NoResponse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    status: u16,
    reason: String,
    headers: Headers,
    body: Vec<u8>,
    /// Maximum chunk size when the body is sent with chunked framing.
    chunk_size: Option<usize>,
    close_connection: bool,
    body_delay: Option<Duration>,
    socket_policy: SocketPolicy,
}

impl MockResponse {
    /// `200 OK` with `Content-Length: 0`.
    #[must_use]
    pub fn new() -> Self {
        let mut headers = Headers::new();
        headers.add("Content-Length", "0");

        Self {
            status: 200,
            reason: reason_phrase(200).to_string(),
            headers,
            body: Vec::new(),
            chunk_size: None,
            close_connection: false,
            body_delay: None,
            socket_policy: SocketPolicy::KeepOpen,
        }
    }

    /// `200 OK` with the given body.
    #[must_use]
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::new().with_body(body)
    }

    /// A redirect with the given status (301, 302, 307, ...) pointing at `location`.
    #[must_use]
    pub fn redirect(status: u16, location: &str) -> Self {
        Self::new()
            .with_status(status)
            .add_header("Location", location)
    }

    /// Sets the status code and resets the reason phrase to its standard text.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self.reason = reason_phrase(status).to_string();
        self
    }

    #[must_use]
    pub fn with_reason<S: Into<String>>(mut self, reason: S) -> Self {
        self.reason = reason.into();
        self
    }

    #[must_use]
    pub fn add_header<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.headers.add(name, value);
        self
    }

    #[must_use]
    pub fn set_header<N: Into<String>, V: Into<String>>(mut self, name: N, value: V) -> Self {
        self.headers.set(name, value);
        self
    }

    #[must_use]
    pub fn remove_header(mut self, name: &str) -> Self {
        self.headers.remove(name);
        self
    }

    /// Sets an identity framed body and its `Content-Length`.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self.chunk_size = None;
        self.headers.remove("Transfer-Encoding");
        self.headers
            .set("Content-Length", self.body.len().to_string());
        self
    }

    /// Sets a chunked body split into chunks of at most `max_chunk_size` bytes.
    #[must_use]
    pub fn with_chunked_body(mut self, body: impl Into<Vec<u8>>, max_chunk_size: usize) -> Self {
        self.body = body.into();
        self.chunk_size = Some(max_chunk_size.max(1));
        self.headers.remove("Content-Length");
        self.headers.set("Transfer-Encoding", "chunked");
        self
    }

    /// Close the connection once this response has been written.
    #[must_use]
    pub fn with_close_connection(mut self, close: bool) -> Self {
        self.close_connection = close;
        self
    }

    /// Pause between writing the head and the body.
    #[must_use]
    pub fn with_body_delay(mut self, delay: Duration) -> Self {
        self.body_delay = Some(delay);
        self
    }

    #[must_use]
    pub fn with_socket_policy(mut self, policy: SocketPolicy) -> Self {
        self.socket_policy = policy;
        self
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[must_use]
    pub fn body_delay(&self) -> Option<Duration> {
        self.body_delay
    }

    #[must_use]
    pub fn socket_policy(&self) -> SocketPolicy {
        self.socket_policy
    }

    /// Whether the connection must end after this response is written.
    #[must_use]
    pub fn closes_connection(&self) -> bool {
        self.close_connection
            || self.socket_policy == SocketPolicy::DisconnectAtEnd
            || self.headers.has_token("Connection", "close")
    }

    /// Status line and headers, terminated by the blank line.
    #[must_use]
    pub fn render_head(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason);

        for line in &self.headers {
            head.push_str(&line.name);
            head.push_str(": ");
            head.push_str(&line.value);
            head.push_str("\r\n");
        }

        head.push_str("\r\n");
        head.into_bytes()
    }

    /// The body as it goes on the wire, chunk framed when requested.
    #[must_use]
    pub fn render_body(&self) -> Vec<u8> {
        let Some(chunk_size) = self.chunk_size else {
            return self.body.clone();
        };

        let mut rendered = Vec::with_capacity(self.body.len() + 16);
        for chunk in self.body.chunks(chunk_size) {
            rendered.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
            rendered.extend_from_slice(chunk);
            rendered.extend_from_slice(b"\r\n");
        }
        rendered.extend_from_slice(b"0\r\n\r\n");
        rendered
    }

    /// Full HTTP/1.1 rendering of the response.
    #[must_use]
    pub fn render(&self) -> Vec<u8> {
        let mut bytes = self.render_head();
        bytes.extend(self.render_body());
        bytes
    }
}

impl Default for MockResponse {
    fn default() -> Self {
        Self::new()
    }
}

/// Standard reason phrase for a status code, empty when unknown.
#[must_use]
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        409 => "Conflict",
        411 => "Length Required",
        413 => "Content Too Large",
        415 => "Unsupported Media Type",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => match status / 100 {
            1 => "Informational",
            2 => "Success",
            3 => "Redirection",
            4 => "Client Error",
            5 => "Server Error",
            _ => "",
        },
    }
}
