use chrono::{DateTime, Utc};

use crate::headers::Headers;
use crate::parser::ParsedRequest;

/// A request as the mock server received it.
///
/// Built by the recorder when the request is appended to its log and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub(crate) method: String,
    pub(crate) target: String,
    pub(crate) version: String,
    pub(crate) headers: Headers,
    pub(crate) body: Vec<u8>,
    pub(crate) chunk_sizes: Vec<usize>,
    pub(crate) sequence_number: u64,
    pub(crate) connection_id: u64,
    pub(crate) connection_sequence: u64,
    pub(crate) received_at: DateTime<Utc>,
}

impl RecordedRequest {
    pub(crate) fn new(
        parsed: ParsedRequest,
        sequence_number: u64,
        connection_id: u64,
        connection_sequence: u64,
    ) -> Self {
        Self {
            method: parsed.method,
            target: parsed.target,
            version: parsed.version,
            headers: parsed.headers,
            body: parsed.body,
            chunk_sizes: parsed.chunk_sizes,
            sequence_number,
            connection_id,
            connection_sequence,
            received_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The request target, path plus query, exactly as sent.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.target
            .split_once('?')
            .map_or(self.target.as_str(), |(path, _)| path)
    }

    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, query)| query)
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// e.g. `GET /index.html HTTP/1.1`
    #[must_use]
    pub fn request_line(&self) -> String {
        format!("{} {} {}", self.method, self.target, self.version)
    }

    #[must_use]
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Last value of the named header, looked up without regard to case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    #[must_use]
    pub fn body_size(&self) -> usize {
        self.body.len()
    }

    /// # Errors
    /// Returns the UTF-8 error when the body is not valid text.
    pub fn body_utf8(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }

    #[must_use]
    pub fn chunk_sizes(&self) -> &[usize] {
        &self.chunk_sizes
    }

    /// Position of this request among all requests the server received.
    #[must_use]
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    #[must_use]
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Position of this request on its connection; 0 for the first.
    #[must_use]
    pub fn connection_sequence(&self) -> u64 {
        self.connection_sequence
    }

    #[must_use]
    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Whether the client tried to switch to cleartext HTTP/2.
    #[must_use]
    pub fn is_h2c_upgrade(&self) -> bool {
        self.headers.has_token("Upgrade", "h2c")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorded(target: &str, headers: &[(&str, &str)], body: &[u8]) -> RecordedRequest {
        let parsed = ParsedRequest {
            method: "GET".into(),
            target: target.into(),
            version: "HTTP/1.1".into(),
            headers: headers.iter().copied().collect(),
            body: body.to_vec(),
            chunk_sizes: Vec::new(),
        };
        RecordedRequest::new(parsed, 3, 1, 0)
    }

    #[test]
    fn splits_path_and_query() {
        let request = recorded("/search?q=rust&page=2", &[], b"");
        assert_eq!(request.path(), "/search");
        assert_eq!(request.query(), Some("q=rust&page=2"));
        assert_eq!(request.request_line(), "GET /search?q=rust&page=2 HTTP/1.1");

        let plain = recorded("/", &[], b"");
        assert_eq!(plain.path(), "/");
        assert_eq!(plain.query(), None);
    }

    #[test]
    fn exposes_headers_and_body() {
        let request = recorded(
            "/",
            &[("Upgrade", "h2c"), ("Accept", "text/plain")],
            b"hello",
        );

        assert!(request.is_h2c_upgrade());
        assert_eq!(request.header("accept"), Some("text/plain"));
        assert_eq!(request.header("Secret"), None);
        assert_eq!(request.body_utf8(), Ok("hello"));
        assert_eq!(request.body_size(), 5);
        assert_eq!(request.sequence_number(), 3);
        assert_eq!(request.connection_id(), 1);
        assert_eq!(request.connection_sequence(), 0);
    }
}
