//! HTTP/1.1 request parser.
//!
//! WHY: The recorder must hold a byte-accurate copy of what a client sent, so the
//! parser keeps header casing and order and reassembles bodies exactly as framed.
//!
//! WHAT: [`RequestParser`] reads one request at a time from any [`BufRead`],
//! moving through [`ParseState`] and looping back to
//! [`ParseState::AwaitRequestLine`] for the next request on a kept-alive
//! connection.
//!
//! HOW: Line oriented reads bounded by [`ParseLimits`] for the request line,
//! headers and chunk-size lines, `read_exact` for body payloads.

use std::io::{BufRead, Read};

use crate::config::MockServerConfig;
use crate::errors::{HttpParseError, HttpParseResult};
use crate::headers::Headers;

const SUPPORTED_VERSIONS: &[&str] = &["HTTP/1.1", "HTTP/1.0"];

/// Bounds applied while reading a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseLimits {
    pub max_line_length: usize,
    pub max_header_count: usize,
    pub max_body_size: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self::from(&MockServerConfig::default())
    }
}

impl From<&MockServerConfig> for ParseLimits {
    fn from(config: &MockServerConfig) -> Self {
        Self {
            max_line_length: config.max_line_length,
            max_header_count: config.max_header_count,
            max_body_size: config.max_body_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    None,
    Fixed(usize),
    Chunked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    AwaitRequestLine,
    ReadingHeaders,
    ReadingBody(BodyFraming),
    RequestComplete,
}

/// A fully read request, before the recorder stamps it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// Sizes of each data chunk when the body was chunked.
    pub chunk_sizes: Vec<usize>,
}

impl ParsedRequest {
    /// Whether the client asked for the connection to end after this exchange.
    #[must_use]
    pub fn wants_close(&self) -> bool {
        if self.headers.has_token("Connection", "close") {
            return true;
        }
        self.version == "HTTP/1.0" && !self.headers.has_token("Connection", "keep-alive")
    }
}

pub struct RequestParser<R: BufRead> {
    reader: R,
    limits: ParseLimits,
    state: ParseState,
}

impl<R: BufRead> RequestParser<R> {
    pub fn new(reader: R, limits: ParseLimits) -> Self {
        Self {
            reader,
            limits,
            state: ParseState::AwaitRequestLine,
        }
    }

    #[must_use]
    pub fn state(&self) -> ParseState {
        self.state
    }

    /// Reads the next request.
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly before
    /// sending another request line.
    ///
    /// # Errors
    /// Returns [`HttpParseError`] for malformed framing, exceeded limits, or a
    /// connection that ends mid-request.
    pub fn next_request(&mut self) -> HttpParseResult<Option<ParsedRequest>> {
        self.state = ParseState::AwaitRequestLine;

        let request_line = loop {
            match self.read_text_line()? {
                None => return Ok(None),
                // Stray CRLFs between pipelined requests are tolerated.
                Some(line) if line.is_empty() => {}
                Some(line) => break line,
            }
        };

        let (method, target, version) = Self::parse_request_line(&request_line)?;
        tracing::debug!("RequestLine: {method} {target} {version}");

        self.state = ParseState::ReadingHeaders;
        let headers = self.read_headers()?;

        let framing = Self::body_framing(&headers, self.limits)?;
        self.state = ParseState::ReadingBody(framing);
        tracing::debug!("BodyFraming: {:?}", framing);

        let (body, chunk_sizes) = match framing {
            BodyFraming::None => (Vec::new(), Vec::new()),
            BodyFraming::Fixed(length) => {
                let mut body = vec![0u8; length];
                self.reader.read_exact(&mut body)?;
                (body, Vec::new())
            }
            BodyFraming::Chunked => self.read_chunked_body()?,
        };

        self.state = ParseState::RequestComplete;

        Ok(Some(ParsedRequest {
            method,
            target,
            version,
            headers,
            body,
            chunk_sizes,
        }))
    }

    fn parse_request_line(line: &str) -> HttpParseResult<(String, String, String)> {
        let parts: Vec<&str> = line.split(' ').collect();
        let [method, target, version] = parts[..] else {
            return Err(HttpParseError::InvalidRequestLine(line.to_string()));
        };

        if method.is_empty() || !method.bytes().all(is_token_byte) {
            return Err(HttpParseError::InvalidMethod(method.to_string()));
        }

        if target.is_empty() {
            return Err(HttpParseError::InvalidRequestLine(line.to_string()));
        }

        if !version.starts_with("HTTP/") {
            return Err(HttpParseError::InvalidRequestLine(line.to_string()));
        }

        if !SUPPORTED_VERSIONS.contains(&version) {
            return Err(HttpParseError::UnsupportedVersion(version.to_string()));
        }

        Ok((method.to_string(), target.to_string(), version.to_string()))
    }

    fn read_headers(&mut self) -> HttpParseResult<Headers> {
        let mut headers = Headers::new();

        loop {
            let line = self.read_line()?.ok_or(HttpParseError::UnexpectedEof)?;
            if line.is_empty() {
                break;
            }

            tracing::debug!("HeaderLine: {:?}", String::from_utf8_lossy(&line));

            if line.starts_with(b" ") || line.starts_with(b"\t") {
                return Err(HttpParseError::HeaderFoldingNotSupported);
            }

            let Some(colon) = line.iter().position(|b| *b == b':') else {
                return Err(HttpParseError::InvalidHeaderLine(
                    String::from_utf8_lossy(&line).into_owned(),
                ));
            };
            let (name, value) = (&line[..colon], &line[colon + 1..]);

            if name.is_empty() || !name.iter().copied().all(is_token_byte) {
                return Err(HttpParseError::InvalidHeaderName(
                    String::from_utf8_lossy(name).into_owned(),
                ));
            }

            if headers.len() >= self.limits.max_header_count {
                return Err(HttpParseError::TooManyHeaders(self.limits.max_header_count));
            }

            // token bytes are ASCII
            let name = String::from_utf8_lossy(name).into_owned();
            headers.add(name, decode_field_value(trim_whitespace(value)));
        }

        Ok(headers)
    }

    fn body_framing(headers: &Headers, limits: ParseLimits) -> HttpParseResult<BodyFraming> {
        let transfer_encodings = headers.get_all("Transfer-Encoding");
        let content_lengths = headers.get_all("Content-Length");

        if !transfer_encodings.is_empty() {
            if !content_lengths.is_empty() {
                return Err(HttpParseError::BothTransferEncodingAndContentLength);
            }

            let codings: Vec<&str> = transfer_encodings
                .iter()
                .copied()
                .flat_map(|value| value.split(','))
                .map(str::trim)
                .filter(|coding| !coding.is_empty())
                .collect();

            return match codings[..] {
                [coding] if coding.eq_ignore_ascii_case("chunked") => Ok(BodyFraming::Chunked),
                _ => Err(HttpParseError::UnsupportedTransferEncoding(
                    transfer_encodings.join(", "),
                )),
            };
        }

        let mut length: Option<usize> = None;
        for value in content_lengths.iter().copied().flat_map(|value| value.split(',')) {
            let value = value.trim();
            if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
                return Err(HttpParseError::InvalidContentLength(value.to_string()));
            }
            let parsed: usize = value
                .parse()
                .map_err(|_| HttpParseError::InvalidContentLength(value.to_string()))?;

            match length {
                Some(existing) if existing != parsed => {
                    return Err(HttpParseError::ConflictingContentLength)
                }
                _ => length = Some(parsed),
            }
        }

        match length {
            None => Ok(BodyFraming::None),
            Some(size) if size > limits.max_body_size => {
                Err(HttpParseError::BodyTooLarge(limits.max_body_size))
            }
            Some(size) => Ok(BodyFraming::Fixed(size)),
        }
    }

    fn read_chunked_body(&mut self) -> HttpParseResult<(Vec<u8>, Vec<usize>)> {
        let mut body = Vec::new();
        let mut chunk_sizes = Vec::new();

        loop {
            let size_line = self
                .read_text_line()?
                .ok_or(HttpParseError::UnexpectedEof)?;
            let size = parse_chunk_size(&size_line)?;

            if size == 0 {
                // trailers are read and dropped
                loop {
                    let trailer = self.read_line()?.ok_or(HttpParseError::UnexpectedEof)?;
                    if trailer.is_empty() {
                        break;
                    }
                    tracing::debug!("Dropping trailer: {:?}", String::from_utf8_lossy(&trailer));
                }
                break;
            }

            let max_body_size = self.limits.max_body_size;
            let total = body
                .len()
                .checked_add(size)
                .filter(|total| *total <= max_body_size)
                .ok_or(HttpParseError::BodyTooLarge(max_body_size))?;

            let start = body.len();
            body.resize(total, 0);
            self.reader.read_exact(&mut body[start..])?;
            chunk_sizes.push(size);

            match self.read_line()? {
                Some(ending) if ending.is_empty() => {}
                Some(_) => return Err(HttpParseError::InvalidChunkEnding),
                None => return Err(HttpParseError::UnexpectedEof),
            }
        }

        Ok((body, chunk_sizes))
    }

    /// Reads a line that must be UTF-8: the request line and chunk-size lines.
    fn read_text_line(&mut self) -> HttpParseResult<Option<String>> {
        match self.read_line()? {
            Some(line) => Ok(Some(String::from_utf8(line)?)),
            None => Ok(None),
        }
    }

    /// Reads one line without its terminator. `None` means EOF before any byte.
    fn read_line(&mut self) -> HttpParseResult<Option<Vec<u8>>> {
        let max = self.limits.max_line_length;
        let mut buffer = Vec::new();

        // room for the line, its CR and its LF
        let read = (&mut self.reader)
            .take(max as u64 + 2)
            .read_until(b'\n', &mut buffer)?;

        if read == 0 {
            return Ok(None);
        }

        if buffer.last() != Some(&b'\n') {
            if buffer.len() >= max + 2 {
                return Err(HttpParseError::LineTooLong(max));
            }
            return Err(HttpParseError::UnexpectedEof);
        }

        buffer.pop();
        if buffer.last() == Some(&b'\r') {
            buffer.pop();
        }

        if buffer.len() > max {
            return Err(HttpParseError::LineTooLong(max));
        }

        Ok(Some(buffer))
    }
}

fn parse_chunk_size(line: &str) -> HttpParseResult<usize> {
    let size_octet = line.split(';').next().unwrap_or_default().trim();

    if size_octet.is_empty() || !size_octet.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(HttpParseError::InvalidChunkSize(line.to_string()));
    }

    usize::from_str_radix(size_octet, 16)
        .map_err(|_| HttpParseError::InvalidChunkSize(line.to_string()))
}

fn trim_whitespace(mut value: &[u8]) -> &[u8] {
    while let [b' ' | b'\t', rest @ ..] = value {
        value = rest;
    }
    while let [rest @ .., b' ' | b'\t'] = value {
        value = rest;
    }
    value
}

/// Field values are kept as UTF-8 when they are valid UTF-8, otherwise each
/// byte maps to the ISO-8859-1 character with the same code point (`obs-text`).
fn decode_field_value(value: &[u8]) -> String {
    match std::str::from_utf8(value) {
        Ok(text) => text.to_string(),
        Err(_) => value.iter().copied().map(char::from).collect(),
    }
}

/// RFC 9110 `tchar`.
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}
