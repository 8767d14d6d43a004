use core::time::Duration;
use derive_more::From;

pub type MockServerResult<T> = std::result::Result<T, MockServerError>;

#[derive(From, Debug)]
pub enum MockServerError {
    /// The listener could not be bound; nothing was left running.
    #[from(ignore)]
    Bind(std::io::Error),

    Protocol(HttpParseError),

    /// A blocking wait (request take or response wait) ran past its bound.
    #[from(ignore)]
    Timeout(Duration),

    /// The server has been stopped.
    Shutdown,

    AlreadyStarted,
    NotStarted,

    InvalidUrl(url::ParseError),

    #[from(ignore)]
    Io(std::io::Error),
}

impl From<std::io::Error> for MockServerError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl std::error::Error for MockServerError {}

impl core::fmt::Display for MockServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

pub type HttpParseResult<T> = std::result::Result<T, HttpParseError>;

#[derive(From, Debug)]
pub enum HttpParseError {
    #[from(ignore)]
    InvalidRequestLine(String),

    #[from(ignore)]
    InvalidMethod(String),

    #[from(ignore)]
    UnsupportedVersion(String),

    #[from(ignore)]
    InvalidHeaderLine(String),

    #[from(ignore)]
    InvalidHeaderName(String),

    HeaderFoldingNotSupported,

    #[from(ignore)]
    InvalidContentLength(String),
    ConflictingContentLength,

    BothTransferEncodingAndContentLength,

    #[from(ignore)]
    UnsupportedTransferEncoding(String),

    #[from(ignore)]
    InvalidChunkSize(String),
    InvalidChunkEnding,

    #[from(ignore)]
    LineTooLong(usize),

    #[from(ignore)]
    TooManyHeaders(usize),

    #[from(ignore)]
    BodyTooLarge(usize),

    UnexpectedEof,
    InvalidUtf8,

    #[from(ignore)]
    ReadFailed(std::io::Error),
}

impl From<std::io::Error> for HttpParseError {
    fn from(value: std::io::Error) -> Self {
        match value.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::UnexpectedEof,
            _ => Self::ReadFailed(value),
        }
    }
}

impl From<std::string::FromUtf8Error> for HttpParseError {
    fn from(_: std::string::FromUtf8Error) -> Self {
        Self::InvalidUtf8
    }
}

impl std::error::Error for HttpParseError {}

impl core::fmt::Display for HttpParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_eof_maps_to_unexpected_eof() {
        let err: HttpParseError =
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "closed").into();
        assert!(matches!(err, HttpParseError::UnexpectedEof));

        let err: HttpParseError =
            std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset").into();
        assert!(matches!(err, HttpParseError::ReadFailed(_)));
    }

    #[test]
    fn parse_errors_lift_into_server_errors() {
        let err: MockServerError = HttpParseError::InvalidChunkEnding.into();
        assert!(matches!(
            err,
            MockServerError::Protocol(HttpParseError::InvalidChunkEnding)
        ));
        assert_eq!(err.to_string(), "Protocol(InvalidChunkEnding)");
    }
}
