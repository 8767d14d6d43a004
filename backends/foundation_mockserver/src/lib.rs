//! Scriptable mock HTTP/1.1 server for testing HTTP clients.
//!
//! This crate provides:
//! - **[`MockServer`]**: binds an ephemeral loopback port, one worker thread per connection
//! - **Response queue**: canned [`MockResponse`]s answered in FIFO order, with an optional
//!   fallback [`Dispatcher`]
//! - **Request recording**: every request kept as a [`RecordedRequest`] with original header
//!   casing and order, taken back in arrival order with a bounded wait
//! - **Byte-accurate parsing**: `Content-Length` and chunked bodies, keep-alive, h2c upgrade
//!   requests recorded as plain HTTP/1.1
//!
//! # Examples
//!
//! ```rust
//! use std::time::Duration;
//! use foundation_mockserver::{MockResponse, MockServer, MockServerError};
//!
//! let server = MockServer::started().unwrap();
//! server.enqueue(MockResponse::redirect(301, "http://127.0.0.1:1/"));
//! assert_eq!(server.queued_count(), 1);
//!
//! // nothing has connected yet
//! assert!(matches!(
//!     server.take_request(Duration::from_millis(20)),
//!     Err(MockServerError::Timeout(_))
//! ));
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod headers;
pub mod parser;
pub mod recorder;
pub mod request;
pub mod response;
pub mod server;

mod connection;

pub use config::{ConfigError, ConfigResult, EmptyQueuePolicy, MockServerConfig};
pub use dispatcher::{Dispatcher, QueueDispatcher};
pub use errors::{HttpParseError, HttpParseResult, MockServerError, MockServerResult};
pub use headers::{HeaderLine, Headers};
pub use parser::{BodyFraming, ParseLimits, ParseState, ParsedRequest, RequestParser};
pub use recorder::RequestRecorder;
pub use request::RecordedRequest;
pub use response::{reason_phrase, MockResponse, SocketPolicy};
pub use server::MockServer;
