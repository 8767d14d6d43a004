//! Mock server configuration.

use core::time::Duration;
use derive_more::From;
use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds};

#[derive(Debug, From)]
pub enum ConfigError {
    #[from(ignore)]
    IOError(std::io::Error),

    #[from(ignore)]
    DeserializationFailed(toml::de::Error),
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::DeserializationFailed(value)
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::IOError(value)
    }
}

impl std::error::Error for ConfigError {}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// What a worker does when a request arrives, the queue is empty and no
/// fallback dispatcher is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyQueuePolicy {
    /// Wait up to `response_timeout` for a response to be enqueued.
    Block,
    /// Answer `200 OK` with an empty body.
    RespondEmpty,
}

/// Configuration for a [`crate::MockServer`].
///
/// Every field has a default, so a TOML file only needs the values it changes:
///
/// ```toml
/// port = 0
/// response_timeout = 250
/// empty_queue_policy = "respond_empty"
/// ```
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MockServerConfig {
    /// Interface the listener binds to.
    pub host: String,
    /// Port to bind; 0 lets the OS pick one.
    pub port: u16,
    /// Bound on the empty-queue wait under [`EmptyQueuePolicy::Block`].
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub response_timeout: Duration,
    /// Timeout used by `take_request_default`.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub take_timeout: Duration,
    /// How often the acceptor re-checks the shutdown flag.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub accept_poll_interval: Duration,
    pub empty_queue_policy: EmptyQueuePolicy,
    pub max_line_length: usize,
    pub max_header_count: usize,
    pub max_body_size: usize,
}

impl MockServerConfig {
    /// Creates a configuration with default values.
    ///
    /// Defaults:
    /// - `host`: `127.0.0.1`, `port`: 0
    /// - `response_timeout` and `take_timeout`: 5s
    /// - `accept_poll_interval`: 10ms
    /// - `empty_queue_policy`: [`EmptyQueuePolicy::Block`]
    /// - `max_line_length`: 8 KiB, `max_header_count`: 256, `max_body_size`: 16 MiB
    #[must_use]
    pub fn new() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            response_timeout: Duration::from_secs(5),
            take_timeout: Duration::from_secs(5),
            accept_poll_interval: Duration::from_millis(10),
            empty_queue_policy: EmptyQueuePolicy::Block,
            max_line_length: 8 * 1024,
            max_header_count: 256,
            max_body_size: 16 * 1024 * 1024,
        }
    }

    /// Loads a configuration from a TOML file.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the file cannot be read or parsed.
    pub fn from_path<V: Into<std::path::PathBuf>>(target: V) -> ConfigResult<Self> {
        let target_path = target.into();
        let config_content = std::fs::read_to_string(target_path)?;
        Self::from_toml_str(&config_content)
    }

    /// Parses a configuration from TOML text.
    ///
    /// # Errors
    /// Returns [`ConfigError::DeserializationFailed`] on invalid TOML or values.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config_obj: Self = toml::from_str(content)?;
        Ok(config_obj)
    }

    #[must_use]
    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    #[must_use]
    pub fn take_timeout(mut self, timeout: Duration) -> Self {
        self.take_timeout = timeout;
        self
    }

    #[must_use]
    pub fn accept_poll_interval(mut self, interval: Duration) -> Self {
        self.accept_poll_interval = interval;
        self
    }

    #[must_use]
    pub fn empty_queue_policy(mut self, policy: EmptyQueuePolicy) -> Self {
        self.empty_queue_policy = policy;
        self
    }

    #[must_use]
    pub fn max_line_length(mut self, length: usize) -> Self {
        self.max_line_length = length;
        self
    }

    #[must_use]
    pub fn max_header_count(mut self, count: usize) -> Self {
        self.max_header_count = count;
        self
    }

    #[must_use]
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
