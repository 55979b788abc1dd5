//! Transport Configuration
//!
//! Endpoint and reconnection settings for the job-server link.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::backoff::RetryPolicy;

/// Default job-server endpoint
pub const DEFAULT_URL: &str = "ws://localhost:8000/ws";

/// Transport configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Endpoint URL (`ws://` or `wss://`)
    pub url: String,

    /// Maximum reconnection attempts after an unclean close
    ///
    /// Once exhausted the transport stays CLOSED until `connect()` is
    /// called again.
    pub max_retries: u32,

    /// Delay before the first reconnection attempt in milliseconds
    ///
    /// Attempt `n` (0-based) waits `initial_delay_ms * 2^n`.
    pub initial_delay_ms: u64,

    /// Connection timeout in milliseconds
    ///
    /// A connect attempt that exceeds this is treated as an unclean close.
    pub connect_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            max_retries: 5,
            initial_delay_ms: 1000,
            connect_timeout_ms: 5000,
        }
    }
}

impl TransportConfig {
    /// Create a configuration for the given endpoint with default retry settings
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the retry budget
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the initial reconnect delay
    #[must_use]
    pub fn with_initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = ms;
        self
    }

    /// Set the connect timeout
    #[must_use]
    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Reconnection policy derived from this configuration
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
        }
    }

    /// Connect timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Whether the URL uses a websocket scheme
    pub fn has_websocket_scheme(&self) -> bool {
        self.url.starts_with("ws://") || self.url.starts_with("wss://")
    }
}
