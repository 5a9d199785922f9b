//! Configuration for pipe admission, retry, and timeout behaviour.

use std::time::Duration;

/// Configuration for a [`RequestPipe`](crate::RequestPipe).
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Maximum number of concurrently pending requests.
    ///
    /// Values below 1 are treated as 1.
    pub max_pending: usize,

    /// Retries per request after the first attempt.
    ///
    /// A request is attempted at most `max_retries + 1` times.
    pub max_retries: u32,

    /// Per-attempt timeout for pending requests.
    ///
    /// `None` disables timeouts. Each attempt (including retries) gets a
    /// fresh timer.
    pub pending_timeout: Option<Duration>,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            max_pending: 1,
            max_retries: 0,
            pending_timeout: None,
        }
    }
}

impl PipeConfig {
    /// Create a configuration with the given pending capacity.
    pub fn new(max_pending: usize) -> Self {
        Self {
            max_pending,
            ..Self::default()
        }
    }

    /// Set the number of retries per request.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Enable a per-attempt timeout for pending requests.
    pub fn with_pending_timeout(mut self, timeout: Duration) -> Self {
        self.pending_timeout = Some(timeout);
        self
    }
}
