//! Time provider abstraction.
//!
//! A unified interface for time operations so that per-request timers can run
//! against real wall-clock time in production and against controlled time in
//! tests.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during time operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    /// The time provider has been shut down and is no longer accessible.
    ///
    /// A sleep that fails this way must be treated as cancelled, never as
    /// elapsed.
    #[error("time provider shut down")]
    Shutdown,
}

/// Provider trait for time operations.
///
/// `now()` returns elapsed time since some fixed origin (provider creation
/// for the Tokio implementation); it is only meaningful for comparisons and
/// durations, never as a wall-clock timestamp.
#[async_trait(?Send)]
pub trait TimeProvider: Clone {
    /// Sleep for the specified duration.
    async fn sleep(&self, duration: Duration) -> Result<(), TimeError>;

    /// Get the current time as elapsed duration since the provider's origin.
    fn now(&self) -> Duration;
}

/// Real time provider using Tokio's time facilities.
///
/// Under `tokio::time::pause` (tests), sleeps advance with the paused clock,
/// which keeps timeout behaviour deterministic.
#[derive(Debug, Clone)]
pub struct TokioTimeProvider {
    /// Start time for calculating elapsed duration
    start_time: std::time::Instant,
}

impl TokioTimeProvider {
    /// Create a new Tokio time provider.
    pub fn new() -> Self {
        Self {
            start_time: std::time::Instant::now(),
        }
    }
}

impl Default for TokioTimeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl TimeProvider for TokioTimeProvider {
    async fn sleep(&self, duration: Duration) -> Result<(), TimeError> {
        tokio::time::sleep(duration).await;
        Ok(())
    }

    fn now(&self) -> Duration {
        self.start_time.elapsed()
    }
}
