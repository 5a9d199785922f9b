//! Error types for pipe operations.

use thiserror::Error;

/// Cause reported by a sender when outbound delivery fails.
///
/// Callers keep their own error types; the pipe only threads the last cause
/// through to [`PipeError::Send`].
pub type SendFailure = Box<dyn std::error::Error>;

/// Errors surfaced on the reply future returned by `send`.
#[derive(Debug, Error)]
pub enum PipeError {
    /// The request exceeded the configured pending timeout on its current
    /// attempt.
    #[error("request timed out")]
    Timeout,

    /// `send` was called while the pipe was flushing.
    #[error("pipe is flushing, new requests are rejected")]
    FlushInProgress,

    /// The sender failed and retries are exhausted.
    #[error("sender failed after {attempts} attempt(s)")]
    Send {
        /// Total sender invocations spent on the request.
        attempts: u32,
        /// Last underlying cause reported by the sender.
        #[source]
        source: SendFailure,
    },

    /// `send` was called before a sender was registered.
    #[error("no sender registered")]
    SenderMissing,

    /// The pipe was dropped before the reply arrived.
    #[error("pipe closed before reply")]
    Closed,
}
