//! # Sluice
//!
//! A correlated, bounded, retrying request/response pipe for single-threaded
//! async runtimes.
//!
//! The pipe turns an unordered, asynchronous message transport into a
//! promise-style request API: callers hand it a message and get back a future
//! that resolves with the matching reply or fails with a taxonomised error.
//! The pipe owns the correlation table, admission control, FIFO queueing,
//! per-attempt timeouts, the retry policy, and an orderly flush/drain
//! lifecycle. It never touches the transport itself: outbound envelopes go to
//! a user-registered sender, inbound envelopes come back through the
//! [`ReplyReceiver`] handle.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │              Application Code                    │
//! │        send(message) -> ReplyFuture              │
//! ├──────────────────────────────────────────────────┤
//! │     RequestPipe (correlation + admission)        │
//! │     • Monotonic request ids, pending map         │
//! │     • max_pending slots, FIFO overflow queue     │
//! │     • Per-attempt timers, immediate retries      │
//! │     • flush() drains both sets                   │
//! ├──────────────────────────────────────────────────┤
//! │     User transport (caller-owned)                │
//! │     • sender: Envelope<Req> -> SendFuture        │
//! │     • calls ReplyReceiver::deliver on replies    │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use sluice::{PipeConfig, RequestPipe, TokioProviders};
//!
//! let pipe: RequestPipe<Request, Response, _> =
//!     RequestPipe::new(TokioProviders::new(), PipeConfig::new(8));
//!
//! // Wire the pipe to a transport.
//! let receiver = pipe.receiver();
//! pipe.set_sender(move |envelope| transport.push(envelope));
//! // ... transport invokes receiver.deliver(envelope) when replies arrive.
//!
//! let reply = pipe.send(request).expect("a message was given").await?;
//! ```
//!
//! The pipe assumes a serialised event-driven runtime: a tokio
//! `current_thread` runtime with a `LocalSet`. All shared state is protected
//! by the single-executor invariant; there are no locks.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

// Re-export core provider types for convenience
pub use sluice_core::{
    Providers, TaskProvider, TimeError, TimeProvider, TokioProviders, TokioTaskProvider,
    TokioTimeProvider,
};

/// Pipe configuration.
pub mod config;

/// Correlation ids and the request/reply envelope.
pub mod envelope;

/// Error types for pipe operations.
pub mod error;

/// Reply and flush futures.
pub mod futures;

/// The pipe state machine.
pub mod pipe;

pub use config::PipeConfig;
pub use envelope::{Envelope, RequestId, RequestIdFactory};
pub use error::{PipeError, SendFailure};
pub use futures::{FlushFuture, ReplyFuture};
pub use pipe::{ReplyReceiver, RequestPipe, SendFuture};
