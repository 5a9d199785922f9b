//! # Sluice Core
//!
//! Runtime environment abstractions for the sluice request pipe.
//!
//! The pipe never talks to the clock or the task scheduler directly; it goes
//! through the provider traits in this crate so that timers and background
//! work are testable and environment-independent.
//!
//! | Provider | Purpose |
//! |----------|---------|
//! | [`TimeProvider`] | Sleeping and elapsed-time queries |
//! | [`TaskProvider`] | Spawning named local tasks |
//! | [`Providers`] | Bundle of both, as a single type parameter |
//!
//! Production implementations ([`TokioTimeProvider`], [`TokioTaskProvider`],
//! [`TokioProviders`]) target a tokio current-thread runtime with a
//! `LocalSet`; all spawned tasks are `spawn_local` and nothing requires
//! `Send`.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod providers;
mod task;
mod time;

pub use providers::{Providers, TokioProviders};
pub use task::{TaskProvider, TokioTaskProvider};
pub use time::{TimeError, TimeProvider, TokioTimeProvider};
