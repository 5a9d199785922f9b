//! Task spawning abstraction for single-threaded environments.

use std::future::Future;
use tokio::task::JoinHandle;

/// Provider for spawning local tasks in a single-threaded context.
///
/// Tasks are named for diagnostics; the name has no scheduling effect.
pub trait TaskProvider: Clone {
    /// Spawn a named task that runs on the current thread.
    fn spawn_task<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + 'static;
}

/// Tokio-based task provider using `spawn_local`.
///
/// Requires a `tokio::task::LocalSet` (or a local runtime) to be driving the
/// current thread.
#[derive(Clone, Debug)]
pub struct TokioTaskProvider;

impl TaskProvider for TokioTaskProvider {
    fn spawn_task<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + 'static,
    {
        let task_name = name.to_string();
        tokio::task::spawn_local(async move {
            tracing::trace!(task = %task_name, "task starting");
            future.await;
            tracing::trace!(task = %task_name, "task completed");
        })
    }
}
