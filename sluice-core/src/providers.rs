//! Provider bundle trait for simplified type parameters.
//!
//! Bundling the provider types into a single [`Providers`] parameter keeps
//! downstream signatures at one generic instead of one per provider.

use crate::{TaskProvider, TimeProvider, TokioTaskProvider, TokioTimeProvider};

/// Bundle of the provider types for a runtime environment.
///
/// The trait uses associated types to preserve type information at compile
/// time without runtime dispatch.
pub trait Providers: Clone + 'static {
    /// Time provider type for sleeps and elapsed-time queries.
    type Time: TimeProvider + Clone + 'static;

    /// Task provider type for spawning local tasks.
    type Task: TaskProvider + Clone + 'static;

    /// Get the time provider instance.
    fn time(&self) -> &Self::Time;

    /// Get the task provider instance.
    fn task(&self) -> &Self::Task;
}

/// Production providers using the Tokio runtime.
#[derive(Clone)]
pub struct TokioProviders {
    time: TokioTimeProvider,
    task: TokioTaskProvider,
}

impl TokioProviders {
    /// Create a new production providers bundle.
    pub fn new() -> Self {
        Self {
            time: TokioTimeProvider::new(),
            task: TokioTaskProvider,
        }
    }
}

impl Default for TokioProviders {
    fn default() -> Self {
        Self::new()
    }
}

impl Providers for TokioProviders {
    type Time = TokioTimeProvider;
    type Task = TokioTaskProvider;

    fn time(&self) -> &Self::Time {
        &self.time
    }

    fn task(&self) -> &Self::Task {
        &self.task
    }
}
