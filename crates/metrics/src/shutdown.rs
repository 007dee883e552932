//! Application-shutdown hook registration.

use {
    futures::future::BoxFuture,
    std::{
        future::Future,
        sync::{Arc, Mutex, PoisonError},
    },
    tracing::debug,
};

/// Collects teardown futures to run once at application shutdown.
///
/// The registrar adds one hook per started exporter; the host
/// application calls [`run`](Self::run) during teardown. Hooks run in
/// reverse registration order. Clones share the same hook list.
#[derive(Clone, Default)]
pub struct ShutdownHooks {
    hooks: Arc<Mutex<Vec<BoxFuture<'static, ()>>>>,
}

impl ShutdownHooks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a hook to run at shutdown.
    pub fn add_hook<F>(&self, hook: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::pin(hook));
    }

    /// Runs and clears every registered hook, latest first.
    pub async fn run(&self) {
        let hooks = std::mem::take(&mut *self.hooks.lock().unwrap_or_else(PoisonError::into_inner));
        let count = hooks.len();
        for hook in hooks.into_iter().rev() {
            hook.await;
        }
        debug!(count, "shutdown hooks completed");
    }
}
