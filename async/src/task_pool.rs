//! A group of cancellable tasks with graceful shutdown.
//!
//! Shutdown happens in three steps: the shared cancellation token is
//! cancelled, the tracker is closed so no new task can join, and the caller
//! waits until every tracked task has returned.

/// Manages a group of cancellable tasks.
///
/// The daemon keeps one pool for its timers and one per storage worker, so
/// that shutting the daemon down waits for every outstanding callback.
pub struct TaskPool {
    cancel_token: tokio_util::sync::CancellationToken,
    task_tracker: tokio_util::task::TaskTracker,
}

impl TaskPool {
    pub fn new() -> Self {
        Self {
            cancel_token: tokio_util::sync::CancellationToken::new(),
            task_tracker: tokio_util::task::TaskTracker::new(),
        }
    }

    /// The token cancelled by [`shutdown()`](TaskPool::shutdown).
    pub fn cancel_token(&self) -> &tokio_util::sync::CancellationToken {
        &self.cancel_token
    }

    /// A token cancelled with the pool, but which can also be cancelled on its own.
    pub fn child_token(&self) -> tokio_util::sync::CancellationToken {
        self.cancel_token.child_token()
    }

    /// Spawns a task tracked by this pool.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(&self, task: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: std::future::Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.task_tracker.spawn(task)
    }

    /// Cancels all tasks and waits for them to complete.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Number of tasks that have not yet completed.
    pub fn len(&self) -> usize {
        self.task_tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.task_tracker.is_empty()
    }
}

impl Default for TaskPool {
    fn default() -> Self {
        Self::new()
    }
}
