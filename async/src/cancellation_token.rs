//! Cooperative cancellation signal used by [`TaskPool`](crate::TaskPool) and [`Timer`](crate::Timer).

/// A token for cooperative cancellation of async operations.
///
/// Cancelling a token cancels all of its children, but not its parent.
pub type CancellationToken = tokio_util::sync::CancellationToken;
