//! Async primitives shared by the dtnd daemon.
//!
//! - [`TaskPool`]: a group of cancellable tasks with a graceful shutdown
//! - [`Timer`]: a one-shot deadline whose callback either fires or is cancelled, never both
//! - [`time::sleep`]: a sleep taking a [`time::Duration`]

use tracing::trace;

pub mod cancellation_token;
pub mod task_pool;
pub mod time;
pub mod timer;

pub use cancellation_token::CancellationToken;
pub use task_pool::TaskPool;
pub use timer::Timer;
