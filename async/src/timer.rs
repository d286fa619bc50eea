//! One-shot timers with an exclusive fire-or-cancel outcome.
//!
//! A [`Timer`] runs its callback at most once. Whoever moves the state out of
//! `Pending` first wins: either the timer task (which then runs the callback)
//! or a call to [`Timer::cancel`] (which then drops the callback unrun).
//! Losing the race is reported to the caller, never resolved by waiting.
//!
//! ```text
//!              deadline reached              cancel()
//!   Fired  <─────────────────────  Pending  ──────────>  Cancelled
//! ```

use super::*;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[repr(usize)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum TimerState {
    Pending = 0,
    Fired = 1,
    Cancelled = 2,
}

impl TimerState {
    #[inline]
    const fn from_usize(value: usize) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::Fired,
            2 => Self::Cancelled,
            _ => panic!("invalid TimerState value"),
        }
    }
}

struct Shared {
    state: AtomicUsize,
    cancel: CancellationToken,
}

impl Shared {
    #[inline]
    fn load_state(&self) -> TimerState {
        TimerState::from_usize(self.state.load(Ordering::Acquire))
    }

    /// Leaves `Pending` for `to`, returning false if another party already did.
    #[inline]
    fn resolve(&self, to: TimerState) -> bool {
        self.state
            .compare_exchange(
                TimerState::Pending as usize,
                to as usize,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }
}

/// Handle to a scheduled callback.
///
/// Clones share the same timer.
#[derive(Clone)]
pub struct Timer {
    shared: Arc<Shared>,
    deadline: ::time::OffsetDateTime,
}

impl Timer {
    /// Schedules `on_fire` to run on `pool` at `deadline`.
    ///
    /// A deadline in the past fires as soon as the task is polled. If the pool
    /// shuts down first, the callback is dropped without running.
    pub fn schedule_at<F>(pool: &TaskPool, deadline: ::time::OffsetDateTime, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let shared = Arc::new(Shared {
            state: AtomicUsize::new(TimerState::Pending as usize),
            cancel: pool.child_token(),
        });

        let task = shared.clone();
        let timer_task = async move {
            tokio::select! {
                _ = crate::time::sleep_until(deadline) => {
                    if task.resolve(TimerState::Fired) {
                        on_fire();
                    } else {
                        trace!("Timer due at {deadline} was cancelled as it fired");
                    }
                }
                _ = task.cancel.cancelled() => {
                    trace!("Timer due at {deadline} cancelled");
                }
            }
        };

        #[cfg(feature = "instrument")]
        let timer_task = tracing::Instrument::instrument(
            timer_task,
            tracing::trace_span!(parent: None, "timer", %deadline),
        );
        pool.spawn(timer_task);

        Self { shared, deadline }
    }

    /// Schedules `on_fire` to run on `pool` after `delay`.
    pub fn schedule_in<F>(pool: &TaskPool, delay: ::time::Duration, on_fire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::schedule_at(pool, ::time::OffsetDateTime::now_utc() + delay, on_fire)
    }

    /// Cancels the timer.
    ///
    /// Returns false if the timer had already fired or been cancelled, in
    /// which case the callback has run (or will run) exactly as before.
    pub fn cancel(&self) -> bool {
        if self.shared.resolve(TimerState::Cancelled) {
            self.shared.cancel.cancel();
            true
        } else {
            trace!(
                "Timer due at {} is already {:?}",
                self.deadline,
                self.shared.load_state()
            );
            false
        }
    }

    pub fn is_pending(&self) -> bool {
        self.shared.load_state() == TimerState::Pending
    }

    pub fn has_fired(&self) -> bool {
        self.shared.load_state() == TimerState::Fired
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.load_state() == TimerState::Cancelled
    }

    pub fn deadline(&self) -> ::time::OffsetDateTime {
        self.deadline
    }
}

impl core::fmt::Debug for Timer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Timer")
            .field("deadline", &self.deadline)
            .field("state", &self.shared.load_state())
            .finish()
    }
}
