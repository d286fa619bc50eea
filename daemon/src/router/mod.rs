//! Routing policy interface.
//!
//! A router observes every event after the daemon has processed it (unless
//! the event is daemon-only) and decides where bundles go. It acts only
//! through the [`daemon::DaemonCore`] it is handed.

use super::*;

mod null;

pub use null::NullRouter;

pub trait Router: Send {
    fn name(&self) -> &str;

    /// Called once on the daemon loop, before any event is processed.
    fn initialize(&mut self, _core: &mut daemon::DaemonCore) {}

    fn handle_event(&mut self, event: &event::Event, core: &mut daemon::DaemonCore);

    /// Appends a human-readable description of the routing state to `out`.
    fn routing_state(&self, out: &mut String);
}
