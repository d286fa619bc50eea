use super::*;

/// A router that never forwards anything.
///
/// Bundles are still received, delivered to local registrations and expired.
#[derive(Default)]
pub struct NullRouter {}

impl NullRouter {
    pub fn new() -> Self {
        Default::default()
    }
}

impl Router for NullRouter {
    fn name(&self) -> &str {
        "null"
    }

    fn handle_event(&mut self, event: &event::Event, _core: &mut daemon::DaemonCore) {
        trace!("Null router ignoring {} event", event.name());
    }

    fn routing_state(&self, out: &mut String) {
        out.push_str("null router: no routes\n");
    }
}
