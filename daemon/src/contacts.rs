//! Reopens links that drop unexpectedly.
//!
//! AlwaysOn links are opened as soon as they become available. AlwaysOn and
//! OnDemand links that become unavailable for a reason other than the user
//! or idleness are retried with exponential backoff.

use super::*;
use event::{ContactReason, Event, EventKind};
use link::{LinkState, LinkType};
use std::collections::HashMap;

pub(crate) struct ContactManager {
    config: config::LinkRetryConfig,
    reopen_timers: HashMap<Arc<str>, dtnd_async::Timer>,
}

impl ContactManager {
    pub fn new(config: config::LinkRetryConfig) -> Self {
        Self {
            config,
            reopen_timers: HashMap::new(),
        }
    }

    pub fn handle_event(&mut self, event: &Event, core: &mut daemon::DaemonCore) {
        match &event.kind {
            EventKind::LinkAvailable { link, .. } => self.link_available(link, core),
            EventKind::LinkUnavailable { link, reason } => {
                self.link_unavailable(link, *reason, core)
            }
            EventKind::ContactUp { link, .. } => {
                link.set_retry_interval(self.config.min_interval);
            }
            EventKind::LinkDeleted { link } => {
                if let Some(timer) = self.reopen_timers.remove(link.name()) {
                    timer.cancel();
                }
            }
            _ => {}
        }
    }

    fn link_available(&mut self, link: &link::LinkRef, core: &mut daemon::DaemonCore) {
        if let Some(timer) = self.reopen_timers.remove(link.name())
            && !timer.cancel()
            && !timer.has_fired()
        {
            warn!(
                "Can't cancel reopen timer for link {}, it was already cancelled",
                link.name()
            );
        }

        if link.link_type() == LinkType::AlwaysOn && link.state() == LinkState::Available {
            debug!("Opening always-on link {}", link.name());
            core.post(Event::link_state_change(
                link,
                LinkState::Open,
                ContactReason::NoInfo,
            ));
        }
    }

    fn link_unavailable(
        &mut self,
        link: &link::LinkRef,
        reason: ContactReason,
        core: &mut daemon::DaemonCore,
    ) {
        if !matches!(link.link_type(), LinkType::AlwaysOn | LinkType::OnDemand) {
            return;
        }
        if matches!(reason, ContactReason::User | ContactReason::Idle) {
            debug!(
                "Not reopening link {} which closed for {reason}",
                link.name()
            );
            return;
        }

        if let Some(timer) = self.reopen_timers.get(link.name())
            && timer.is_pending()
        {
            error!(
                "Link {} already has a reopen timer due at {}",
                link.name(),
                timer.deadline()
            );
            return;
        }

        let interval = link.retry_interval().max(self.config.min_interval);
        info!(
            "Link {} is unavailable ({reason}), retrying in {interval} seconds",
            link.name()
        );

        let timer = {
            let link = link.clone();
            let events = core.events().clone();
            dtnd_async::Timer::schedule_in(
                core.timers(),
                time::Duration::seconds(interval.min(i64::MAX as u64) as i64),
                move || {
                    let state = link.state();
                    if state == LinkState::Unavailable {
                        events.post(Event::link_state_change(
                            &link,
                            LinkState::Open,
                            ContactReason::Reconnect,
                        ));
                    } else {
                        error!(
                            "Reopen timer fired for link {} which is already {state}",
                            link.name()
                        );
                    }
                },
            )
        };
        self.reopen_timers.insert(link.name_arc(), timer);

        link.set_retry_interval(
            interval
                .saturating_mul(2)
                .min(self.config.max_interval.max(self.config.min_interval)),
        );
    }

    pub fn dump(&self, out: &mut String) {
        use core::fmt::Write;

        let pending: Vec<_> = self
            .reopen_timers
            .iter()
            .filter(|(_, t)| t.is_pending())
            .collect();
        _ = writeln!(out, "{} links waiting to reopen", pending.len());
        for (name, timer) in pending {
            _ = writeln!(out, "\t{name}: at {}", timer.deadline());
        }
    }
}
