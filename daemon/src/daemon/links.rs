use super::*;
use event::ContactReason;
use link::LinkState;

impl DaemonCore {
    /// Returns true if the link was rejected.
    pub(super) fn handle_link_created(&mut self, link: &link::LinkRef) -> bool {
        info!("LINK_CREATED {link}");

        if !self.links.add(link.clone()) {
            error!("Link {} already exists", link.name());
            return true;
        }

        link.set_retry_interval(self.config.link_retry.min_interval);
        if link.link_type().initial_state() == LinkState::Available {
            link.set_state(LinkState::Available);
            self.post(Event::new(EventKind::LinkAvailable {
                link: link.clone(),
                reason: ContactReason::NoInfo,
            }));
        }
        false
    }

    pub(super) fn handle_link_deleted(&mut self, link: &link::LinkRef) {
        info!("LINK_DELETED {}", link.name());

        let state = link.state();
        if state.is_open() || state == LinkState::Opening {
            self.actions.close_link(link);
        }
        link.set_state(LinkState::Unavailable);

        for bundle in link.inflight.snapshot() {
            bundle
                .lock()
                .fwdlog
                .update(link, bundle::ForwardingState::TransmitFailed);
        }
        link.inflight.clear();
        link.queue.clear();

        if self.links.del(link.name()).is_none() {
            error!("Link {} was not in the link table", link.name());
        }
    }

    pub(super) fn handle_link_available(&mut self, link: &link::LinkRef, reason: ContactReason) {
        info!("LINK_AVAILABLE {} ({reason})", link.name());

        if link.state() == LinkState::Unavailable {
            error!("Link {} is available but still UNAVAILABLE", link.name());
        }
    }

    pub(super) fn handle_link_busy(&mut self, link: &link::LinkRef) {
        info!("LINK_BUSY {}", link.name());

        let state = link.state();
        if state != LinkState::Open {
            error!("Link {} reported busy while {state}", link.name());
            return;
        }
        link.set_state(LinkState::Busy);
    }

    /// Returns true if the contact was stale.
    pub(super) fn handle_contact_up(&mut self, link: &link::LinkRef, contact: link::ContactId) -> bool {
        info!("CONTACT_UP {} {contact}", link.name());

        if link.contact() != Some(contact) {
            info!(
                "Ignoring stale {contact} for link {} which has moved on",
                link.name()
            );
            return true;
        }

        let state = link.state();
        if state != LinkState::Opening {
            warn!(
                "Contact {contact} came up on link {} while {state}",
                link.name()
            );
            return true;
        }

        link.set_state(LinkState::Open);
        link.update_stats(|s| s.contacts += 1);
        false
    }

    pub(super) fn handle_link_state_change_request(
        &mut self,
        link: &link::LinkRef,
        requested: LinkState,
        reason: ContactReason,
        contact: Option<link::ContactId>,
    ) {
        let old = link.state();
        info!(
            "LINK_STATE_CHANGE_REQUEST {} {old} -> {requested} ({reason})",
            link.name()
        );

        if contact != link.contact() {
            warn!(
                "Ignoring stale state change request for link {}",
                link.name()
            );
            return;
        }

        match requested {
            LinkState::Unavailable => {
                if old != LinkState::Available {
                    error!(
                        "Can't make link {} UNAVAILABLE while {old}",
                        link.name()
                    );
                    return;
                }
                link.set_state(LinkState::Unavailable);
                self.post_at_head(Event::new(EventKind::LinkUnavailable {
                    link: link.clone(),
                    reason,
                }));
            }
            LinkState::Available => {
                match old {
                    LinkState::Unavailable => link.set_state(LinkState::Available),
                    // Unblocked
                    LinkState::Busy | LinkState::Open => link.set_state(LinkState::Open),
                    LinkState::Available | LinkState::Opening | LinkState::Closing => {
                        error!(
                            "Can't make link {} AVAILABLE while {old}",
                            link.name()
                        );
                        return;
                    }
                }
                self.post_at_head(Event::new(EventKind::LinkAvailable {
                    link: link.clone(),
                    reason,
                }));
            }
            LinkState::Busy => {
                error!(
                    "Link {} can only be made BUSY by its convergence layer",
                    link.name()
                );
            }
            LinkState::Opening | LinkState::Open => {
                // A reconnect attempt may find the link still unavailable
                if old == LinkState::Unavailable {
                    link.set_state(LinkState::Available);
                }
                self.actions.open_link(link);
            }
            LinkState::Closing => {
                if !old.is_open() && old != LinkState::Opening {
                    error!("Can't close link {} while {old}", link.name());
                    return;
                }

                link.set_state(LinkState::Closing);
                if old.is_open() {
                    self.post_at_head(Event::new(EventKind::ContactDown {
                        link: link.clone(),
                        reason,
                    }));
                }
                self.actions.close_link(link);

                if reason == ContactReason::Idle {
                    link.set_state(LinkState::Available);
                } else {
                    link.set_state(LinkState::Unavailable);
                    self.post_at_head(Event::new(EventKind::LinkUnavailable {
                        link: link.clone(),
                        reason,
                    }));
                }
            }
        }
    }
}
