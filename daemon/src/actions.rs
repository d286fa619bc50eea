use super::*;

/// Side effects the daemon asks of its collaborators.
///
/// Every call returns immediately. The ones that start asynchronous work
/// (opening links, sending bundles) report the outcome later as events.
pub struct BundleActions {
    store: storage::Store,
    clas: Arc<cla::Registry>,
    events: event::EventSender,
}

impl BundleActions {
    pub(crate) fn new(
        store: storage::Store,
        clas: Arc<cla::Registry>,
        events: event::EventSender,
    ) -> Self {
        Self { store, clas, events }
    }

    pub(crate) fn store(&self) -> &storage::Store {
        &self.store
    }

    fn find_cla(&self, link: &link::Link) -> Option<Arc<dyn cla::ConvergenceLayer>> {
        let cla = self.clas.find(link.clayer_name());
        if cla.is_none() {
            error!(
                "Link {} uses unknown convergence layer {}",
                link.name(),
                link.clayer_name()
            );
        }
        cla
    }

    /// Moves an AVAILABLE link to OPENING and asks its convergence layer for a new contact.
    #[cfg_attr(feature = "instrument", instrument(skip(self)))]
    pub fn open_link(&self, link: &link::LinkRef) -> bool {
        let state = link.state();
        if state.is_open() || state == link::LinkState::Opening {
            error!("Not opening link {} since it is already {state}", link.name());
            return false;
        }
        if state != link::LinkState::Available {
            error!("Not opening link {} since it is {state}", link.name());
            return false;
        }
        let Some(cla) = self.find_cla(link) else {
            return false;
        };

        link.set_state(link::LinkState::Opening);
        let contact = link.new_contact();
        debug!("Opening link {} as {contact}", link.name());

        if !cla.open_contact(link, contact) {
            error!("Convergence layer refused to open link {}", link.name());
            link.clear_contact();
            link.set_state(link::LinkState::Available);
            return false;
        }
        true
    }

    /// Tears down the current contact of an open or opening link.
    ///
    /// The caller decides the state the link moves to afterwards.
    #[cfg_attr(feature = "instrument", instrument(skip(self)))]
    pub fn close_link(&self, link: &link::LinkRef) -> bool {
        let state = link.state();
        if !state.is_open() && state != link::LinkState::Opening && state != link::LinkState::Closing {
            error!("Not closing link {} since it is {state}", link.name());
            return false;
        }
        let Some(cla) = self.find_cla(link) else {
            return false;
        };

        debug!("Closing link {}", link.name());
        let closed = cla.close_contact(link);
        if !closed {
            warn!("Convergence layer failed to close link {}", link.name());
        }
        link.clear_contact();
        closed
    }

    /// Creates a link and posts `LinkCreated` for the daemon to adopt it.
    pub fn create_link(
        &self,
        name: &str,
        clayer: &str,
        nexthop: &str,
        link_type: link::LinkType,
        params: link::LinkParams,
    ) -> link::LinkRef {
        let link = link::Link::new(name, clayer, nexthop, link_type, params);
        self.events
            .post(event::Event::new(event::EventKind::LinkCreated { link: link.clone() }));
        link
    }

    /// Hands `bundle` to the convergence layer of an OPEN link.
    ///
    /// Records an IN_FLIGHT forwarding log entry. Returns false, with no
    /// state changed, if the link does not admit the bundle.
    #[cfg_attr(feature = "instrument", instrument(skip(self, bundle)))]
    pub fn send_bundle(
        &self,
        bundle: &bundle::BundleRef,
        link: &link::LinkRef,
        action: bundle::ForwardingAction,
        custody_spec: CustodyTimerSpec,
    ) -> bool {
        if let Err(e) = link.admit(bundle) {
            error!("Not sending bundle {}: {e}", bundle.id());
            return false;
        }
        let Some(cla) = self.find_cla(link) else {
            return false;
        };

        bundle.lock().fwdlog.add_entry(
            link,
            action,
            bundle::ForwardingState::InFlight,
            custody_spec,
        );
        link.inflight.push_back(bundle);
        let len = bundle.payload_len() as u64;
        link.update_stats(|s| {
            s.bundles_inflight += 1;
            s.bytes_inflight += len;
        });

        debug!("Sending bundle {} on link {}", bundle.id(), link.name());
        if !cla.send_bundle(link, bundle.clone_as("ConvergenceLayer::send_bundle")) {
            error!(
                "Convergence layer refused bundle {} on link {}",
                bundle.id(),
                link.name()
            );
            bundle
                .lock()
                .fwdlog
                .update(link, bundle::ForwardingState::TransmitFailed);
            link.inflight.erase(bundle);
            link.update_stats(|s| {
                s.bundles_inflight = s.bundles_inflight.saturating_sub(1);
                s.bytes_inflight = s.bytes_inflight.saturating_sub(len);
            });
            return false;
        }
        true
    }

    /// Asks the convergence layer to abandon an in-flight transmission.
    #[cfg_attr(feature = "instrument", instrument(skip(self, bundle)))]
    pub fn cancel_bundle(&self, bundle: &bundle::BundleRef, link: &link::LinkRef) -> bool {
        if link.state() != link::LinkState::Open {
            debug!("Cannot cancel bundle {} on link {} since it is not open", bundle.id(), link.name());
            return false;
        }
        if bundle.lock().fwdlog.get_latest_entry_state(link) != bundle::ForwardingState::InFlight {
            debug!("Bundle {} is not in flight on link {}", bundle.id(), link.name());
            return false;
        }
        let Some(cla) = self.find_cla(link) else {
            return false;
        };
        if !cla.cancel_bundle(link, bundle) {
            debug!("Convergence layer could not cancel bundle {}", bundle.id());
            return false;
        }

        bundle
            .lock()
            .fwdlog
            .update(link, bundle::ForwardingState::Cancelled);
        if link.inflight.erase(bundle) {
            let len = bundle.payload_len() as u64;
            link.update_stats(|s| {
                s.bundles_inflight = s.bundles_inflight.saturating_sub(1);
                s.bytes_inflight = s.bytes_inflight.saturating_sub(len);
                s.bundles_cancelled += 1;
            });
        }
        true
    }

    pub fn store_add(&self, bundle: &bundle::Bundle) -> bool {
        let queued = self.store.add(bundle);
        if !queued {
            error!("Error adding bundle {} to data store", bundle.id());
        }
        queued
    }

    pub fn store_update(&self, bundle: &bundle::Bundle) -> bool {
        let queued = self.store.update(bundle);
        if !queued {
            error!("Error updating bundle {} in data store", bundle.id());
        }
        queued
    }

    pub fn store_del(&self, bundle: &bundle::Bundle) -> bool {
        let queued = self.store.del(bundle);
        if !queued {
            error!("Error removing bundle {} from data store", bundle.id());
        }
        queued
    }
}
