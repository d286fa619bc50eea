use super::*;
use admin::StatusReason;

impl DaemonCore {
    /// Puts `bundle` on the pending list and starts its expiration timer.
    ///
    /// Returns false if the bundle has already expired; the timer still
    /// fires, so it will be deleted shortly.
    pub(super) fn add_to_pending(&mut self, bundle: &bundle::BundleRef, add_to_store: bool) -> bool {
        debug!("Adding bundle {} to the pending list", bundle.id());

        if !self.pending.push_back(bundle) {
            error!("Bundle {} is already pending", bundle.id());
            return false;
        }

        if add_to_store {
            bundle.lock().in_datastore = true;
            self.actions.store_add(bundle);
        }

        let expiry = bundle.expiry();
        let ok_to_route = expiry > time::OffsetDateTime::now_utc();
        if !ok_to_route {
            warn!(
                "Bundle {} expired at {expiry} before it was received",
                bundle.id()
            );
        }

        let timer = {
            let expired = bundle.clone_as("expiration_timer");
            let events = self.events.clone();
            dtnd_async::Timer::schedule_at(&self.timers, expiry, move || {
                events.post(Event::new(EventKind::BundleExpired { bundle: expired }))
            })
        };
        bundle.lock().expiration_timer = Some(timer);

        ok_to_route
    }

    /// Removes `bundle` from the pending list and stops its expiration timer.
    ///
    /// Sends a deletion status report if one was requested and `reason` says why.
    pub fn delete_from_pending(&mut self, bundle: &bundle::BundleRef, reason: StatusReason) -> bool {
        debug!("Deleting bundle {} from the pending list ({reason:?})", bundle.id());

        let timer = bundle.lock().expiration_timer.take();
        if let Some(timer) = timer
            && !timer.cancel()
        {
            debug!(
                "Expiration timer for bundle {} has already fired",
                bundle.id()
            );
        }

        if !self.pending.erase(bundle) {
            warn!("Bundle {} is not on the pending list", bundle.id());
            return false;
        }

        if bundle.receipts.deletion && reason != StatusReason::NoAdditionalInfo {
            self.generate_status_report(bundle, admin::StatusFlag::Deleted, reason);
        }
        true
    }

    /// Deletes `bundle` once nothing else needs it.
    ///
    /// Only applies with early deletion enabled, and only when the pending
    /// list is the bundle's last mapping and no transmission is in flight.
    pub fn try_delete_from_pending(&mut self, bundle: &bundle::BundleRef, reason: StatusReason) -> bool {
        if !self.pending.contains(bundle) {
            if bundle.lock().has_expiration_timer() {
                error!(
                    "Bundle {} is not pending but its expiration timer is running",
                    bundle.id()
                );
            } else {
                debug!("Bundle {} was already deleted", bundle.id());
            }
            return false;
        }

        if !self.config.early_deletion {
            return false;
        }

        let mappings = bundle.mapping_count();
        if mappings != 1 {
            debug!(
                "Not deleting bundle {} while it is on {mappings} lists",
                bundle.id()
            );
            return false;
        }

        let inflight = bundle
            .lock()
            .fwdlog
            .get_count(&[bundle::ForwardingState::InFlight], None);
        if inflight > 0 {
            debug!(
                "Not deleting bundle {} while it is in flight on {inflight} links",
                bundle.id()
            );
            return false;
        }

        self.delete_from_pending(bundle, reason)
    }

    /// Adds a locally created bundle without going through reception.
    #[cfg_attr(feature = "instrument", instrument(skip(self, bundle)))]
    pub fn inject_bundle(&mut self, bundle: &bundle::BundleRef) -> bool {
        info!(
            "Injecting bundle {} {} for {}",
            bundle.id(),
            bundle.gbof_id(),
            bundle.dest
        );
        self.add_to_pending(bundle, true)
    }

    /// Finds a pending bundle with the same identity and payload length.
    pub(super) fn find_duplicate(&self, bundle: &bundle::Bundle) -> Option<bundle::BundleRef> {
        let gbof_id = bundle.gbof_id();
        let len = bundle.payload_len();
        self.pending.find(|b| {
            b.id() != bundle.id() && b.payload_len() == len && b.gbof_id() == gbof_id
        })
    }

    /// Hands `bundle` to every local registration for its destination.
    pub(super) fn check_registrations(&mut self, bundle: &bundle::BundleRef) {
        let registrations = self.registrations.get_matching(&bundle.dest);
        if registrations.is_empty() {
            return;
        }

        // Fragments are held until the whole bundle can be delivered
        if bundle.is_fragment() {
            self.reassemble(bundle);
            return;
        }

        for registration in registrations {
            self.deliver_to_registration(bundle, registration.as_ref());
        }
    }

    pub(super) fn reassemble(&mut self, fragment: &bundle::BundleRef) {
        debug!(
            "Bundle {} is a fragment, holding it for reassembly",
            fragment.id()
        );
        if let Some((bundle, fragments)) =
            self.fragments.process_for_reassembly(&self.bundles, fragment)
        {
            self.post_at_head(Event::new(EventKind::ReassemblyCompleted {
                bundle,
                fragments,
            }));
        }
    }

    pub(super) fn deliver_to_registration(
        &self,
        bundle: &bundle::BundleRef,
        registration: &dyn reg::Registration,
    ) {
        debug!(
            "Delivering bundle {} to registration {} ({})",
            bundle.id(),
            registration.regid(),
            registration.endpoint()
        );
        registration.deliver_bundle(bundle.clone_as("Registration::deliver_bundle"));
    }
}
