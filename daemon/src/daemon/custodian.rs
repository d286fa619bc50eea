use super::*;
use admin::CustodySignalReason;

impl DaemonCore {
    /// Takes custody of `bundle`, telling the previous custodian if there was one.
    #[cfg_attr(feature = "instrument", instrument(skip(self, bundle)))]
    pub(super) fn accept_custody(&mut self, bundle: &bundle::BundleRef) {
        info!("Accepting custody of bundle {}", bundle.id());

        let (local_custody, custodian) = {
            let state = bundle.lock();
            (state.local_custody, state.custodian.clone())
        };
        if local_custody {
            error!("Already have custody of bundle {}", bundle.id());
            return;
        }
        if custodian == self.config.local_eid {
            error!(
                "Bundle {} names this node as custodian but custody was never accepted",
                bundle.id()
            );
            return;
        }

        if !custodian.is_null() {
            self.generate_custody_signal(bundle, true, CustodySignalReason::NoAdditionalInfo);
        }

        {
            let mut state = bundle.lock();
            state.custodian = self.config.local_eid.clone();
            state.local_custody = true;
        }
        self.actions.store_update(bundle);
        self.custody.push_back(bundle);

        if bundle.receipts.custody {
            self.generate_status_report(
                bundle,
                admin::StatusFlag::CustodyAccepted,
                admin::StatusReason::NoAdditionalInfo,
            );
        }
    }

    /// Gives up custody of `bundle` and stops its custody timers.
    #[cfg_attr(feature = "instrument", instrument(skip(self, bundle)))]
    pub(super) fn release_custody(&mut self, bundle: &bundle::BundleRef) {
        info!("Releasing custody of bundle {}", bundle.id());

        if !bundle.local_custody() {
            error!("Don't have custody of bundle {}", bundle.id());
            return;
        }

        let timers = core::mem::take(&mut bundle.lock().custody_timers);
        for timer in timers {
            if !timer.cancel() {
                warn!(
                    "Custody timer for bundle {} on link {} has already fired",
                    bundle.id(),
                    timer.link.name()
                );
            }
        }

        {
            let mut state = bundle.lock();
            state.custodian = eid::EndpointId::null();
            state.local_custody = false;
        }
        self.actions.store_update(bundle);
        self.custody.erase(bundle);
    }

    pub(super) fn handle_custody_signal(&mut self, signal: &admin::CustodySignal) {
        info!(
            "CUSTODY_SIGNAL for {} succeeded {} ({:?})",
            signal.orig, signal.succeeded, signal.reason
        );

        let Some(bundle) = self.custody.find(|b| b.gbof_id() == signal.orig) else {
            warn!(
                "Received a custody signal for {} but don't have custody of it",
                signal.orig
            );
            return;
        };

        // A redundant reception means the peer already holds custody
        if signal.succeeded || signal.reason == CustodySignalReason::RedundantReception {
            self.release_custody(&bundle);
            self.try_delete_from_pending(&bundle, admin::StatusReason::NoAdditionalInfo);
        }
    }

    pub(super) fn handle_custody_timeout(&mut self, bundle: &bundle::BundleRef, link: &link::LinkRef) {
        info!(
            "CUSTODY_TIMEOUT for bundle {} on link {}",
            bundle.id(),
            link.name()
        );

        let timer = {
            let mut state = bundle.lock();
            let position = state
                .custody_timers
                .iter()
                .position(|t| Arc::ptr_eq(&t.link, link) && !t.is_pending());
            position.map(|i| state.custody_timers.remove(i))
        };
        if timer.is_none() {
            // Custody was released after the timer fired
            error!(
                "No expired custody timer for bundle {} on link {}",
                bundle.id(),
                link.name()
            );
            return;
        }

        if !self.pending.contains(bundle) {
            error!(
                "Custody timer fired for bundle {} which is no longer pending",
                bundle.id()
            );
            return;
        }

        let mut state = bundle.lock();
        let Some(latest) = state.fwdlog.get_latest_entry(link).cloned() else {
            error!(
                "Custody timer fired for bundle {} which was never sent on link {}",
                bundle.id(),
                link.name()
            );
            return;
        };
        state.fwdlog.add_entry(
            link,
            latest.action,
            bundle::ForwardingState::CustodyTimeout,
            latest.custody_spec,
        );
    }
}
