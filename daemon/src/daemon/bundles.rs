use super::*;
use admin::StatusReason;
use bundle::ForwardingState;
use event::EventSource;
use stats::Counter;

// Creation times further ahead than this are probably a misconfigured clock
const MAX_CLOCK_SKEW: u64 = 30000;

impl DaemonCore {
    /// Returns true if the routers must not see the event.
    pub(super) fn handle_bundle_received(
        &mut self,
        bundle: &mut bundle::BundleRef,
        source: EventSource,
        bytes_received: usize,
    ) -> bool {
        if source == EventSource::Admin {
            self.counters.incr(Counter::Generated);
        } else {
            self.counters.incr(Counter::Received);
        }

        info!(
            "BUNDLE_RECEIVED {} {} ({bytes_received} of {} bytes) from {source:?}",
            bundle.id(),
            bundle.gbof_id(),
            bundle.payload_len()
        );

        if bundle.expiration == 0 {
            warn!("Bundle {} arrived with a zero lifetime", bundle.id());
        }
        let now = admin::now();
        if bundle.creation_ts.seconds > now + MAX_CLOCK_SKEW {
            warn!(
                "Bundle {} was created {} seconds in the future",
                bundle.id(),
                bundle.creation_ts.seconds - now
            );
        }

        if bundle.receipts.receive && source != EventSource::Store {
            self.generate_status_report(
                bundle,
                admin::StatusFlag::Received,
                StatusReason::NoAdditionalInfo,
            );
        }

        if let Some(fragment) =
            fragment::FragmentManager::convert_to_fragment(&self.bundles, bundle, bytes_received)
        {
            info!(
                "Partial reception of bundle {}, keeping the first {bytes_received} bytes as fragment {}",
                bundle.id(),
                fragment.id()
            );
            *bundle = fragment;
        }

        if let Some(duplicate) = self.find_duplicate(bundle) {
            self.counters.incr(Counter::Duplicate);
            info!(
                "Bundle {} is a duplicate of {}",
                bundle.id(),
                duplicate.id()
            );
            if bundle.custody_requested && duplicate.local_custody() {
                self.generate_custody_signal(
                    bundle,
                    false,
                    admin::CustodySignalReason::RedundantReception,
                );
            }
            return true;
        }

        if !self.add_to_pending(bundle, source != EventSource::Store) {
            return true;
        }

        if bundle.custody_requested && self.config.accept_custody {
            if source != EventSource::Store {
                self.accept_custody(bundle);
            } else if bundle.local_custody() {
                self.custody.push_back(bundle);
            }
        }

        self.check_registrations(bundle);
        false
    }

    pub(super) fn handle_bundle_transmitted(
        &mut self,
        bundle: &bundle::BundleRef,
        link: &link::LinkRef,
        bytes_sent: usize,
        acked: bool,
    ) {
        info!(
            "BUNDLE_TRANSMITTED {} ({bytes_sent} of {} bytes) on link {}",
            bundle.id(),
            bundle.payload_len(),
            link.name()
        );

        self.remove_inflight(bundle, link);

        if bytes_sent == 0
            || (self.config.retry_reliable_unacked && link.is_reliable() && !acked)
        {
            info!(
                "Bundle {} was not acknowledged on link {}, marking it transmit failed",
                bundle.id(),
                link.name()
            );
            bundle
                .lock()
                .fwdlog
                .update(link, ForwardingState::TransmitFailed);
            return;
        }

        self.counters.incr(Counter::Transmitted);
        link.update_stats(|s| {
            s.bundles_transmitted += 1;
            s.bytes_transmitted += bytes_sent as u64;
        });

        let latest = {
            let mut state = bundle.lock();
            state.fwdlog.update(link, ForwardingState::Transmitted);
            state.fwdlog.get_latest_entry(link).cloned()
        };
        let Some(latest) = latest else {
            error!(
                "Bundle {} was transmitted on link {} but was never sent there",
                bundle.id(),
                link.name()
            );
            return;
        };

        if let Some(tail) = fragment::FragmentManager::try_to_reactively_fragment(
            &self.bundles,
            bundle,
            bytes_sent,
        ) {
            info!(
                "Bundle {} was partially sent, created fragment {} for the rest",
                bundle.id(),
                tail.id()
            );
            let len = tail.payload_len();
            self.post_at_head(Event::bundle_received(
                tail,
                EventSource::Fragmentation,
                len,
            ));
        }

        if bundle.receipts.forward {
            self.generate_status_report(
                bundle,
                admin::StatusFlag::Forwarded,
                StatusReason::NoAdditionalInfo,
            );
        }

        if bundle.local_custody() {
            let timer = custody::CustodyTimer::start(
                &self.timers,
                latest.timestamp,
                latest.custody_spec,
                bundle,
                link,
                &self.events,
            );
            bundle.lock().custody_timers.push(timer);
        }

        self.try_delete_from_pending(bundle, StatusReason::NoAdditionalInfo);
    }

    pub(super) fn handle_bundle_transmit_failed(
        &mut self,
        bundle: &bundle::BundleRef,
        link: &link::LinkRef,
    ) {
        info!(
            "BUNDLE_TRANSMIT_FAILED {} on link {}",
            bundle.id(),
            link.name()
        );

        self.remove_inflight(bundle, link);
        if !bundle
            .lock()
            .fwdlog
            .update(link, ForwardingState::TransmitFailed)
        {
            error!(
                "Bundle {} failed on link {} but was never sent there",
                bundle.id(),
                link.name()
            );
        }
    }

    fn remove_inflight(&self, bundle: &bundle::Bundle, link: &link::Link) {
        if link.inflight.erase(bundle) {
            let len = bundle.payload_len() as u64;
            link.update_stats(|s| {
                s.bundles_inflight = s.bundles_inflight.saturating_sub(1);
                s.bytes_inflight = s.bytes_inflight.saturating_sub(len);
            });
        }
    }

    pub(super) fn handle_bundle_delivered(
        &mut self,
        bundle: &bundle::BundleRef,
        regid: reg::RegistrationId,
    ) {
        self.counters.incr(Counter::Delivered);
        info!(
            "BUNDLE_DELIVERED {} to registration {regid}",
            bundle.id()
        );

        if bundle.receipts.delivery {
            self.generate_status_report(
                bundle,
                admin::StatusFlag::Delivered,
                StatusReason::NoAdditionalInfo,
            );
        }

        if bundle.custody_requested {
            if bundle.local_custody() {
                self.release_custody(bundle);
            } else if bundle.custodian().is_null() {
                warn!(
                    "Bundle {} was delivered without anyone taking custody",
                    bundle.id()
                );
            } else {
                self.generate_custody_signal(
                    bundle,
                    true,
                    admin::CustodySignalReason::NoAdditionalInfo,
                );
            }
        }

        self.try_delete_from_pending(bundle, StatusReason::NoAdditionalInfo);
    }

    /// Returns true if the bundle had already left the pending list.
    pub(super) fn handle_bundle_expired(&mut self, bundle: &bundle::BundleRef) -> bool {
        self.counters.incr(Counter::Expired);
        info!("BUNDLE_EXPIRED {} {}", bundle.id(), bundle.gbof_id());

        self.fragments.remove_fragment(bundle);

        if !self.pending.contains(bundle) {
            let mappings: Vec<bundle::Mapping> = bundle.lock().mappings().cloned().collect();
            if mappings.is_empty() {
                debug!("Expired bundle {} was already deleted", bundle.id());
                return true;
            }

            let local_custody = bundle.local_custody();
            let names = mappings
                .iter()
                .map(|m| m.name.as_ref())
                .collect::<Vec<_>>()
                .join(", ");
            let expected = mappings.iter().all(|m| match m.kind {
                bundle::ListKind::LinkQueue
                | bundle::ListKind::LinkInflight
                | bundle::ListKind::Reassembly => true,
                bundle::ListKind::Custody => local_custody,
                _ => false,
            });
            if !expected {
                error!(
                    "Expired bundle {} is not pending but is still queued on {names}",
                    bundle.id()
                );
                return true;
            }

            info!(
                "Expired bundle {} is not pending but is still queued on {names}",
                bundle.id()
            );
            if local_custody {
                self.release_custody(bundle);
            }
            return false;
        }

        if bundle.local_custody() {
            self.release_custody(bundle);
        }
        self.delete_from_pending(bundle, StatusReason::LifetimeExpired);
        false
    }

    pub(super) fn handle_bundle_free(&mut self, bundle: &Arc<bundle::Bundle>) {
        let refs = bundle.refcount();
        if refs != 0 {
            error!("Bundle {} freed with {refs} references", bundle.id());
            panic!("Bundle {} freed with {refs} references", bundle.id());
        }

        debug!("BUNDLE_FREE {}", bundle.id());

        if bundle.lock().in_datastore {
            self.actions.store_del(bundle);
        }
        self.bundles.remove(bundle.id());
    }

    pub(super) fn handle_reassembly_completed(
        &mut self,
        bundle: &bundle::BundleRef,
        fragments: &[bundle::BundleRef],
    ) {
        info!(
            "REASSEMBLY_COMPLETED {} from {} fragments",
            bundle.id(),
            fragments.len()
        );

        for fragment in fragments {
            self.try_delete_from_pending(fragment, StatusReason::NoAdditionalInfo);
        }

        let len = bundle.payload_len();
        self.post_at_head(Event::bundle_received(
            bundle.clone_as("ReassemblyCompleted"),
            EventSource::Fragmentation,
            len,
        ));
    }
}
