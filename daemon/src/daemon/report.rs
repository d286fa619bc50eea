use super::*;

impl DaemonCore {
    /// Reports `flag` for `bundle` to its report-to endpoint.
    pub(super) fn generate_status_report(
        &mut self,
        bundle: &bundle::Bundle,
        flag: admin::StatusFlag,
        reason: admin::StatusReason,
    ) {
        if !self.config.status_reports {
            return;
        }
        // Reporting on reports would never end
        if bundle.is_admin {
            return;
        }
        if bundle.replyto.is_null() {
            debug!(
                "Not sending {flag:?} report for bundle {}: no report-to endpoint",
                bundle.id()
            );
            return;
        }

        debug!(
            "Sending {flag:?} report for bundle {} to {}",
            bundle.id(),
            bundle.replyto
        );
        self.send_admin_record(
            bundle.replyto.clone(),
            admin::AdminRecord::StatusReport(admin::StatusReport {
                flag,
                reason,
                orig: bundle.gbof_id(),
                time: admin::now(),
            }),
            bundle.expiration,
        );
    }

    /// Tells the current custodian of `bundle` whether this node took custody.
    pub(super) fn generate_custody_signal(
        &mut self,
        bundle: &bundle::Bundle,
        succeeded: bool,
        reason: admin::CustodySignalReason,
    ) {
        let (local_custody, custodian) = {
            let state = bundle.lock();
            (state.local_custody, state.custodian.clone())
        };
        if local_custody {
            error!(
                "Not signalling custody of bundle {} while holding it",
                bundle.id()
            );
            return;
        }
        if custodian.is_null() {
            error!(
                "Not signalling custody of bundle {}: it has no custodian",
                bundle.id()
            );
            return;
        }

        debug!(
            "Sending custody signal for bundle {} to {custodian}, succeeded {succeeded} ({reason:?})",
            bundle.id()
        );
        self.send_admin_record(
            custodian,
            admin::AdminRecord::CustodySignal(admin::CustodySignal {
                succeeded,
                reason,
                orig: bundle.gbof_id(),
                time: admin::now(),
            }),
            bundle.expiration,
        );
    }

    fn send_admin_record(
        &mut self,
        dest: eid::EndpointId,
        record: admin::AdminRecord,
        expiration: u64,
    ) {
        let payload = match record.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode administrative record: {e}");
                return;
            }
        };

        let bundle = bundle::BundleBuilder::new(self.config.local_eid.clone(), dest)
            .admin(true)
            .expiration(expiration)
            .payload(payload)
            .build(&self.bundles);
        let len = bundle.payload_len();
        self.post_at_head(Event::bundle_received(
            bundle,
            event::EventSource::Admin,
            len,
        ));
    }
}
