use super::*;

/// Receives administrative bundles addressed to the node itself.
///
/// Custody signals are turned into `CustodySignal` events, status reports
/// are logged.
pub struct AdminRegistration {
    endpoint: eid::EndpointId,
    events: event::EventSender,
}

impl AdminRegistration {
    pub fn new(endpoint: eid::EndpointId, events: event::EventSender) -> Self {
        Self { endpoint, events }
    }
}

impl Registration for AdminRegistration {
    fn regid(&self) -> RegistrationId {
        ADMIN_REGID
    }

    fn endpoint(&self) -> &eid::EndpointId {
        &self.endpoint
    }

    fn is_active(&self) -> bool {
        true
    }

    fn deliver_bundle(&self, bundle: bundle::BundleRef) {
        if !bundle.is_admin {
            warn!(
                "Non-administrative bundle {} delivered to the administrative endpoint",
                bundle.gbof_id()
            );
        } else {
            match crate::admin::AdminRecord::decode(&bundle.payload) {
                Ok(crate::admin::AdminRecord::CustodySignal(signal)) => {
                    debug!(
                        "Custody signal from {} for {}: succeeded {}",
                        bundle.source, signal.orig, signal.succeeded
                    );
                    self.events
                        .post(event::Event::new(event::EventKind::CustodySignal { signal }));
                }
                Ok(crate::admin::AdminRecord::StatusReport(report)) => {
                    info!(
                        "Status report from {}: {:?} {} ({:?})",
                        bundle.source, report.flag, report.orig, report.reason
                    );
                }
                Err(e) => {
                    warn!("Administrative bundle {} from {}: {e}", bundle.id(), bundle.source);
                }
            }
        }

        self.events
            .post(event::Event::new(event::EventKind::BundleDelivered {
                bundle,
                regid: ADMIN_REGID,
            }));
    }
}
