use super::*;

impl DaemonCore {
    pub(super) fn handle_registration_added(&mut self, registration: &Arc<dyn reg::Registration>) {
        info!(
            "REGISTRATION_ADDED {} {}",
            registration.regid(),
            registration.endpoint()
        );

        if !self.registrations.add(registration.clone()) {
            error!(
                "Registration {} already exists",
                registration.regid()
            );
            return;
        }

        // Deliver anything that was waiting for this endpoint
        for bundle in self.pending.snapshot() {
            if !registration.endpoint().matches(&bundle.dest) {
                continue;
            }
            if bundle.is_fragment() {
                self.reassemble(&bundle);
            } else {
                self.deliver_to_registration(&bundle, registration.as_ref());
            }
        }
    }

    pub(super) fn handle_registration_removed(&mut self, regid: reg::RegistrationId) {
        info!("REGISTRATION_REMOVED {regid}");

        if self.registrations.del(regid).is_none() {
            error!("No registration {regid} to remove");
        }
    }

    pub(super) fn handle_registration_expired(&mut self, regid: reg::RegistrationId) {
        info!("REGISTRATION_EXPIRED {regid}");

        let Some(registration) = self.registrations.get(regid) else {
            error!("No registration {regid} to expire");
            return;
        };

        if registration.is_active() {
            // Removed once its application lets go of it
            debug!("Registration {regid} is still active, deferring its removal");
            self.registrations.defer_expiry(regid);
        } else {
            self.registrations.del(regid);
        }
    }
}
