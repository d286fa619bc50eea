//! Local delivery endpoints.

use super::*;
use std::collections::{BTreeMap, BTreeSet};

pub mod admin;

pub type RegistrationId = u32;

/// The registration id reserved for the node's administrative endpoint.
pub const ADMIN_REGID: RegistrationId = 0;

/// A local consumer of bundles addressed to `endpoint`.
///
/// Delivery must not block the daemon: a registration queues the bundle and
/// posts `BundleDelivered` once the application has taken it.
pub trait Registration: Send + Sync {
    fn regid(&self) -> RegistrationId;

    /// The endpoint pattern this registration accepts bundles for.
    fn endpoint(&self) -> &eid::EndpointId;

    fn deliver_bundle(&self, bundle: bundle::BundleRef);

    /// An application is currently bound to this registration.
    fn is_active(&self) -> bool {
        false
    }
}

/// The daemon's registrations, by id.
#[derive(Default)]
pub struct RegistrationTable {
    regs: BTreeMap<RegistrationId, Arc<dyn Registration>>,
    expired: BTreeSet<RegistrationId>,
}

impl RegistrationTable {
    /// Returns false if a registration with the same id already exists.
    pub fn add(&mut self, registration: Arc<dyn Registration>) -> bool {
        match self.regs.entry(registration.regid()) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(e) => {
                e.insert(registration);
                true
            }
        }
    }

    pub fn del(&mut self, regid: RegistrationId) -> Option<Arc<dyn Registration>> {
        self.expired.remove(&regid);
        self.regs.remove(&regid)
    }

    pub fn get(&self, regid: RegistrationId) -> Option<&Arc<dyn Registration>> {
        self.regs.get(&regid)
    }

    /// Registrations whose endpoint pattern matches `dest`, excluding expired ones.
    pub fn get_matching(&self, dest: &eid::EndpointId) -> Vec<Arc<dyn Registration>> {
        self.regs
            .values()
            .filter(|r| !self.expired.contains(&r.regid()) && r.endpoint().matches(dest))
            .cloned()
            .collect()
    }

    /// Marks a registration expired while an application is still bound to it.
    pub(crate) fn defer_expiry(&mut self, regid: RegistrationId) {
        self.expired.insert(regid);
    }

    pub fn is_expired(&self, regid: RegistrationId) -> bool {
        self.expired.contains(&regid)
    }

    pub fn len(&self) -> usize {
        self.regs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }
}
