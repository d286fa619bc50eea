use super::*;
use std::collections::HashMap;

/// Owns every [`Bundle`] known to the daemon, keyed by [`BundleId`].
///
/// Entries are removed only by the daemon's `BundleFree` handling, so a
/// bundle stays addressable by id until it has been fully released.
pub struct BundleTable {
    next_id: AtomicU64,
    /// Distinguishes the store keys of bundles created before and after a restart.
    session: u64,
    events: event::EventSender,
    bundles: Mutex<HashMap<BundleId, Arc<Bundle>>>,
}

impl BundleTable {
    pub fn new(events: event::EventSender) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            session: time::OffsetDateTime::now_utc().unix_timestamp_nanos() as u64,
            events,
            bundles: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn create(&self, builder: BundleBuilder) -> BundleRef {
        let id = BundleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let bundle = Arc::new(builder.into_bundle(id, self.session, self.events.clone()));
        let bundle_ref = BundleRef::new(bundle.clone(), "BundleTable::create");

        self.bundles
            .lock()
            .trace_expect("Failed to lock mutex")
            .insert(id, bundle);

        bundle_ref
    }

    /// Looks a bundle up by id, returning `None` once its last reference is gone.
    pub fn get(&self, id: BundleId) -> Option<BundleRef> {
        self.bundles
            .lock()
            .trace_expect("Failed to lock mutex")
            .get(&id)
            .and_then(|b| BundleRef::upgrade(b, "BundleTable::get"))
    }

    pub(crate) fn remove(&self, id: BundleId) -> Option<Arc<Bundle>> {
        self.bundles
            .lock()
            .trace_expect("Failed to lock mutex")
            .remove(&id)
    }

    pub fn len(&self) -> usize {
        self.bundles.lock().trace_expect("Failed to lock mutex").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
