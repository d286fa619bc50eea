use super::*;

/// A counted, owner-tagged handle to a [`Bundle`].
///
/// Every holder of a bundle (registries, link queues, timers, in-flight
/// events) owns one `BundleRef`. When the last one is dropped a
/// `BundleFree` event is posted so the daemon can release the bundle on its
/// own loop, whichever task dropped it.
pub struct BundleRef {
    bundle: Arc<Bundle>,
    owner: &'static str,
}

impl BundleRef {
    pub(crate) fn new(bundle: Arc<Bundle>, owner: &'static str) -> Self {
        bundle.refcount.fetch_add(1, Ordering::AcqRel);
        Self { bundle, owner }
    }

    /// Takes a new reference only if the bundle is still referenced elsewhere.
    pub(crate) fn upgrade(bundle: &Arc<Bundle>, owner: &'static str) -> Option<Self> {
        bundle
            .refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n != 0).then_some(n + 1)
            })
            .ok()
            .map(|_| Self {
                bundle: bundle.clone(),
                owner,
            })
    }

    /// Takes another reference on behalf of `owner`.
    pub fn clone_as(&self, owner: &'static str) -> Self {
        Self::new(self.bundle.clone(), owner)
    }

    pub fn owner(&self) -> &'static str {
        self.owner
    }

    pub fn ptr_eq(&self, other: &BundleRef) -> bool {
        Arc::ptr_eq(&self.bundle, &other.bundle)
    }
}

impl Clone for BundleRef {
    fn clone(&self) -> Self {
        self.clone_as(self.owner)
    }
}

impl core::ops::Deref for BundleRef {
    type Target = Bundle;

    fn deref(&self) -> &Self::Target {
        &self.bundle
    }
}

impl Drop for BundleRef {
    fn drop(&mut self) {
        if self.bundle.refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            trace!(
                "Last reference to bundle {} dropped by {}",
                self.bundle.id, self.owner
            );
            self.bundle.events.post(event::Event::daemon_only(
                event::EventKind::BundleFree {
                    bundle: self.bundle.clone(),
                },
            ));
        }
    }
}

impl core::fmt::Debug for BundleRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "BundleRef({} owned by {})", self.bundle.id, self.owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_drop_posts_free() {
        let (tx, rx) = event::channel();
        let table = BundleTable::new(tx);
        let a = BundleBuilder::new("dtn://a/", "dtn://b/").build(&table);
        let b = a.clone_as("test");
        assert_eq!(a.refcount(), 2);

        drop(a);
        assert!(rx.try_recv().is_none());

        drop(b);
        match rx.try_recv().map(|e| e.kind) {
            Some(event::EventKind::BundleFree { bundle }) => assert_eq!(bundle.refcount(), 0),
            other => panic!(
                "expected BUNDLE_FREE, got {}",
                other.map_or("nothing", |k| k.name())
            ),
        }
    }

    #[test]
    fn upgrade_fails_once_released() {
        let table = BundleTable::new(event::channel().0);
        let a = BundleBuilder::new("dtn://a/", "dtn://b/").build(&table);
        let id = a.id();
        let raw = table.get(id).expect("live bundle");
        assert_eq!(a.refcount(), 2);
        drop(raw);
        drop(a);
        assert!(table.get(id).is_none());
    }
}
