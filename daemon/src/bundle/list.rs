use super::*;
use std::collections::BTreeMap;

/// What a [`BundleList`] is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ListKind {
    Pending,
    Custody,
    LinkQueue,
    LinkInflight,
    Reassembly,
    Other,
}

/// Records that a bundle is on a particular list.
///
/// A bundle's mapping set and the lists that hold it are always updated
/// together, under the list's lock.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Mapping {
    pub list: u64,
    pub kind: ListKind,
    pub name: Arc<str>,
}

/// A named set of bundles, each entry holding one [`BundleRef`].
///
/// A bundle appears at most once per list. Iteration is in insertion order.
pub struct BundleList {
    id: u64,
    kind: ListKind,
    name: Arc<str>,
    inner: Mutex<Entries>,
}

#[derive(Default)]
struct Entries {
    next_seq: u64,
    by_seq: BTreeMap<u64, BundleRef>,
    by_id: std::collections::HashMap<BundleId, u64>,
}

impl BundleList {
    pub fn new(name: impl Into<Arc<str>>, kind: ListKind) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);

        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            name: name.into(),
            inner: Mutex::new(Entries::default()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> ListKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.inner.lock().trace_expect("Failed to lock mutex")
    }

    fn mapping(&self) -> Mapping {
        Mapping {
            list: self.id,
            kind: self.kind,
            name: self.name.clone(),
        }
    }

    /// Appends `bundle`, returning false if it is already on the list.
    pub fn push_back(&self, bundle: &BundleRef) -> bool {
        let mut inner = self.lock();
        if inner.by_id.contains_key(&bundle.id()) {
            return false;
        }

        bundle.lock().mappings.insert(self.mapping());

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.by_id.insert(bundle.id(), seq);
        inner
            .by_seq
            .insert(seq, bundle.clone_as(owner_tag(self.kind)));
        true
    }

    /// Removes `bundle`, returning false if it was not on the list.
    pub fn erase(&self, bundle: &Bundle) -> bool {
        let removed = {
            let mut inner = self.lock();
            let Some(seq) = inner.by_id.remove(&bundle.id()) else {
                return false;
            };
            bundle.lock().mappings.remove(&self.mapping());
            inner.by_seq.remove(&seq)
        };
        // The reference is released outside the list lock
        drop(removed);
        true
    }

    /// Removes and returns the oldest entry.
    pub fn pop_front(&self) -> Option<BundleRef> {
        let mut inner = self.lock();
        let (_, bundle) = inner.by_seq.pop_first()?;
        inner.by_id.remove(&bundle.id());
        bundle.lock().mappings.remove(&self.mapping());
        Some(bundle)
    }

    pub fn contains(&self, bundle: &Bundle) -> bool {
        self.lock().by_id.contains_key(&bundle.id())
    }

    /// Returns the first bundle for which `pred` holds.
    ///
    /// `pred` runs under the list lock and may take the bundle lock.
    pub fn find(&self, mut pred: impl FnMut(&Bundle) -> bool) -> Option<BundleRef> {
        self.lock()
            .by_seq
            .values()
            .find(|b| pred(b))
            .map(|b| b.clone_as("BundleList::find"))
    }

    /// Takes a reference to every bundle on the list, so the caller can
    /// iterate without holding the list lock.
    pub fn snapshot(&self) -> Vec<BundleRef> {
        self.lock()
            .by_seq
            .values()
            .map(|b| b.clone_as("BundleList::snapshot"))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().by_seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry.
    pub fn clear(&self) {
        while self.pop_front().is_some() {}
    }
}

fn owner_tag(kind: ListKind) -> &'static str {
    match kind {
        ListKind::Pending => "pending_bundles",
        ListKind::Custody => "custody_bundles",
        ListKind::LinkQueue => "link_queue",
        ListKind::LinkInflight => "link_inflight",
        ListKind::Reassembly => "reassembly",
        ListKind::Other => "BundleList",
    }
}

impl core::fmt::Debug for BundleList {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BundleList")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("len", &self.len())
            .finish()
    }
}
