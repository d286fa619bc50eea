use super::*;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

mod bundle_ref;
mod forwarding_log;
mod list;
mod table;

pub use bundle_ref::BundleRef;
pub use forwarding_log::{ForwardingAction, ForwardingInfo, ForwardingLog, ForwardingState};
pub use list::{BundleList, ListKind, Mapping};
pub use table::BundleTable;

/// Seconds between the Unix epoch and the DTN epoch, 2000-01-01T00:00:00Z.
const DTN_EPOCH_OFFSET: i64 = 946_684_800;

pub fn dtn_epoch() -> time::OffsetDateTime {
    time::OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(DTN_EPOCH_OFFSET)
}

/// Process-local bundle identifier, unique for the daemon's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BundleId(pub(crate) u64);

impl core::fmt::Display for BundleId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "*{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct CreationTimestamp {
    /// Seconds since the DTN epoch.
    pub seconds: u64,
    pub seqno: u64,
}

impl CreationTimestamp {
    /// A timestamp for a bundle created now, with a sequence number that is
    /// unique within this process.
    pub fn now() -> Self {
        static SEQNO: AtomicU64 = AtomicU64::new(0);

        let seconds = (time::OffsetDateTime::now_utc() - dtn_epoch()).whole_seconds();
        Self {
            seconds: seconds.max(0) as u64,
            seqno: SEQNO.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn to_datetime(&self) -> time::OffsetDateTime {
        dtn_epoch().saturating_add(time::Duration::seconds(
            self.seconds.min(i64::MAX as u64) as i64,
        ))
    }
}

impl core::fmt::Display for CreationTimestamp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}", self.seconds, self.seqno)
    }
}

/// Position of a fragment within the original application data unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct FragmentInfo {
    pub offset: usize,
    /// Total length of the original (unfragmented) payload.
    pub total_length: usize,
}

/// Global bundle identity: the same on every node the bundle passes through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct GbofId {
    pub source: eid::EndpointId,
    pub creation_ts: CreationTimestamp,
    /// Fragment offset and length, if the bundle is a fragment.
    pub fragment: Option<(usize, usize)>,
}

impl core::fmt::Display for GbofId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{},{}", self.source, self.creation_ts)?;
        if let Some((offset, length)) = self.fragment {
            write!(f, ",{offset},{length}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Priority {
    Bulk,
    #[default]
    Normal,
    Expedited,
}

/// Status reports requested by the bundle's source.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReceiptFlags {
    pub receive: bool,
    pub forward: bool,
    pub delivery: bool,
    pub deletion: bool,
    pub custody: bool,
}

/// Mutable per-bundle state, only ever touched under the bundle's lock.
///
/// Lock ordering: a [`BundleList`] lock may be held while taking this lock,
/// never the other way round.
pub struct BundleState {
    pub custodian: eid::EndpointId,
    pub local_custody: bool,
    pub in_datastore: bool,
    pub fwdlog: ForwardingLog,
    pub(crate) custody_timers: Vec<custody::CustodyTimer>,
    pub(crate) expiration_timer: Option<dtnd_async::Timer>,
    pub(crate) mappings: BTreeSet<Mapping>,
}

impl BundleState {
    pub fn mappings(&self) -> impl Iterator<Item = &Mapping> {
        self.mappings.iter()
    }

    pub fn custody_timer_count(&self) -> usize {
        self.custody_timers.len()
    }

    pub fn has_expiration_timer(&self) -> bool {
        self.expiration_timer.is_some()
    }
}

/// A bundle held by the daemon.
///
/// The protocol fields are immutable once the bundle is created. Everything
/// that changes while the bundle is processed lives in [`BundleState`].
pub struct Bundle {
    id: BundleId,
    pub source: eid::EndpointId,
    pub dest: eid::EndpointId,
    pub replyto: eid::EndpointId,
    pub prevhop: eid::EndpointId,
    pub creation_ts: CreationTimestamp,
    /// Lifetime in seconds, counted from the creation timestamp.
    pub expiration: u64,
    pub priority: Priority,
    pub custody_requested: bool,
    pub is_admin: bool,
    pub receipts: ReceiptFlags,
    pub fragment: Option<FragmentInfo>,
    pub payload: Bytes,

    store_key: String,
    refcount: AtomicUsize,
    events: event::EventSender,
    state: Mutex<BundleState>,
}

impl Bundle {
    pub fn id(&self) -> BundleId {
        self.id
    }

    /// Key of this bundle's storage record.
    ///
    /// Unlike the GBOF id it is unique to this copy of the bundle, and it is
    /// kept across a restart.
    pub fn store_key(&self) -> &str {
        &self.store_key
    }

    pub fn is_fragment(&self) -> bool {
        self.fragment.is_some()
    }

    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    pub fn gbof_id(&self) -> GbofId {
        GbofId {
            source: self.source.clone(),
            creation_ts: self.creation_ts,
            fragment: self.fragment.map(|f| (f.offset, self.payload.len())),
        }
    }

    /// Length of the application data unit this bundle belongs to.
    pub fn orig_length(&self) -> usize {
        self.fragment
            .map(|f| f.total_length)
            .unwrap_or(self.payload.len())
    }

    pub fn expiry(&self) -> time::OffsetDateTime {
        self.creation_ts
            .to_datetime()
            .saturating_add(time::Duration::seconds(
                self.expiration.min(i64::MAX as u64) as i64,
            ))
    }

    pub fn has_expired(&self) -> bool {
        self.expiry() <= time::OffsetDateTime::now_utc()
    }

    /// Number of live [`BundleRef`]s.
    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    pub fn lock(&self) -> MutexGuard<'_, BundleState> {
        self.state.lock().trace_expect("Failed to lock mutex")
    }

    pub fn mapping_count(&self) -> usize {
        self.lock().mappings.len()
    }

    pub fn is_queued_on(&self, list: &BundleList) -> bool {
        self.lock().mappings.iter().any(|m| m.list == list.id())
    }

    pub fn local_custody(&self) -> bool {
        self.lock().local_custody
    }

    pub fn custodian(&self) -> eid::EndpointId {
        self.lock().custodian.clone()
    }
}

impl core::fmt::Debug for Bundle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Bundle")
            .field("id", &self.id)
            .field("gbof_id", &self.gbof_id())
            .field("dest", &self.dest)
            .field("refcount", &self.refcount())
            .finish_non_exhaustive()
    }
}

/// Describes a bundle to be created through a [`BundleTable`].
#[derive(Debug, Clone)]
pub struct BundleBuilder {
    source: eid::EndpointId,
    dest: eid::EndpointId,
    replyto: eid::EndpointId,
    prevhop: eid::EndpointId,
    custodian: eid::EndpointId,
    creation_ts: Option<CreationTimestamp>,
    expiration: u64,
    priority: Priority,
    custody_requested: bool,
    is_admin: bool,
    receipts: ReceiptFlags,
    fragment: Option<FragmentInfo>,
    payload: Bytes,
    local_custody: bool,
    in_datastore: bool,
    store_key: Option<String>,
}

impl BundleBuilder {
    pub fn new(source: impl Into<eid::EndpointId>, dest: impl Into<eid::EndpointId>) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
            replyto: eid::EndpointId::null(),
            prevhop: eid::EndpointId::null(),
            custodian: eid::EndpointId::null(),
            creation_ts: None,
            expiration: 3600,
            priority: Priority::default(),
            custody_requested: false,
            is_admin: false,
            receipts: ReceiptFlags::default(),
            fragment: None,
            payload: Bytes::new(),
            local_custody: false,
            in_datastore: false,
            store_key: None,
        }
    }

    pub fn replyto(mut self, replyto: impl Into<eid::EndpointId>) -> Self {
        self.replyto = replyto.into();
        self
    }

    pub fn prevhop(mut self, prevhop: impl Into<eid::EndpointId>) -> Self {
        self.prevhop = prevhop.into();
        self
    }

    pub fn custodian(mut self, custodian: impl Into<eid::EndpointId>) -> Self {
        self.custodian = custodian.into();
        self
    }

    pub fn creation_ts(mut self, creation_ts: CreationTimestamp) -> Self {
        self.creation_ts = Some(creation_ts);
        self
    }

    pub fn expiration(mut self, seconds: u64) -> Self {
        self.expiration = seconds;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn custody_requested(mut self, requested: bool) -> Self {
        self.custody_requested = requested;
        self
    }

    pub fn admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }

    pub fn receipts(mut self, receipts: ReceiptFlags) -> Self {
        self.receipts = receipts;
        self
    }

    pub fn fragment(mut self, fragment: Option<FragmentInfo>) -> Self {
        self.fragment = fragment;
        self
    }

    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub(crate) fn local_custody(mut self, local_custody: bool) -> Self {
        self.local_custody = local_custody;
        self
    }

    pub(crate) fn in_datastore(mut self, in_datastore: bool) -> Self {
        self.in_datastore = in_datastore;
        self
    }

    pub(crate) fn store_key(mut self, key: String) -> Self {
        self.store_key = Some(key);
        self
    }

    /// Copies every protocol field of `bundle`, leaving the payload for the caller to replace.
    pub(crate) fn from_bundle(bundle: &Bundle) -> Self {
        Self {
            source: bundle.source.clone(),
            dest: bundle.dest.clone(),
            replyto: bundle.replyto.clone(),
            prevhop: bundle.prevhop.clone(),
            custodian: bundle.custodian(),
            creation_ts: Some(bundle.creation_ts),
            expiration: bundle.expiration,
            priority: bundle.priority,
            custody_requested: bundle.custody_requested,
            is_admin: bundle.is_admin,
            receipts: bundle.receipts,
            fragment: bundle.fragment,
            payload: bundle.payload.clone(),
            local_custody: false,
            in_datastore: false,
            store_key: None,
        }
    }

    pub fn build(self, table: &BundleTable) -> BundleRef {
        table.create(self)
    }

    pub(crate) fn into_bundle(
        self,
        id: BundleId,
        session: u64,
        events: event::EventSender,
    ) -> Bundle {
        let creation_ts = self.creation_ts.unwrap_or_else(CreationTimestamp::now);
        let store_key = self.store_key.unwrap_or_else(|| {
            let gbof_id = GbofId {
                source: self.source.clone(),
                creation_ts,
                fragment: self.fragment.map(|f| (f.offset, self.payload.len())),
            };
            format!("{gbof_id}#{session:x}.{}", id.0)
        });
        Bundle {
            id,
            source: self.source,
            dest: self.dest,
            replyto: self.replyto,
            prevhop: self.prevhop,
            creation_ts,
            expiration: self.expiration,
            priority: self.priority,
            custody_requested: self.custody_requested,
            is_admin: self.is_admin,
            receipts: self.receipts,
            fragment: self.fragment,
            payload: self.payload,
            store_key,
            refcount: AtomicUsize::new(0),
            events,
            state: Mutex::new(BundleState {
                custodian: self.custodian,
                local_custody: self.local_custody,
                in_datastore: self.in_datastore,
                fwdlog: ForwardingLog::default(),
                custody_timers: Vec::new(),
                expiration_timer: None,
                mappings: BTreeSet::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creation_timestamps_are_unique() {
        let a = CreationTimestamp::now();
        let b = CreationTimestamp::now();
        assert_ne!(a, b);
        assert!(a.to_datetime() > dtn_epoch());
    }

    #[test]
    fn gbof_display() {
        let id = GbofId {
            source: "dtn://a/app".into(),
            creation_ts: CreationTimestamp { seconds: 10, seqno: 2 },
            fragment: Some((100, 50)),
        };
        assert_eq!(id.to_string(), "dtn://a/app,10.2,100,50");
    }

    #[test]
    fn expiry_is_creation_plus_lifetime() {
        let table = BundleTable::new(event::channel().0);
        let ts = CreationTimestamp::now();
        let bundle = BundleBuilder::new("dtn://a/app", "dtn://b/app")
            .creation_ts(ts)
            .expiration(60)
            .build(&table);

        assert_eq!(bundle.expiry(), ts.to_datetime() + time::Duration::seconds(60));
        assert!(!bundle.has_expired());
        assert_eq!(bundle.orig_length(), 0);
        assert!(bundle.custodian().is_null());
    }
}
