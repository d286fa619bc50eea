use super::*;
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;

mod table;

pub use table::LinkTable;

pub type LinkRef = Arc<Link>;

/// Link states. Transitions are driven only by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    Unavailable,
    Available,
    Opening,
    Open,
    /// Open, but the transport cannot currently accept more bundles.
    Busy,
    Closing,
}

impl LinkState {
    /// A contact is established, whether or not the transport is busy.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open | Self::Busy)
    }
}

impl core::fmt::Display for LinkState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Unavailable => "UNAVAILABLE",
            Self::Available => "AVAILABLE",
            Self::Opening => "OPENING",
            Self::Open => "OPEN",
            Self::Busy => "BUSY",
            Self::Closing => "CLOSING",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkType {
    /// Kept open at all times, reopened whenever it drops.
    AlwaysOn,
    /// Opened when there is traffic, reopened after failures.
    OnDemand,
    /// Opened and closed by a schedule outside the daemon.
    Scheduled,
    /// Becomes available only when the transport discovers the peer.
    Opportunistic,
}

impl LinkType {
    /// The state a newly created link starts in.
    pub fn initial_state(&self) -> LinkState {
        match self {
            Self::AlwaysOn | Self::OnDemand => LinkState::Available,
            Self::Scheduled | Self::Opportunistic => LinkState::Unavailable,
        }
    }
}

/// Identifies one contact (session) on a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContactId(u64);

impl core::fmt::Display for ContactId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "contact#{}", self.0)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkParams {
    /// Largest payload the link accepts, zero for no limit.
    pub mtu: usize,
    /// The transport reports how many bytes the peer acknowledged.
    pub reliable: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    pub contact_attempts: u64,
    pub contacts: u64,
    pub bundles_transmitted: u64,
    pub bytes_transmitted: u64,
    pub bundles_inflight: u64,
    pub bytes_inflight: u64,
    pub bundles_cancelled: u64,
}

/// Reasons a link refuses a bundle.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("Link {0} is {1}, not OPEN")]
    NotOpen(String, LinkState),

    #[error("Bundle is already in flight on link {0}")]
    AlreadyInFlight(String),

    #[error("Bundle payload of {len} bytes exceeds link MTU of {mtu}")]
    ExceedsMtu { len: usize, mtu: usize },

    #[error("Link {0} uses convergence layer {1}, which is not registered")]
    NoConvergenceLayer(String, String),

    #[error("Convergence layer refused the bundle on link {0}")]
    Refused(String),
}

struct LinkInner {
    state: LinkState,
    contact: Option<ContactId>,
    stats: LinkStats,
    retry_interval: u64,
}

/// A path to a next hop through one convergence layer.
pub struct Link {
    name: Arc<str>,
    clayer: Arc<str>,
    nexthop: Arc<str>,
    link_type: LinkType,
    params: LinkParams,
    /// Bundles waiting for the link to open.
    pub queue: bundle::BundleList,
    /// Bundles handed to the convergence layer and not yet reported on.
    pub inflight: bundle::BundleList,
    inner: Mutex<LinkInner>,
}

impl Link {
    /// Creates a link in the UNAVAILABLE state.
    ///
    /// The daemon moves it to its initial state when it handles `LinkCreated`.
    pub fn new(
        name: &str,
        clayer: &str,
        nexthop: &str,
        link_type: LinkType,
        params: LinkParams,
    ) -> LinkRef {
        Arc::new(Self {
            name: Arc::from(name),
            clayer: Arc::from(clayer),
            nexthop: Arc::from(nexthop),
            link_type,
            params,
            queue: bundle::BundleList::new(format!("{name}:queue"), bundle::ListKind::LinkQueue),
            inflight: bundle::BundleList::new(
                format!("{name}:inflight"),
                bundle::ListKind::LinkInflight,
            ),
            inner: Mutex::new(LinkInner {
                state: LinkState::Unavailable,
                contact: None,
                stats: LinkStats::default(),
                retry_interval: 0,
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LinkInner> {
        self.inner.lock().trace_expect("Failed to lock mutex")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> Arc<str> {
        self.name.clone()
    }

    pub fn clayer_name(&self) -> &str {
        &self.clayer
    }

    pub(crate) fn clayer_name_arc(&self) -> Arc<str> {
        self.clayer.clone()
    }

    pub fn nexthop(&self) -> &str {
        &self.nexthop
    }

    pub(crate) fn nexthop_arc(&self) -> Arc<str> {
        self.nexthop.clone()
    }

    pub fn link_type(&self) -> LinkType {
        self.link_type
    }

    pub fn params(&self) -> LinkParams {
        self.params
    }

    pub fn is_reliable(&self) -> bool {
        self.params.reliable
    }

    pub fn state(&self) -> LinkState {
        self.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    pub(crate) fn set_state(&self, state: LinkState) {
        let mut inner = self.lock();
        debug!("Link {} state {} -> {state}", self.name, inner.state);
        inner.state = state;
    }

    /// The contact most recently opened on this link, if any.
    pub fn contact(&self) -> Option<ContactId> {
        self.lock().contact
    }

    pub(crate) fn new_contact(&self) -> ContactId {
        static NEXT_CONTACT: AtomicU64 = AtomicU64::new(1);

        let contact = ContactId(NEXT_CONTACT.fetch_add(1, Ordering::Relaxed));
        let mut inner = self.lock();
        inner.contact = Some(contact);
        inner.stats.contact_attempts += 1;
        contact
    }

    pub(crate) fn clear_contact(&self) {
        self.lock().contact = None;
    }

    pub fn stats(&self) -> LinkStats {
        self.lock().stats
    }

    pub(crate) fn update_stats(&self, f: impl FnOnce(&mut LinkStats)) {
        f(&mut self.lock().stats)
    }

    pub(crate) fn reset_stats(&self) {
        let mut inner = self.lock();
        // In-flight counts describe current state, not history
        let LinkStats {
            bundles_inflight,
            bytes_inflight,
            ..
        } = inner.stats;
        inner.stats = LinkStats {
            bundles_inflight,
            bytes_inflight,
            ..Default::default()
        };
    }

    pub(crate) fn retry_interval(&self) -> u64 {
        self.lock().retry_interval
    }

    pub(crate) fn set_retry_interval(&self, seconds: u64) {
        self.lock().retry_interval = seconds;
    }

    /// Checks that `bundle` may be handed to the convergence layer now.
    pub fn admit(&self, bundle: &bundle::Bundle) -> Result<(), AdmissionError> {
        let state = self.state();
        if state != LinkState::Open {
            return Err(AdmissionError::NotOpen(self.name.to_string(), state));
        }

        if bundle.lock().fwdlog.get_latest_entry_state(self) == bundle::ForwardingState::InFlight {
            return Err(AdmissionError::AlreadyInFlight(self.name.to_string()));
        }

        if self.params.mtu != 0 && bundle.payload_len() > self.params.mtu {
            return Err(AdmissionError::ExceedsMtu {
                len: bundle.payload_len(),
                mtu: self.params.mtu,
            });
        }
        Ok(())
    }
}

impl core::fmt::Display for Link {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} [{} {}] {:?} {}",
            self.name,
            self.clayer,
            self.nexthop,
            self.link_type,
            self.state()
        )
    }
}

impl core::fmt::Debug for Link {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Link")
            .field("name", &self.name)
            .field("clayer", &self.clayer)
            .field("nexthop", &self.nexthop)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
