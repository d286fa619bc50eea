//! Events consumed by the daemon loop.
//!
//! Every producer (convergence layers, timers, registrations, routers and
//! the daemon itself) talks to the loop by posting an [`Event`]. Events are
//! processed one at a time in the order they were posted.

use super::*;

/// Where a received bundle came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    /// A convergence layer.
    Peer,
    /// A local application.
    App,
    /// Generated by the daemon (status reports, custody signals).
    Admin,
    /// Reloaded from storage at startup.
    Store,
    /// Split off or reassembled by the fragment manager.
    Fragmentation,
}

/// Why a link or contact changed state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ContactReason {
    #[default]
    NoInfo,
    User,
    Broken,
    ShuttingDown,
    Reconnect,
    Idle,
    Timeout,
    Blocked,
    Unblocked,
}

impl core::fmt::Display for ContactReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::NoInfo => "no additional info",
            Self::User => "user action",
            Self::Broken => "connection broken",
            Self::ShuttingDown => "peer shut down",
            Self::Reconnect => "reconnecting",
            Self::Idle => "idle connection",
            Self::Timeout => "timeout",
            Self::Blocked => "connection blocked",
            Self::Unblocked => "connection unblocked",
        })
    }
}

pub enum EventKind {
    BundleReceived {
        bundle: bundle::BundleRef,
        source: EventSource,
        /// Fewer bytes than the payload length marks a partial reception.
        bytes_received: usize,
    },
    BundleTransmitted {
        bundle: bundle::BundleRef,
        link: link::LinkRef,
        bytes_sent: usize,
        /// The peer acknowledged the transfer (reliable links only).
        acked: bool,
    },
    BundleTransmitFailed {
        bundle: bundle::BundleRef,
        link: link::LinkRef,
    },
    BundleDelivered {
        bundle: bundle::BundleRef,
        regid: reg::RegistrationId,
    },
    BundleExpired {
        bundle: bundle::BundleRef,
    },
    /// The last [`bundle::BundleRef`] was dropped.
    BundleFree {
        bundle: Arc<bundle::Bundle>,
    },

    RegistrationAdded {
        registration: Arc<dyn reg::Registration>,
    },
    RegistrationRemoved {
        regid: reg::RegistrationId,
    },
    RegistrationExpired {
        regid: reg::RegistrationId,
    },

    LinkCreated {
        link: link::LinkRef,
    },
    LinkDeleted {
        link: link::LinkRef,
    },
    LinkAvailable {
        link: link::LinkRef,
        reason: ContactReason,
    },
    LinkUnavailable {
        link: link::LinkRef,
        reason: ContactReason,
    },
    LinkBusy {
        link: link::LinkRef,
    },
    LinkStateChangeRequest {
        link: link::LinkRef,
        state: link::LinkState,
        reason: ContactReason,
        /// The link's contact when the request was made, to detect stale requests.
        contact: Option<link::ContactId>,
    },
    ContactUp {
        link: link::LinkRef,
        contact: link::ContactId,
    },
    ContactDown {
        link: link::LinkRef,
        reason: ContactReason,
    },

    ReassemblyCompleted {
        bundle: bundle::BundleRef,
        fragments: Vec<bundle::BundleRef>,
    },

    RouteAdd {
        dest: eid::EndpointId,
        link: String,
    },
    RouteDel {
        dest: eid::EndpointId,
    },

    CustodySignal {
        signal: admin::CustodySignal,
    },
    CustodyTimeout {
        bundle: bundle::BundleRef,
        link: link::LinkRef,
    },

    Shutdown,
    ResetStats,
    /// Does nothing. Posting it with a completion notifier waits for the
    /// events queued before it.
    StatusRequest,
    RoutingStateQuery {
        reply: Option<tokio::sync::oneshot::Sender<String>>,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BundleReceived { .. } => "BUNDLE_RECEIVED",
            Self::BundleTransmitted { .. } => "BUNDLE_TRANSMITTED",
            Self::BundleTransmitFailed { .. } => "BUNDLE_TRANSMIT_FAILED",
            Self::BundleDelivered { .. } => "BUNDLE_DELIVERED",
            Self::BundleExpired { .. } => "BUNDLE_EXPIRED",
            Self::BundleFree { .. } => "BUNDLE_FREE",
            Self::RegistrationAdded { .. } => "REGISTRATION_ADDED",
            Self::RegistrationRemoved { .. } => "REGISTRATION_REMOVED",
            Self::RegistrationExpired { .. } => "REGISTRATION_EXPIRED",
            Self::LinkCreated { .. } => "LINK_CREATED",
            Self::LinkDeleted { .. } => "LINK_DELETED",
            Self::LinkAvailable { .. } => "LINK_AVAILABLE",
            Self::LinkUnavailable { .. } => "LINK_UNAVAILABLE",
            Self::LinkBusy { .. } => "LINK_BUSY",
            Self::LinkStateChangeRequest { .. } => "LINK_STATE_CHANGE_REQUEST",
            Self::ContactUp { .. } => "CONTACT_UP",
            Self::ContactDown { .. } => "CONTACT_DOWN",
            Self::ReassemblyCompleted { .. } => "REASSEMBLY_COMPLETED",
            Self::RouteAdd { .. } => "ROUTE_ADD",
            Self::RouteDel { .. } => "ROUTE_DEL",
            Self::CustodySignal { .. } => "CUSTODY_SIGNAL",
            Self::CustodyTimeout { .. } => "CUSTODY_TIMEOUT",
            Self::Shutdown => "SHUTDOWN",
            Self::ResetStats => "RESET_STATS",
            Self::StatusRequest => "STATUS_REQUEST",
            Self::RoutingStateQuery { .. } => "ROUTING_STATE_QUERY",
        }
    }
}

pub struct Event {
    pub kind: EventKind,
    /// Processed by the daemon only, routers and the contact manager never see it.
    pub daemon_only: bool,
    pub(crate) processed: Option<tokio::sync::oneshot::Sender<()>>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            daemon_only: false,
            processed: None,
        }
    }

    pub fn daemon_only(kind: EventKind) -> Self {
        Self {
            kind,
            daemon_only: true,
            processed: None,
        }
    }

    pub fn bundle_received(
        bundle: bundle::BundleRef,
        source: EventSource,
        bytes_received: usize,
    ) -> Self {
        Self::new(EventKind::BundleReceived {
            bundle,
            source,
            bytes_received,
        })
    }

    /// A request for `link` to move to `state`, bound to its current contact.
    pub fn link_state_change(
        link: &link::LinkRef,
        state: link::LinkState,
        reason: ContactReason,
    ) -> Self {
        Self::new(EventKind::LinkStateChangeRequest {
            link: link.clone(),
            state,
            reason,
            contact: link.contact(),
        })
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// Posts events to the daemon loop. Never blocks.
#[derive(Clone)]
pub struct EventSender(flume::Sender<Event>);

impl EventSender {
    pub fn post(&self, event: Event) {
        if let Err(flume::SendError(event)) = self.0.send(event) {
            debug!("Daemon has stopped, dropping {} event", event.name());
        }
    }

    /// Number of events waiting to be processed.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub struct EventReceiver(flume::Receiver<Event>);

impl EventReceiver {
    pub async fn recv(&self) -> Option<Event> {
        self.0.recv_async().await.ok()
    }

    pub fn try_recv(&self) -> Option<Event> {
        self.0.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// An unbounded event queue.
pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = flume::unbounded();
    (EventSender(tx), EventReceiver(rx))
}
