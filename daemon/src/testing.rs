//! In-memory collaborators for exercising the daemon in tests.

use super::*;
use event::{Event, EventKind};
use std::sync::Mutex;

/// A convergence layer that records every call and never touches a network.
#[derive(Default)]
pub struct RecordingCla {
    sink: Mutex<Option<cla::Sink>>,
    /// Report `ContactUp` as soon as a contact is opened.
    auto_contact: bool,
    opened: Mutex<Vec<(String, link::ContactId)>>,
    closed: Mutex<Vec<String>>,
    sent: Mutex<Vec<(String, bundle::BundleRef)>>,
    cancelled: Mutex<Vec<(String, bundle::BundleId)>>,
}

impl RecordingCla {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_auto_contact() -> Arc<Self> {
        Arc::new(Self {
            auto_contact: true,
            ..Default::default()
        })
    }

    pub fn sink(&self) -> cla::Sink {
        self.sink
            .lock()
            .trace_expect("Failed to lock mutex")
            .clone()
            .trace_expect("RecordingCla has not been registered")
    }

    pub fn opened(&self) -> Vec<(String, link::ContactId)> {
        self.opened.lock().trace_expect("Failed to lock mutex").clone()
    }

    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().trace_expect("Failed to lock mutex").clone()
    }

    pub fn cancelled(&self) -> Vec<(String, bundle::BundleId)> {
        self.cancelled
            .lock()
            .trace_expect("Failed to lock mutex")
            .clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().trace_expect("Failed to lock mutex").len()
    }

    /// Takes the bundles handed over so far, with the name of the link they went to.
    pub fn take_sent(&self) -> Vec<(String, bundle::BundleRef)> {
        core::mem::take(&mut *self.sent.lock().trace_expect("Failed to lock mutex"))
    }
}

impl cla::ConvergenceLayer for RecordingCla {
    fn on_register(&self, sink: cla::Sink) {
        *self.sink.lock().trace_expect("Failed to lock mutex") = Some(sink);
    }

    fn on_unregister(&self) {
        self.sink.lock().trace_expect("Failed to lock mutex").take();
    }

    fn open_contact(&self, link: &link::LinkRef, contact: link::ContactId) -> bool {
        self.opened
            .lock()
            .trace_expect("Failed to lock mutex")
            .push((link.name().to_string(), contact));
        if self.auto_contact
            && let Some(sink) = self.sink.lock().trace_expect("Failed to lock mutex").as_ref()
        {
            sink.contact_up(link, contact);
        }
        true
    }

    fn close_contact(&self, link: &link::LinkRef) -> bool {
        self.closed
            .lock()
            .trace_expect("Failed to lock mutex")
            .push(link.name().to_string());
        true
    }

    fn send_bundle(&self, link: &link::LinkRef, bundle: bundle::BundleRef) -> bool {
        self.sent
            .lock()
            .trace_expect("Failed to lock mutex")
            .push((link.name().to_string(), bundle));
        true
    }

    fn cancel_bundle(&self, link: &link::LinkRef, bundle: &bundle::BundleRef) -> bool {
        self.cancelled
            .lock()
            .trace_expect("Failed to lock mutex")
            .push((link.name().to_string(), bundle.id()));
        self.sent
            .lock()
            .trace_expect("Failed to lock mutex")
            .retain(|(name, b)| !(name == link.name() && b.ptr_eq(bundle)));
        true
    }
}

/// What a [`RecordingRegistration`] saw.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: bundle::BundleId,
    pub source: eid::EndpointId,
    pub is_admin: bool,
    pub payload: Bytes,
}

/// A registration that records deliveries and acknowledges them at once.
pub struct RecordingRegistration {
    regid: reg::RegistrationId,
    endpoint: eid::EndpointId,
    events: event::EventSender,
    active: bool,
    delivered: Mutex<Vec<Delivery>>,
}

impl RecordingRegistration {
    pub fn new(
        regid: reg::RegistrationId,
        endpoint: impl Into<eid::EndpointId>,
        events: event::EventSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            regid,
            endpoint: endpoint.into(),
            events,
            active: false,
            delivered: Mutex::new(Vec::new()),
        })
    }

    /// A registration an application is still bound to.
    pub fn new_active(
        regid: reg::RegistrationId,
        endpoint: impl Into<eid::EndpointId>,
        events: event::EventSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            regid,
            endpoint: endpoint.into(),
            events,
            active: true,
            delivered: Mutex::new(Vec::new()),
        })
    }

    pub fn delivered(&self) -> Vec<Delivery> {
        self.delivered
            .lock()
            .trace_expect("Failed to lock mutex")
            .clone()
    }

    /// Administrative records delivered so far, decoded.
    pub fn admin_records(&self) -> Vec<admin::AdminRecord> {
        self.delivered()
            .iter()
            .filter(|d| d.is_admin)
            .filter_map(|d| admin::AdminRecord::decode(&d.payload).ok())
            .collect()
    }

    /// Status reports delivered so far with the given flag.
    pub fn status_reports(&self, flag: admin::StatusFlag) -> Vec<admin::StatusReport> {
        self.admin_records()
            .into_iter()
            .filter_map(|r| match r {
                admin::AdminRecord::StatusReport(report) if report.flag == flag => Some(report),
                _ => None,
            })
            .collect()
    }
}

impl reg::Registration for RecordingRegistration {
    fn regid(&self) -> reg::RegistrationId {
        self.regid
    }

    fn endpoint(&self) -> &eid::EndpointId {
        &self.endpoint
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn deliver_bundle(&self, bundle: bundle::BundleRef) {
        self.delivered
            .lock()
            .trace_expect("Failed to lock mutex")
            .push(Delivery {
                id: bundle.id(),
                source: bundle.source.clone(),
                is_admin: bundle.is_admin,
                payload: bundle.payload.clone(),
            });
        self.events.post(Event::new(EventKind::BundleDelivered {
            bundle,
            regid: self.regid,
        }));
    }
}

/// A router that sends every non-local pending bundle on every open link.
///
/// A bundle whose last attempt on a link failed or timed out is sent again
/// at the next contact, or right away after a custody timeout.
#[derive(Default)]
pub struct EagerRouter {
    seen: Arc<Mutex<Vec<&'static str>>>,
}

impl EagerRouter {
    pub fn new() -> Self {
        Default::default()
    }

    /// Names of the events the router has observed, shared with the router.
    pub fn seen(&self) -> Arc<Mutex<Vec<&'static str>>> {
        self.seen.clone()
    }

    fn try_forward(core: &mut daemon::DaemonCore, bundle: &bundle::BundleRef, link: &link::LinkRef) {
        if core.is_local(&bundle.dest) || !core.pending().contains(bundle) {
            return;
        }
        if link.state() != link::LinkState::Open {
            return;
        }
        let state = bundle.lock().fwdlog.get_latest_entry_state(link);
        if matches!(
            state,
            bundle::ForwardingState::InFlight | bundle::ForwardingState::Transmitted
        ) {
            return;
        }
        if let Err(e) = core.forward_bundle(bundle, link, bundle::ForwardingAction::Forward, None) {
            debug!("Not forwarding bundle {}: {e}", bundle.id());
        }
    }

    fn forward_everywhere(core: &mut daemon::DaemonCore, bundle: &bundle::BundleRef) {
        let links: Vec<link::LinkRef> = core.links().iter().cloned().collect();
        for link in links {
            Self::try_forward(core, bundle, &link);
        }
    }
}

impl router::Router for EagerRouter {
    fn name(&self) -> &str {
        "eager"
    }

    fn handle_event(&mut self, event: &Event, core: &mut daemon::DaemonCore) {
        self.seen
            .lock()
            .trace_expect("Failed to lock mutex")
            .push(event.name());

        match &event.kind {
            EventKind::BundleReceived { bundle, .. } => Self::forward_everywhere(core, bundle),
            EventKind::ContactUp { link, .. } => {
                for bundle in core.pending().snapshot() {
                    Self::try_forward(core, &bundle, link);
                }
            }
            EventKind::CustodyTimeout { bundle, link } => Self::try_forward(core, bundle, link),
            _ => {}
        }
    }

    fn routing_state(&self, out: &mut String) {
        out.push_str("eager router: every open link\n");
    }
}

/// A daemon running on its own task with a recording CLA, router and registration.
pub struct Harness {
    pub handle: daemon::DaemonHandle,
    pub cla: Arc<RecordingCla>,
    /// Registered at `dtn://local.dtn/app*`.
    pub app: Arc<RecordingRegistration>,
    pub seen: Arc<Mutex<Vec<&'static str>>>,
    pub storage: Arc<dyn storage::BundleStorage>,
    links: Mutex<Vec<link::LinkRef>>,
    task: tokio::task::JoinHandle<()>,
}

impl Harness {
    pub const LOCAL_EID: &'static str = "dtn://local.dtn";
    pub const APP_EID: &'static str = "dtn://local.dtn/app*";
    pub const CLA: &'static str = "test";

    pub fn config() -> config::Config {
        config::Config {
            local_eid: Self::LOCAL_EID.into(),
            ..Default::default()
        }
    }

    pub async fn start(config: config::Config) -> Self {
        Self::start_with(
            config,
            storage::bundle_mem::new(&storage::bundle_mem::Config::default()),
            RecordingCla::with_auto_contact(),
        )
        .await
    }

    pub async fn start_with(
        config: config::Config,
        storage: Arc<dyn storage::BundleStorage>,
        cla: Arc<RecordingCla>,
    ) -> Self {
        let router = EagerRouter::new();
        let seen = router.seen();
        let daemon = daemon::Daemon::new(config, storage.clone(), Box::new(router));
        let (handle, task) = daemon.spawn();

        handle
            .register_cla(Self::CLA, cla.clone())
            .trace_expect("Failed to register CLA");

        let app = RecordingRegistration::new(1, Self::APP_EID, handle.events().clone());
        handle.add_registration(app.clone());

        let harness = Self {
            handle,
            cla,
            app,
            seen,
            storage,
            links: Mutex::new(Vec::new()),
            task,
        };
        harness.settle().await;
        harness
    }

    /// Waits until the daemon has worked through everything queued so far,
    /// including the events that processing posts.
    pub async fn settle(&self) {
        for _ in 0..8 {
            tokio::task::yield_now().await;
            if !self
                .handle
                .post_and_wait(
                    Event::daemon_only(EventKind::StatusRequest),
                    std::time::Duration::from_secs(5),
                )
                .await
            {
                return;
            }
        }
    }

    pub async fn create_link(
        &self,
        name: &str,
        link_type: link::LinkType,
        params: link::LinkParams,
    ) -> link::LinkRef {
        let link = self
            .handle
            .create_link(name, Self::CLA, name, link_type, params);
        self.links
            .lock()
            .trace_expect("Failed to lock mutex")
            .push(link.clone());
        self.settle().await;
        link
    }

    pub async fn open(&self, link: &link::LinkRef) {
        self.handle.post(Event::link_state_change(
            link,
            link::LinkState::Open,
            event::ContactReason::User,
        ));
        self.settle().await;
    }

    /// Reports the transmission of everything sent so far as complete.
    pub async fn transmit_all(&self, acked: bool) -> Vec<bundle::BundleId> {
        let sink = self.cla.sink();
        let mut sent = Vec::new();
        for (name, bundle) in self.cla.take_sent() {
            let Some(link) = self.link(&name) else {
                continue;
            };
            sent.push(bundle.id());
            let len = bundle.payload_len();
            sink.bundle_transmitted(bundle, &link, len, acked);
        }
        self.settle().await;
        sent
    }

    pub fn link(&self, name: &str) -> Option<link::LinkRef> {
        self.links
            .lock()
            .trace_expect("Failed to lock mutex")
            .iter()
            .find(|l| l.name() == name)
            .cloned()
    }

    pub fn seen(&self, name: &str) -> usize {
        self.seen
            .lock()
            .trace_expect("Failed to lock mutex")
            .iter()
            .filter(|n| **n == name)
            .count()
    }

    pub async fn shutdown(self) {
        assert!(
            self.handle
                .shutdown(std::time::Duration::from_secs(5))
                .await
        );
        _ = self.task.await;
    }
}
