//! The daemon event loop.
//!
//! [`Daemon::run`] pops one event at a time and hands it to the matching
//! handler on [`DaemonCore`]. Events posted by handlers at the head of the
//! queue are processed before anything waiting in the channel. Once the
//! daemon is done with an event the router and the contact manager observe
//! it, unless it was marked daemon-only.

use super::*;
use event::{Event, EventKind};
use std::collections::VecDeque;

mod bundles;
mod custodian;
mod handle;
mod links;
mod pending;
mod registrations;
mod report;

pub use handle::DaemonHandle;

/// The state the event handlers operate on.
///
/// Routers are handed a `&mut DaemonCore` for every event they observe.
pub struct DaemonCore {
    config: config::Config,
    bundles: Arc<bundle::BundleTable>,
    pending: Arc<bundle::BundleList>,
    custody: Arc<bundle::BundleList>,
    links: link::LinkTable,
    registrations: reg::RegistrationTable,
    fragments: fragment::FragmentManager,
    actions: BundleActions,
    clas: Arc<cla::Registry>,
    events: event::EventSender,
    head: VecDeque<Event>,
    timers: dtnd_async::TaskPool,
    counters: Arc<stats::Counters>,
    shutdown_hook: Option<Box<dyn FnOnce() + Send>>,
    should_stop: bool,
}

impl DaemonCore {
    fn new(
        config: config::Config,
        storage: Arc<dyn storage::BundleStorage>,
        events: event::EventSender,
    ) -> Self {
        let bundles = Arc::new(bundle::BundleTable::new(events.clone()));
        let clas = Arc::new(cla::Registry::default());
        let actions = BundleActions::new(
            storage::Store::new(storage),
            clas.clone(),
            events.clone(),
        );

        let mut registrations = reg::RegistrationTable::default();
        registrations.add(Arc::new(reg::admin::AdminRegistration::new(
            config.local_eid.clone(),
            events.clone(),
        )));

        Self {
            bundles,
            pending: Arc::new(bundle::BundleList::new(
                "pending_bundles",
                bundle::ListKind::Pending,
            )),
            custody: Arc::new(bundle::BundleList::new(
                "custody_bundles",
                bundle::ListKind::Custody,
            )),
            links: link::LinkTable::default(),
            registrations,
            fragments: fragment::FragmentManager::default(),
            actions,
            clas,
            events,
            head: VecDeque::new(),
            timers: dtnd_async::TaskPool::new(),
            counters: Arc::new(stats::Counters::new()),
            shutdown_hook: None,
            should_stop: false,
            config,
        }
    }

    pub fn config(&self) -> &config::Config {
        &self.config
    }

    pub fn local_eid(&self) -> &eid::EndpointId {
        &self.config.local_eid
    }

    pub fn bundles(&self) -> &Arc<bundle::BundleTable> {
        &self.bundles
    }

    pub fn pending(&self) -> &bundle::BundleList {
        &self.pending
    }

    pub fn custody(&self) -> &bundle::BundleList {
        &self.custody
    }

    pub fn links(&self) -> &link::LinkTable {
        &self.links
    }

    pub fn actions(&self) -> &BundleActions {
        &self.actions
    }

    /// True if some local registration would take a bundle for `dest`.
    pub fn is_local(&self, dest: &eid::EndpointId) -> bool {
        !self.registrations.get_matching(dest).is_empty()
    }

    pub(crate) fn events(&self) -> &event::EventSender {
        &self.events
    }

    pub(crate) fn timers(&self) -> &dtnd_async::TaskPool {
        &self.timers
    }

    /// Posts `event` to the back of the queue.
    pub fn post(&self, event: Event) {
        self.events.post(event);
    }

    /// Queues `event` ahead of everything waiting in the channel.
    pub(crate) fn post_at_head(&mut self, event: Event) {
        self.head.push_back(event);
    }

    /// Sends `bundle` on `link`, with the configured custody timer unless `custody_spec` overrides it.
    #[cfg_attr(feature = "instrument", instrument(skip(self, bundle)))]
    pub fn forward_bundle(
        &mut self,
        bundle: &bundle::BundleRef,
        link: &link::LinkRef,
        action: bundle::ForwardingAction,
        custody_spec: Option<CustodyTimerSpec>,
    ) -> Result<(), link::AdmissionError> {
        link.admit(bundle)?;

        // Links outlive the adapter that created them
        if self.clas.find(link.clayer_name()).is_none() {
            return Err(link::AdmissionError::NoConvergenceLayer(
                link.name().to_string(),
                link.clayer_name().to_string(),
            ));
        }

        let spec = custody_spec.unwrap_or(self.config.custody_timer);
        if !self.actions.send_bundle(bundle, link, action, spec) {
            return Err(link::AdmissionError::Refused(link.name().to_string()));
        }
        Ok(())
    }

    fn dispatch(&mut self, event: &mut Event) {
        let daemon_only = match &mut event.kind {
            EventKind::BundleReceived {
                bundle,
                source,
                bytes_received,
            } => self.handle_bundle_received(bundle, *source, *bytes_received),
            EventKind::BundleTransmitted {
                bundle,
                link,
                bytes_sent,
                acked,
            } => {
                self.handle_bundle_transmitted(bundle, link, *bytes_sent, *acked);
                false
            }
            EventKind::BundleTransmitFailed { bundle, link } => {
                self.handle_bundle_transmit_failed(bundle, link);
                false
            }
            EventKind::BundleDelivered { bundle, regid } => {
                self.handle_bundle_delivered(bundle, *regid);
                false
            }
            EventKind::BundleExpired { bundle } => self.handle_bundle_expired(bundle),
            EventKind::BundleFree { bundle } => {
                self.handle_bundle_free(bundle);
                true
            }
            EventKind::RegistrationAdded { registration } => {
                self.handle_registration_added(registration);
                false
            }
            EventKind::RegistrationRemoved { regid } => {
                self.handle_registration_removed(*regid);
                false
            }
            EventKind::RegistrationExpired { regid } => {
                self.handle_registration_expired(*regid);
                false
            }
            EventKind::LinkCreated { link } => self.handle_link_created(link),
            EventKind::LinkDeleted { link } => {
                self.handle_link_deleted(link);
                false
            }
            EventKind::LinkAvailable { link, reason } => {
                self.handle_link_available(link, *reason);
                false
            }
            EventKind::LinkUnavailable { link, reason } => {
                info!("LINK_UNAVAILABLE {} ({reason})", link.name());
                false
            }
            EventKind::LinkBusy { link } => {
                self.handle_link_busy(link);
                false
            }
            EventKind::LinkStateChangeRequest {
                link,
                state,
                reason,
                contact,
            } => {
                self.handle_link_state_change_request(link, *state, *reason, *contact);
                true
            }
            EventKind::ContactUp { link, contact } => self.handle_contact_up(link, *contact),
            EventKind::ContactDown { link, reason } => {
                info!("CONTACT_DOWN {} ({reason})", link.name());
                false
            }
            EventKind::ReassemblyCompleted { bundle, fragments } => {
                self.handle_reassembly_completed(bundle, fragments);
                false
            }
            EventKind::RouteAdd { dest, link } => {
                info!("ROUTE_ADD {dest} -> {link}");
                false
            }
            EventKind::RouteDel { dest } => {
                info!("ROUTE_DEL {dest}");
                false
            }
            EventKind::CustodySignal { signal } => {
                self.handle_custody_signal(signal);
                false
            }
            EventKind::CustodyTimeout { bundle, link } => {
                self.handle_custody_timeout(bundle, link);
                false
            }
            EventKind::Shutdown => {
                self.handle_shutdown();
                false
            }
            EventKind::ResetStats => {
                info!("RESET_STATS");
                self.counters.reset();
                for link in self.links.iter() {
                    link.reset_stats();
                }
                true
            }
            EventKind::StatusRequest => {
                debug!("STATUS_REQUEST");
                true
            }
            // Answered by the Daemon, which owns the router
            EventKind::RoutingStateQuery { .. } => true,
        };

        if daemon_only {
            event.daemon_only = true;
        }
    }

    fn handle_shutdown(&mut self) {
        info!("SHUTDOWN: closing open links");

        let links: Vec<link::LinkRef> = self.links.iter().cloned().collect();
        for link in links {
            let state = link.state();
            if state.is_open() || state == link::LinkState::Opening {
                self.actions.close_link(&link);
                link.set_state(link::LinkState::Unavailable);
            }
        }

        if let Some(hook) = self.shutdown_hook.take() {
            hook();
        }
        self.should_stop = true;
    }

    async fn shutdown(&mut self) {
        self.timers.shutdown().await;
        self.clas.shutdown();
        self.actions.store().flush().await;
        self.actions.store().shutdown().await;
    }
}

/// Owns the event loop.
pub struct Daemon {
    core: DaemonCore,
    router: Box<dyn router::Router>,
    contacts: contacts::ContactManager,
    rx: event::EventReceiver,
}

impl Daemon {
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: config::Config,
        storage: Arc<dyn storage::BundleStorage>,
        router: Box<dyn router::Router>,
    ) -> Self {
        let (events, rx) = event::channel();
        let contacts = contacts::ContactManager::new(config.link_retry);
        Self {
            core: DaemonCore::new(config, storage, events),
            router,
            contacts,
            rx,
        }
    }

    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle::new(&self.core)
    }

    /// Runs `hook` while processing the shutdown event.
    pub fn set_shutdown_hook(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.core.shutdown_hook = Some(Box::new(hook));
    }

    /// Runs the loop on a new task.
    pub fn spawn(self) -> (DaemonHandle, tokio::task::JoinHandle<()>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run()))
    }

    pub async fn run(mut self) {
        info!(
            "Daemon starting on {} with the {} router",
            self.core.config.local_eid,
            self.router.name()
        );

        self.router.initialize(&mut self.core);
        self.load_bundles().await;

        let threshold = std::time::Duration::from_millis(self.core.config.slow_event_threshold_ms);
        while !self.core.should_stop {
            let event = match self.core.head.pop_front() {
                Some(event) => event,
                None => match self.rx.recv().await {
                    Some(event) => event,
                    None => break,
                },
            };

            let name = event.name();
            let started = std::time::Instant::now();
            self.handle_event(event);

            let elapsed = started.elapsed();
            if elapsed > threshold {
                warn!("{name} event took {} ms to process", elapsed.as_millis());
            }
        }

        self.core.shutdown().await;
        info!("Daemon stopped");
    }

    async fn load_bundles(&mut self) {
        let records = self.core.actions.store().recover().await;
        if records.is_empty() {
            return;
        }

        info!("Loading {} bundles from storage", records.len());
        for record in records {
            let bundle = record.into_builder().build(&self.core.bundles);
            let len = bundle.payload_len();
            self.handle_event(Event::bundle_received(
                bundle,
                event::EventSource::Store,
                len,
            ));
        }
    }

    fn handle_event(&mut self, mut event: Event) {
        if let EventKind::RoutingStateQuery { reply } = &mut event.kind {
            debug!("ROUTING_STATE_QUERY");
            if let Some(reply) = reply.take() {
                let mut out = String::new();
                self.router.routing_state(&mut out);
                self.core.links.dump(&mut out);
                self.contacts.dump(&mut out);
                _ = reply.send(out);
            }
            event.daemon_only = true;
        } else {
            self.core.dispatch(&mut event);
        }

        if !event.daemon_only {
            self.router.handle_event(&event, &mut self.core);
            self.contacts.handle_event(&event, &mut self.core);
        }

        self.core.counters.event_processed();
        if let Some(processed) = event.processed.take() {
            _ = processed.send(());
        }
    }
}

#[cfg(test)]
mod tests;
