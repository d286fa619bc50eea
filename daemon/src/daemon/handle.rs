use super::*;

/// A cloneable handle for talking to a running daemon from other tasks.
#[derive(Clone)]
pub struct DaemonHandle {
    events: event::EventSender,
    bundles: Arc<bundle::BundleTable>,
    pending: Arc<bundle::BundleList>,
    custody: Arc<bundle::BundleList>,
    clas: Arc<cla::Registry>,
    counters: Arc<stats::Counters>,
    local_eid: eid::EndpointId,
}

impl DaemonHandle {
    pub(super) fn new(core: &DaemonCore) -> Self {
        Self {
            events: core.events.clone(),
            bundles: core.bundles.clone(),
            pending: core.pending.clone(),
            custody: core.custody.clone(),
            clas: core.clas.clone(),
            counters: core.counters.clone(),
            local_eid: core.config.local_eid.clone(),
        }
    }

    pub fn local_eid(&self) -> &eid::EndpointId {
        &self.local_eid
    }

    pub fn bundles(&self) -> &Arc<bundle::BundleTable> {
        &self.bundles
    }

    pub fn events(&self) -> &event::EventSender {
        &self.events
    }

    pub fn post(&self, event: Event) {
        self.events.post(event);
    }

    /// Posts `event` and waits until the daemon has processed it.
    ///
    /// Returns false if the daemon stopped or `timeout` elapsed first.
    pub async fn post_and_wait(&self, mut event: Event, timeout: std::time::Duration) -> bool {
        let (tx, rx) = tokio::sync::oneshot::channel();
        event.processed = Some(tx);
        self.events.post(event);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                debug!("Daemon dropped an event before processing it");
                false
            }
            Err(_) => {
                warn!("Timed out waiting for the daemon to process an event");
                false
            }
        }
    }

    /// Hands a locally generated bundle to the daemon.
    pub fn submit(&self, builder: bundle::BundleBuilder) -> bundle::BundleId {
        let bundle = builder.build(&self.bundles);
        let id = bundle.id();
        let len = bundle.payload_len();
        self.events.post(Event::bundle_received(
            bundle,
            event::EventSource::App,
            len,
        ));
        id
    }

    /// Creates a link and posts `LinkCreated` for the daemon to adopt it.
    pub fn create_link(
        &self,
        name: &str,
        clayer: &str,
        nexthop: &str,
        link_type: link::LinkType,
        params: link::LinkParams,
    ) -> link::LinkRef {
        let link = link::Link::new(name, clayer, nexthop, link_type, params);
        self.events
            .post(Event::new(EventKind::LinkCreated { link: link.clone() }));
        link
    }

    pub fn register_cla(&self, name: &str, cla: Arc<dyn cla::ConvergenceLayer>) -> cla::Result<()> {
        self.clas.register(
            name,
            cla,
            cla::Sink::new(self.events.clone(), self.bundles.clone()),
        )
    }

    pub fn unregister_cla(&self, name: &str) -> cla::Result<()> {
        self.clas.unregister(name)
    }

    pub fn add_registration(&self, registration: Arc<dyn reg::Registration>) {
        self.events
            .post(Event::new(EventKind::RegistrationAdded { registration }));
    }

    pub fn bundle_stats(&self) -> BundleStats {
        self.counters
            .snapshot(self.pending.len(), self.custody.len())
    }

    pub fn daemon_stats(&self) -> DaemonStats {
        DaemonStats {
            pending_events: self.events.len(),
            processed_events: self.counters.events_processed(),
        }
    }

    pub fn reset_stats(&self) {
        self.events.post(Event::daemon_only(EventKind::ResetStats));
    }

    /// Asks the router, links and contact manager to describe themselves.
    pub async fn routing_state(&self) -> Option<String> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.events
            .post(Event::daemon_only(EventKind::RoutingStateQuery { reply: Some(tx) }));
        rx.await.ok()
    }

    /// Stops the daemon, waiting at most `timeout` for it to acknowledge.
    pub async fn shutdown(&self, timeout: std::time::Duration) -> bool {
        self.post_and_wait(Event::new(EventKind::Shutdown), timeout)
            .await
    }
}
