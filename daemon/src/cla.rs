//! Convergence layer adapters.
//!
//! A convergence layer moves bundles over a concrete transport. The daemon
//! calls into it from its event loop, so every method must return without
//! waiting on I/O: the adapter starts the work on its own tasks and reports
//! the outcome later through its [`Sink`].

use super::*;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Attempt to register duplicate CLA name {0}")]
    AlreadyExists(String),

    #[error("No CLA registered with name {0}")]
    NotFound(String),
}

pub trait ConvergenceLayer: Send + Sync {
    /// Called once, when the adapter is registered with the daemon.
    fn on_register(&self, sink: Sink);

    /// Called when the adapter is unregistered or the daemon shuts down.
    fn on_unregister(&self) {}

    /// Starts establishing `contact` on `link`.
    ///
    /// Success is reported later with [`Sink::contact_up`].
    fn open_contact(&self, link: &link::LinkRef, contact: link::ContactId) -> bool;

    /// Tears down the current contact on `link`.
    fn close_contact(&self, link: &link::LinkRef) -> bool;

    /// Starts transmitting `bundle` on `link`.
    ///
    /// The outcome is reported with [`Sink::bundle_transmitted`] or
    /// [`Sink::bundle_transmit_failed`].
    fn send_bundle(&self, link: &link::LinkRef, bundle: bundle::BundleRef) -> bool;

    /// Abandons a transmission started by `send_bundle`, if it has not completed.
    fn cancel_bundle(&self, link: &link::LinkRef, bundle: &bundle::BundleRef) -> bool;
}

/// The way back from a convergence layer into the daemon.
#[derive(Clone)]
pub struct Sink {
    events: event::EventSender,
    bundles: Arc<bundle::BundleTable>,
}

impl Sink {
    pub(crate) fn new(events: event::EventSender, bundles: Arc<bundle::BundleTable>) -> Self {
        Self { events, bundles }
    }

    /// Hands a bundle received from a peer to the daemon.
    ///
    /// `bytes_received` smaller than the payload marks a partial reception.
    pub fn receive(&self, builder: bundle::BundleBuilder, bytes_received: usize) {
        let bundle = builder.build(&self.bundles);
        self.events.post(event::Event::bundle_received(
            bundle,
            event::EventSource::Peer,
            bytes_received,
        ));
    }

    pub fn contact_up(&self, link: &link::LinkRef, contact: link::ContactId) {
        self.events.post(event::Event::new(event::EventKind::ContactUp {
            link: link.clone(),
            contact,
        }));
    }

    pub fn contact_down(&self, link: &link::LinkRef, reason: event::ContactReason) {
        self.events.post(event::Event::new(event::EventKind::ContactDown {
            link: link.clone(),
            reason,
        }));
    }

    pub fn link_busy(&self, link: &link::LinkRef) {
        self.events.post(event::Event::new(event::EventKind::LinkBusy {
            link: link.clone(),
        }));
    }

    /// Asks for the link to return from BUSY to OPEN.
    pub fn link_unblocked(&self, link: &link::LinkRef) {
        self.events.post(event::Event::link_state_change(
            link,
            link::LinkState::Available,
            event::ContactReason::Unblocked,
        ));
    }

    /// Asks for the link to be closed, e.g. after the peer hung up.
    pub fn link_closed(&self, link: &link::LinkRef, reason: event::ContactReason) {
        self.events.post(event::Event::link_state_change(
            link,
            link::LinkState::Closing,
            reason,
        ));
    }

    pub fn bundle_transmitted(
        &self,
        bundle: bundle::BundleRef,
        link: &link::LinkRef,
        bytes_sent: usize,
        acked: bool,
    ) {
        self.events
            .post(event::Event::new(event::EventKind::BundleTransmitted {
                bundle,
                link: link.clone(),
                bytes_sent,
                acked,
            }));
    }

    pub fn bundle_transmit_failed(&self, bundle: bundle::BundleRef, link: &link::LinkRef) {
        self.events
            .post(event::Event::new(event::EventKind::BundleTransmitFailed {
                bundle,
                link: link.clone(),
            }));
    }
}

/// Registered convergence layers, by name.
#[derive(Default)]
pub struct Registry {
    clas: Mutex<HashMap<String, Arc<dyn ConvergenceLayer>>>,
}

impl Registry {
    pub(crate) fn register(
        &self,
        name: &str,
        cla: Arc<dyn ConvergenceLayer>,
        sink: Sink,
    ) -> Result<()> {
        match self
            .clas
            .lock()
            .trace_expect("Failed to lock mutex")
            .entry(name.to_string())
        {
            std::collections::hash_map::Entry::Occupied(_) => {
                return Err(Error::AlreadyExists(name.to_string()));
            }
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(cla.clone());
            }
        }

        info!("Registered new CLA: {name}");
        cla.on_register(sink);
        Ok(())
    }

    pub(crate) fn unregister(&self, name: &str) -> Result<()> {
        let cla = self
            .clas
            .lock()
            .trace_expect("Failed to lock mutex")
            .remove(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;

        info!("Unregistered CLA: {name}");
        cla.on_unregister();
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn ConvergenceLayer>> {
        self.clas
            .lock()
            .trace_expect("Failed to lock mutex")
            .get(name)
            .cloned()
    }

    pub(crate) fn shutdown(&self) {
        let clas = core::mem::take(&mut *self.clas.lock().trace_expect("Failed to lock mutex"));
        for (name, cla) in clas {
            debug!("Unregistering CLA: {name}");
            cla.on_unregister();
        }
    }
}
