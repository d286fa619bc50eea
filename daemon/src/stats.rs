use core::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Counter {
    Received,
    Delivered,
    Generated,
    Transmitted,
    Expired,
    Duplicate,
}

impl Counter {
    fn metric(&self) -> &'static str {
        match self {
            Self::Received => "dtnd_bundles_received",
            Self::Delivered => "dtnd_bundles_delivered",
            Self::Generated => "dtnd_bundles_generated",
            Self::Transmitted => "dtnd_bundles_transmitted",
            Self::Expired => "dtnd_bundles_expired",
            Self::Duplicate => "dtnd_bundles_duplicate",
        }
    }
}

/// Running totals, shared between the daemon loop and its handles.
#[derive(Default)]
pub(crate) struct Counters {
    received: AtomicU64,
    delivered: AtomicU64,
    generated: AtomicU64,
    transmitted: AtomicU64,
    expired: AtomicU64,
    duplicate: AtomicU64,
    events_processed: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        metrics::describe_counter!(
            Counter::Received.metric(),
            metrics::Unit::Count,
            "Total number of bundles received, from peers, applications or storage"
        );
        metrics::describe_counter!(
            Counter::Delivered.metric(),
            metrics::Unit::Count,
            "Total number of bundles delivered to local registrations"
        );
        metrics::describe_counter!(
            Counter::Generated.metric(),
            metrics::Unit::Count,
            "Total number of administrative bundles generated"
        );
        metrics::describe_counter!(
            Counter::Transmitted.metric(),
            metrics::Unit::Count,
            "Total number of bundles transmitted on links"
        );
        metrics::describe_counter!(
            Counter::Expired.metric(),
            metrics::Unit::Count,
            "Total number of bundles whose lifetime expired"
        );
        metrics::describe_counter!(
            Counter::Duplicate.metric(),
            metrics::Unit::Count,
            "Total number of duplicate bundles received"
        );
        Self::default()
    }

    fn counter(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::Received => &self.received,
            Counter::Delivered => &self.delivered,
            Counter::Generated => &self.generated,
            Counter::Transmitted => &self.transmitted,
            Counter::Expired => &self.expired,
            Counter::Duplicate => &self.duplicate,
        }
    }

    pub fn incr(&self, counter: Counter) {
        self.counter(counter).fetch_add(1, Ordering::Relaxed);
        metrics::counter!(counter.metric()).increment(1);
    }

    pub fn event_processed(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn events_processed(&self) -> u64 {
        self.events_processed.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        for c in [
            &self.received,
            &self.delivered,
            &self.generated,
            &self.transmitted,
            &self.expired,
            &self.duplicate,
            &self.events_processed,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self, pending: usize, custody: usize) -> BundleStats {
        BundleStats {
            pending,
            custody,
            received: self.received.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            generated: self.generated.load(Ordering::Relaxed),
            transmitted: self.transmitted.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            duplicate: self.duplicate.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BundleStats {
    pub pending: usize,
    pub custody: usize,
    pub received: u64,
    pub delivered: u64,
    pub generated: u64,
    pub transmitted: u64,
    pub expired: u64,
    pub duplicate: u64,
}

impl core::fmt::Display for BundleStats {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} pending -- {} custody -- {} received -- {} delivered -- {} generated -- \
             {} transmitted -- {} expired -- {} duplicate",
            self.pending,
            self.custody,
            self.received,
            self.delivered,
            self.generated,
            self.transmitted,
            self.expired,
            self.duplicate
        )
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DaemonStats {
    pub pending_events: usize,
    pub processed_events: u64,
}

impl core::fmt::Display for DaemonStats {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{} pending_events -- {} processed_events",
            self.pending_events, self.processed_events
        )
    }
}
