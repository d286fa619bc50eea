//! Persistence of bundles across restarts.
//!
//! The daemon never waits on storage: [`Store`] queues each operation for a
//! background worker that applies them, in order, to a [`BundleStorage`].

use super::*;

pub type Error = Box<dyn core::error::Error + Send + Sync>;
pub type Result<T> = core::result::Result<T, Error>;
pub type Sender<T> = flume::Sender<T>;

pub mod bundle_mem;

/// Everything needed to rebuild a bundle after a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRecord {
    /// Storage key, unique to one copy of a bundle. Copies share a GBOF id.
    pub key: String,
    pub source: eid::EndpointId,
    pub dest: eid::EndpointId,
    pub replyto: eid::EndpointId,
    pub prevhop: eid::EndpointId,
    pub custodian: eid::EndpointId,
    pub local_custody: bool,
    pub creation_ts: bundle::CreationTimestamp,
    pub expiration: u64,
    pub priority: bundle::Priority,
    pub custody_requested: bool,
    pub is_admin: bool,
    pub receipts: bundle::ReceiptFlags,
    pub fragment: Option<bundle::FragmentInfo>,
    pub payload: Bytes,
}

impl BundleRecord {
    pub fn key_of(bundle: &bundle::Bundle) -> String {
        bundle.store_key().to_string()
    }

    pub fn from_bundle(bundle: &bundle::Bundle) -> Self {
        let (custodian, local_custody) = {
            let state = bundle.lock();
            (state.custodian.clone(), state.local_custody)
        };
        Self {
            key: Self::key_of(bundle),
            source: bundle.source.clone(),
            dest: bundle.dest.clone(),
            replyto: bundle.replyto.clone(),
            prevhop: bundle.prevhop.clone(),
            custodian,
            local_custody,
            creation_ts: bundle.creation_ts,
            expiration: bundle.expiration,
            priority: bundle.priority,
            custody_requested: bundle.custody_requested,
            is_admin: bundle.is_admin,
            receipts: bundle.receipts,
            fragment: bundle.fragment,
            payload: bundle.payload.clone(),
        }
    }

    /// A builder for the recovered bundle, marked as already stored.
    pub(crate) fn into_builder(self) -> bundle::BundleBuilder {
        bundle::BundleBuilder::new(self.source, self.dest)
            .replyto(self.replyto)
            .prevhop(self.prevhop)
            .custodian(self.custodian)
            .local_custody(self.local_custody)
            .creation_ts(self.creation_ts)
            .expiration(self.expiration)
            .priority(self.priority)
            .custody_requested(self.custody_requested)
            .admin(self.is_admin)
            .receipts(self.receipts)
            .fragment(self.fragment)
            .payload(self.payload)
            .in_datastore(true)
            .store_key(self.key)
    }
}

/// A durable home for bundle records.
///
/// Implementations must be safe to call from several tasks, though the
/// daemon's [`Store`] only ever issues one call at a time.
#[async_trait]
pub trait BundleStorage: Send + Sync {
    /// Stores a new record, returning false if the key is already present.
    async fn insert(&self, record: BundleRecord) -> Result<bool>;

    /// Overwrites the record with the same key.
    async fn replace(&self, record: BundleRecord) -> Result<()>;

    /// Removes a record. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Sends every stored record to `tx`.
    async fn recover(&self, tx: Sender<BundleRecord>) -> Result<()>;
}

enum Op {
    Insert(BundleRecord),
    Replace(BundleRecord),
    Remove(String),
    Flush(tokio::sync::oneshot::Sender<()>),
}

/// Queues storage operations for a background worker.
pub struct Store {
    storage: Arc<dyn BundleStorage>,
    tx: flume::Sender<Op>,
    tasks: dtnd_async::TaskPool,
}

impl Store {
    /// Starts the storage worker. Must be called from within a tokio runtime.
    pub fn new(storage: Arc<dyn BundleStorage>) -> Self {
        let (tx, rx) = flume::unbounded();
        let tasks = dtnd_async::TaskPool::new();

        let worker_storage = storage.clone();
        let cancel = tasks.cancel_token().clone();
        tasks.spawn(async move {
            loop {
                tokio::select! {
                    op = rx.recv_async() => match op {
                        Ok(op) => Self::apply(worker_storage.as_ref(), op).await,
                        Err(_) => break,
                    },
                    _ = cancel.cancelled() => {
                        // Drain whatever was queued before shutdown
                        while let Ok(op) = rx.try_recv() {
                            Self::apply(worker_storage.as_ref(), op).await;
                        }
                        break;
                    }
                }
            }
            debug!("Storage worker stopped");
        });

        Self { storage, tx, tasks }
    }

    async fn apply(storage: &dyn BundleStorage, op: Op) {
        match op {
            Op::Insert(record) => {
                let key = record.key.clone();
                match storage.insert(record).await {
                    Ok(true) => trace!("Stored bundle {key}"),
                    Ok(false) => warn!("Bundle {key} is already in storage"),
                    Err(e) => error!("Failed to store bundle {key}: {e}"),
                }
            }
            Op::Replace(record) => {
                let key = record.key.clone();
                if let Err(e) = storage.replace(record).await {
                    error!("Failed to update stored bundle {key}: {e}");
                }
            }
            Op::Remove(key) => {
                if let Err(e) = storage.remove(&key).await {
                    error!("Failed to remove stored bundle {key}: {e}");
                }
            }
            Op::Flush(done) => _ = done.send(()),
        }
    }

    fn queue(&self, op: Op) -> bool {
        self.tx.send(op).is_ok()
    }

    pub fn add(&self, bundle: &bundle::Bundle) -> bool {
        self.queue(Op::Insert(BundleRecord::from_bundle(bundle)))
    }

    pub fn update(&self, bundle: &bundle::Bundle) -> bool {
        self.queue(Op::Replace(BundleRecord::from_bundle(bundle)))
    }

    pub fn del(&self, bundle: &bundle::Bundle) -> bool {
        self.queue(Op::Remove(BundleRecord::key_of(bundle)))
    }

    /// Waits until every operation queued so far has been applied.
    pub async fn flush(&self) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        if self.queue(Op::Flush(tx)) {
            _ = rx.await;
        }
    }

    /// Reads back every stored record.
    pub async fn recover(&self) -> Vec<BundleRecord> {
        let (tx, rx) = flume::unbounded();
        let storage = self.storage.clone();
        let producer = async move {
            if let Err(e) = storage.recover(tx).await {
                error!("Storage recovery failed: {e}");
            }
        };
        let collector = async move {
            let mut records = Vec::new();
            while let Ok(record) = rx.recv_async().await {
                records.push(record);
            }
            records
        };
        let ((), records) = tokio::join!(producer, collector);
        records
    }

    pub async fn shutdown(&self) {
        self.tasks.shutdown().await;
    }
}
