//! Volatile in-memory [`BundleStorage`](super::BundleStorage).
//!
//! Records survive a daemon restart within the same process only. When the
//! total payload size exceeds `capacity`, the least recently written records
//! are dropped, but never below `min_bundles` records.

use super::*;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct Config {
    /// Payload bytes to hold before evicting.
    pub capacity: core::num::NonZeroUsize,
    pub min_bundles: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity: core::num::NonZeroUsize::new(256 * 1_048_576)
                .trace_expect("Invalid default capacity"),
            min_bundles: 32,
        }
    }
}

struct Inner {
    cache: lru::LruCache<String, BundleRecord>,
    size: usize,
}

struct Storage {
    inner: Mutex<Inner>,
    capacity: core::num::NonZeroUsize,
    min_bundles: usize,
}

impl Storage {
    fn put(&self, record: BundleRecord) {
        let mut inner = self.inner.lock().trace_expect("Failed to lock mutex");

        let new_len = record.payload.len();
        let old_len = inner
            .cache
            .put(record.key.clone(), record)
            .map_or(0, |r| r.payload.len());

        inner.size = inner.size.saturating_sub(old_len).saturating_add(new_len);
        while inner.cache.len() > self.min_bundles && inner.size > self.capacity.get() {
            let Some((key, evicted)) = inner.cache.pop_lru() else {
                break;
            };
            warn!("Memory storage full, dropping bundle {key}");
            inner.size = inner.size.saturating_sub(evicted.payload.len());
        }
    }
}

#[async_trait]
impl BundleStorage for Storage {
    async fn insert(&self, record: BundleRecord) -> Result<bool> {
        if self
            .inner
            .lock()
            .trace_expect("Failed to lock mutex")
            .cache
            .contains(&record.key)
        {
            return Ok(false);
        }
        self.put(record);
        Ok(true)
    }

    async fn replace(&self, record: BundleRecord) -> Result<()> {
        self.put(record);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().trace_expect("Failed to lock mutex");
        if let Some(record) = inner.cache.pop(key) {
            inner.size = inner.size.saturating_sub(record.payload.len());
        }
        Ok(())
    }

    async fn recover(&self, tx: Sender<BundleRecord>) -> Result<()> {
        // Oldest first, so recovered bundles keep their arrival order
        let snapshot = self
            .inner
            .lock()
            .trace_expect("Failed to lock mutex")
            .cache
            .iter()
            .rev()
            .map(|(_, r)| r.clone())
            .collect::<Vec<_>>();

        for record in snapshot {
            tx.send_async(record).await?;
        }
        Ok(())
    }
}

pub fn new(config: &Config) -> Arc<dyn BundleStorage> {
    Arc::new(Storage {
        inner: Mutex::new(Inner {
            cache: lru::LruCache::unbounded(),
            size: 0,
        }),
        capacity: config.capacity,
        min_bundles: config.min_bundles,
    })
}
