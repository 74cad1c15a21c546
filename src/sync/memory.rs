//! Versioned shared memory with buffered write-behind.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::clock::{CausalOrder, VectorClock};
use super::resolver::MergePolicy;
use super::types::VersionedEntry;
use crate::config::SyncConfig;
use crate::error::{Result, SwarmError};
use crate::store::{glob_match, KeyValueStore};

type SubscriberFn = Arc<dyn Fn(&str, &VersionedEntry) + Send + Sync>;

struct Subscriber {
    id: u64,
    pattern: String,
    callback: SubscriberFn,
}

/// Bounded read cache with least-recently-used eviction.
struct BoundedCache {
    capacity: usize,
    entries: HashMap<String, VersionedEntry>,
    order: VecDeque<String>,
}

impl BoundedCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, key: &str) -> Option<VersionedEntry> {
        let entry = self.entries.get(key).cloned()?;
        self.touch(key);
        Some(entry)
    }

    fn put(&mut self, key: &str, entry: VersionedEntry) {
        if self.entries.insert(key.to_string(), entry).is_none() {
            self.order.push_back(key.to_string());
        } else {
            self.touch(key);
        }
        while self.entries.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
            self.order.push_back(key.to_string());
        }
    }
}

#[derive(Debug, Default)]
struct SyncMetrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    flushes: AtomicU64,
    flush_failures: AtomicU64,
    conflicts_resolved: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncMetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub flushes: u64,
    pub flush_failures: u64,
    pub conflicts_resolved: u64,
}

/// Causally versioned key/value memory for one worker.
///
/// Local writes increment the worker's own clock component and land in a
/// write buffer that a background loop flushes to the backing store; a reader
/// on another worker may observe a write up to one flush interval late unless
/// it calls [`CausalMemory::force_sync`]. Observed remote versions are merged
/// in with vector-clock comparison: causally ordered updates overwrite, true
/// conflicts go through the key-class [`MergePolicy`].
pub struct CausalMemory {
    weak: Weak<Self>,
    worker_id: String,
    store: Arc<dyn KeyValueStore>,
    config: SyncConfig,
    clock: RwLock<VectorClock>,
    cache: RwLock<BoundedCache>,
    buffer: RwLock<HashMap<String, VersionedEntry>>,
    policies: RwLock<Vec<(String, MergePolicy)>>,
    subscribers: RwLock<Vec<Subscriber>>,
    next_subscriber_id: AtomicU64,
    metrics: SyncMetrics,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    flush_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CausalMemory {
    pub fn new(
        worker_id: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
        config: SyncConfig,
    ) -> Arc<Self> {
        let worker_id = worker_id.into();
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            worker_id,
            store,
            cache: RwLock::new(BoundedCache::new(config.cache_capacity)),
            config,
            clock: RwLock::new(VectorClock::new()),
            buffer: RwLock::new(HashMap::new()),
            policies: RwLock::new(Vec::new()),
            subscribers: RwLock::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(0),
            metrics: SyncMetrics::default(),
            shutdown_tx: Mutex::new(None),
            flush_handle: Mutex::new(None),
        })
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn clock(&self) -> VectorClock {
        self.clock.read().clone()
    }

    /// Registers the merge policy for a key pattern. First match wins;
    /// unmatched keys resolve with last-write-wins.
    pub fn set_policy(&self, pattern: impl Into<String>, policy: MergePolicy) {
        self.policies.write().push((pattern.into(), policy));
    }

    fn policy_for(&self, key: &str) -> MergePolicy {
        self.policies
            .read()
            .iter()
            .find(|(pattern, _)| glob_match(pattern, key))
            .map(|(_, policy)| policy.clone())
            .unwrap_or_default()
    }

    /// Subscribes a callback to every write (local or remote) whose key
    /// matches `pattern`. Returns an id for [`CausalMemory::unsubscribe`].
    pub fn subscribe(
        &self,
        pattern: impl Into<String>,
        callback: impl Fn(&str, &VersionedEntry) + Send + Sync + 'static,
    ) -> u64 {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().push(Subscriber {
            id,
            pattern: pattern.into(),
            callback: Arc::new(callback),
        });
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.write().retain(|s| s.id != id);
    }

    fn notify(&self, key: &str, entry: &VersionedEntry) {
        let subscribers = self.subscribers.read();
        for sub in subscribers.iter() {
            if glob_match(&sub.pattern, key) {
                (sub.callback)(key, entry);
            }
        }
    }

    /// Local write: increments this worker's clock component, updates the
    /// cache, and buffers the entry for the next flush.
    pub fn write(&self, key: &str, value: Value) -> VersionedEntry {
        let version = {
            let mut clock = self.clock.write();
            clock.increment(&self.worker_id);
            clock.clone()
        };
        let entry = VersionedEntry::new(value, version, self.worker_id.clone());

        self.cache.write().put(key, entry.clone());
        self.buffer.write().insert(key.to_string(), entry.clone());
        self.notify(key, &entry);
        entry
    }

    /// Cache-first read with fallback to the backing store.
    pub async fn read(&self, key: &str) -> Result<Option<VersionedEntry>> {
        if let Some(entry) = self.cache.write().get(key) {
            self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(entry));
        }
        self.metrics.cache_misses.fetch_add(1, Ordering::Relaxed);

        match self.store.get(key).await? {
            Some(raw) => {
                let entry: VersionedEntry =
                    serde_json::from_value(raw).map_err(|e| SwarmError::Sync {
                        namespace: key.to_string(),
                        message: format!("corrupt versioned entry: {}", e),
                    })?;
                self.cache.write().put(key, entry.clone());
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Ingests a version observed from another worker.
    ///
    /// Causally newer versions overwrite; older or identical versions are
    /// dropped; concurrent versions are resolved through the key's merge
    /// policy and the merged result is buffered for flushing. Either way the
    /// local clock absorbs the remote clock and then ticks.
    pub async fn receive_remote(&self, key: &str, remote: VersionedEntry) -> Result<()> {
        let local = self.read(key).await?;

        {
            let mut clock = self.clock.write();
            clock.merge(&remote.version);
            clock.increment(&self.worker_id);
        }

        let accepted = match &local {
            None => Some(remote),
            Some(current) => match current.version.compare(&remote.version) {
                CausalOrder::Before => Some(remote),
                CausalOrder::After | CausalOrder::Equal => None,
                CausalOrder::Concurrent => {
                    self.metrics
                        .conflicts_resolved
                        .fetch_add(1, Ordering::Relaxed);
                    let merged_value = self.policy_for(key).resolve(current, &remote);
                    let mut version = current.version.clone();
                    version.merge(&remote.version);
                    version.increment(&self.worker_id);
                    let merged =
                        VersionedEntry::new(merged_value, version, self.worker_id.clone());
                    // The merged result is a new write of ours.
                    self.buffer.write().insert(key.to_string(), merged.clone());
                    Some(merged)
                }
            },
        };

        if let Some(entry) = accepted {
            self.cache.write().put(key, entry.clone());
            self.notify(key, &entry);
        }
        Ok(())
    }

    /// Drops any cached copy of `key`. The next read goes to the store.
    pub fn invalidate(&self, key: &str) {
        self.cache.write().remove(key);
    }

    /// Number of writes waiting for the next flush.
    pub fn pending_writes(&self) -> usize {
        self.buffer.read().len()
    }

    /// Flushes all buffered writes to the backing store immediately,
    /// providing a strict read-after-write guarantee to other workers.
    pub async fn force_sync(&self) -> Result<()> {
        let pending: Vec<(String, VersionedEntry)> =
            self.buffer.write().drain().collect();
        if pending.is_empty() {
            return Ok(());
        }

        let ttl = Duration::from_secs(self.config.entry_ttl_secs);
        let mut first_error = None;
        for (key, entry) in pending {
            let raw = serde_json::to_value(&entry)?;
            if let Err(e) = self.store.set(&key, raw, Some(ttl)).await {
                warn!(key = %key, error = %e, "Flush failed, re-buffering");
                self.metrics.flush_failures.fetch_add(1, Ordering::Relaxed);
                // Keep the entry for the next flush attempt unless a newer
                // local write replaced it meanwhile.
                self.buffer.write().entry(key).or_insert(entry);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        self.metrics.flushes.fetch_add(1, Ordering::Relaxed);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Starts the background flush loop. Idempotent.
    pub fn start(&self) {
        let mut guard = self.shutdown_tx.lock();
        if guard.is_some() {
            return;
        }
        let Some(memory) = self.weak.upgrade() else {
            return;
        };
        let (tx, mut rx) = watch::channel(false);
        *guard = Some(tx);
        let interval = Duration::from_millis(self.config.flush_interval_ms);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = memory.force_sync().await {
                            debug!(error = %e, "Periodic flush incomplete");
                        }
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        *self.flush_handle.lock() = Some(handle);
    }

    /// Stops the flush loop and flushes whatever is still buffered.
    pub async fn stop(&self) -> Result<()> {
        let tx = self.shutdown_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(true);
        }
        let handle = self.flush_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.force_sync().await
    }

    pub fn metrics(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            cache_hits: self.metrics.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.metrics.cache_misses.load(Ordering::Relaxed),
            flushes: self.metrics.flushes.load(Ordering::Relaxed),
            flush_failures: self.metrics.flush_failures.load(Ordering::Relaxed),
            conflicts_resolved: self.metrics.conflicts_resolved.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn memory(worker: &str) -> (Arc<CausalMemory>, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let memory = CausalMemory::new(worker, store.clone() as Arc<dyn KeyValueStore>, SyncConfig::default());
        (memory, store)
    }

    #[tokio::test]
    async fn test_write_is_buffered_until_sync() {
        let (memory, store) = memory("w1");
        memory.write("tasks/t1/state", json!({"phase": "build"}));

        assert_eq!(memory.pending_writes(), 1);
        assert_eq!(store.get("tasks/t1/state").await.unwrap(), None);

        memory.force_sync().await.unwrap();
        assert_eq!(memory.pending_writes(), 0);
        assert!(store.get("tasks/t1/state").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_read_after_write_local() {
        let (memory, _) = memory("w1");
        memory.write("k", json!(1));
        let entry = memory.read("k").await.unwrap().unwrap();
        assert_eq!(entry.value, json!(1));
        assert_eq!(entry.version.counter("w1"), 1);
    }

    #[tokio::test]
    async fn test_remote_newer_overwrites() {
        let (memory, _) = memory("w1");
        let local = memory.write("k", json!("v1"));

        let mut version = local.version.clone();
        version.increment("w2");
        let remote = VersionedEntry::new(json!("v2"), version, "w2");
        memory.receive_remote("k", remote).await.unwrap();

        let entry = memory.read("k").await.unwrap().unwrap();
        assert_eq!(entry.value, json!("v2"));
        assert_eq!(memory.metrics().conflicts_resolved, 0);
    }

    #[tokio::test]
    async fn test_remote_older_is_ignored() {
        let (memory, _) = memory("w1");
        memory.write("k", json!("v1"));
        memory.write("k", json!("v2"));

        let mut old_version = VectorClock::new();
        old_version.increment("w1");
        let stale = VersionedEntry::new(json!("stale"), old_version, "w2");
        memory.receive_remote("k", stale).await.unwrap();

        assert_eq!(memory.read("k").await.unwrap().unwrap().value, json!("v2"));
    }

    #[tokio::test]
    async fn test_concurrent_conflict_resolved_by_policy() {
        let (memory, _) = memory("w1");
        memory.set_policy("tags/*", MergePolicy::UnionMerge);
        memory.write("tags/t1", json!(["a"]));

        let mut version = VectorClock::new();
        version.increment("w2");
        let remote = VersionedEntry::new(json!(["b"]), version, "w2");
        memory.receive_remote("tags/t1", remote).await.unwrap();

        let entry = memory.read("tags/t1").await.unwrap().unwrap();
        assert_eq!(entry.value, json!(["a", "b"]));
        assert_eq!(memory.metrics().conflicts_resolved, 1);
        // Merged clock dominates both parents.
        assert!(entry.version.counter("w1") >= 2);
        assert_eq!(entry.version.counter("w2"), 1);
    }

    #[tokio::test]
    async fn test_subscribers_fire_on_matching_writes() {
        let (memory, _) = memory("w1");
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        memory.subscribe("tasks/*", move |_key, _entry| {
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });

        memory.write("tasks/t1/state", json!(1));
        memory.write("workers/w2/heartbeat", json!(2));
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        let mut version = VectorClock::new();
        version.increment("w9");
        memory
            .receive_remote(
                "tasks/t2/state",
                VersionedEntry::new(json!(3), version, "w9"),
            )
            .await
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cache_eviction_bounded() {
        let store = Arc::new(InMemoryStore::new());
        let config = SyncConfig {
            cache_capacity: 2,
            ..SyncConfig::default()
        };
        let memory = CausalMemory::new("w1", store as Arc<dyn KeyValueStore>, config);

        memory.write("a", json!(1));
        memory.write("b", json!(2));
        memory.write("c", json!(3));
        memory.force_sync().await.unwrap();

        // "a" was evicted from cache but survives in the store.
        let before = memory.metrics().cache_misses;
        let entry = memory.read("a").await.unwrap().unwrap();
        assert_eq!(entry.value, json!(1));
        assert_eq!(memory.metrics().cache_misses, before + 1);
    }

    #[tokio::test]
    async fn test_flush_loop_lifecycle() {
        let store = Arc::new(InMemoryStore::new());
        let config = SyncConfig {
            flush_interval_ms: 20,
            ..SyncConfig::default()
        };
        let memory = CausalMemory::new("w1", store.clone() as Arc<dyn KeyValueStore>, config);
        memory.start();

        memory.write("k", json!(1));
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(store.get("k").await.unwrap().is_some());

        memory.write("late", json!(2));
        memory.stop().await.unwrap();
        // stop() flushes pending writes.
        assert!(store.get("late").await.unwrap().is_some());
    }
}
