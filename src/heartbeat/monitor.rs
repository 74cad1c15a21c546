use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::types::HeartbeatRecord;
use crate::config::HeartbeatConfig;
use crate::error::Result;
use crate::lock::LockMetadata;
use crate::store::{heartbeat_key, resource_from_lock_key, KeyValueStore, LOCK_PREFIX};
use crate::tracker::IssueTracker;

/// Wire format of the recovery comment body.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecoveryCommentBody {
    recovery: RecoveryRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RecoveryRecord {
    resource_id: String,
    holder: String,
    recovered_at: DateTime<Utc>,
    reason: String,
}

#[derive(Debug, Default)]
struct RecoveryMetrics {
    scans: AtomicU64,
    locks_checked: AtomicU64,
    recoveries: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryMetricsSnapshot {
    pub scans: u64,
    pub locks_checked: u64,
    pub recoveries: u64,
}

/// Background detector that frees locks whose holders stopped heartbeating.
///
/// Staleness is judged from the holder's own heartbeat record, not the lock's
/// cached `heartbeat_last`: a crashed holder updates neither, and for a live
/// holder the worker heartbeat is authoritative. Recovery is idempotent: a
/// second detector observing an already-freed resource does nothing and
/// counts nothing.
pub struct StaleLockMonitor {
    weak: Weak<Self>,
    store: Arc<dyn KeyValueStore>,
    tracker: Arc<dyn IssueTracker>,
    config: HeartbeatConfig,
    metrics: RecoveryMetrics,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    scan_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl StaleLockMonitor {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        tracker: Arc<dyn IssueTracker>,
        config: HeartbeatConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            store,
            tracker,
            config,
            metrics: RecoveryMetrics::default(),
            shutdown_tx: Mutex::new(None),
            scan_handle: Mutex::new(None),
        })
    }

    /// One full pass over all active lock keys. Returns how many locks were
    /// recovered.
    pub async fn scan_once(&self) -> Result<u32> {
        self.metrics.scans.fetch_add(1, Ordering::Relaxed);
        let keys = self.store.list(LOCK_PREFIX).await?;
        let mut recovered = 0;

        for key in keys {
            let Some(resource_id) = resource_from_lock_key(&key) else {
                continue;
            };
            self.metrics.locks_checked.fetch_add(1, Ordering::Relaxed);

            let Some(raw) = self.store.get(&key).await? else {
                // Freed between list and get; nothing to do.
                continue;
            };
            let Ok(metadata) = serde_json::from_value::<LockMetadata>(raw) else {
                warn!(key = %key, "Skipping corrupt lock record");
                continue;
            };

            if self.holder_heartbeat_is_stale(&metadata.worker_id).await? {
                if self.recover_lock(resource_id, &metadata.worker_id).await? {
                    recovered += 1;
                }
            }
        }

        if recovered > 0 {
            info!(recovered, "Stale lock scan recovered locks");
        }
        Ok(recovered)
    }

    async fn holder_heartbeat_is_stale(&self, worker_id: &str) -> Result<bool> {
        let threshold = chrono::Duration::seconds(self.config.stale_threshold_secs as i64);
        match self.store.get(&heartbeat_key(worker_id)).await? {
            Some(raw) => match serde_json::from_value::<HeartbeatRecord>(raw) {
                Ok(record) => Ok(record.age() >= threshold),
                // A heartbeat we cannot read proves nothing about liveness;
                // treat the holder as gone.
                Err(_) => Ok(true),
            },
            // No record at all: the holder crashed long enough ago for its
            // record TTL to lapse, or never emitted.
            None => Ok(true),
        }
    }

    /// Frees one stale lock. Returns false when the resource was already
    /// freed, the idempotent no-op path.
    pub async fn recover_lock(&self, resource_id: &str, holder: &str) -> Result<bool> {
        let issue = self.tracker.get_issue(resource_id).await?;
        if issue.holder() != Some(holder) {
            debug!(resource_id, holder, "Lock already freed, skipping recovery");
            // Clear a leftover record only if it still names the stale
            // holder; a new holder's record must survive.
            let key = crate::store::lock_key(resource_id);
            if let Ok(Some(raw)) = self.store.get(&key).await {
                let leftover = serde_json::from_value::<LockMetadata>(raw)
                    .map(|m| m.worker_id == holder)
                    .unwrap_or(false);
                if leftover {
                    let _ = self.store.delete(&key).await;
                }
            }
            return Ok(false);
        }

        self.tracker.unassign_issue(resource_id, holder).await?;
        let comment = serde_json::to_string(&RecoveryCommentBody {
            recovery: RecoveryRecord {
                resource_id: resource_id.to_string(),
                holder: holder.to_string(),
                recovered_at: Utc::now(),
                reason: format!(
                    "holder heartbeat stale beyond {}s, lock recovered",
                    self.config.stale_threshold_secs
                ),
            },
        })?;
        self.tracker.add_comment(resource_id, &comment).await?;
        self.store
            .delete(&crate::store::lock_key(resource_id))
            .await?;

        self.metrics.recoveries.fetch_add(1, Ordering::Relaxed);
        info!(resource_id, holder, "Recovered stale lock");
        Ok(true)
    }

    /// Starts the periodic detection loop. Idempotent.
    pub fn start(&self) {
        let mut guard = self.shutdown_tx.lock();
        if guard.is_some() {
            return;
        }
        let Some(monitor) = self.weak.upgrade() else {
            return;
        };
        let (tx, mut rx) = watch::channel(false);
        *guard = Some(tx);
        let interval = Duration::from_secs(self.config.detection_interval_secs);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = monitor.scan_once().await {
                            warn!(error = %e, "Stale lock scan failed");
                        }
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            debug!("Stale lock monitor shutdown");
                            break;
                        }
                    }
                }
            }
        });
        *self.scan_handle.lock() = Some(handle);
    }

    pub async fn stop(&self) {
        let tx = self.shutdown_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(true);
        }
        let handle = self.scan_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn metrics(&self) -> RecoveryMetricsSnapshot {
        RecoveryMetricsSnapshot {
            scans: self.metrics.scans.load(Ordering::Relaxed),
            locks_checked: self.metrics.locks_checked.load(Ordering::Relaxed),
            recoveries: self.metrics.recoveries.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::{HeartbeatMetrics, WorkerHealth};
    use crate::lock::TaskInfo;
    use crate::store::{lock_key, InMemoryStore};
    use crate::tracker::{InMemoryTracker, Issue};

    async fn seed_lock(
        store: &InMemoryStore,
        tracker: &InMemoryTracker,
        resource_id: &str,
        holder: &str,
        heartbeat_age_secs: Option<i64>,
    ) {
        tracker.create_issue(Issue::new(resource_id, "task"));
        tracker.assign_issue(resource_id, holder).await.unwrap();

        let metadata = LockMetadata {
            worker_id: holder.to_string(),
            node_id: "node-a".into(),
            claimed_at: Utc::now(),
            heartbeat_last: Utc::now(),
            task_info: TaskInfo::default(),
        };
        store
            .set(
                &lock_key(resource_id),
                serde_json::to_value(&metadata).unwrap(),
                None,
            )
            .await
            .unwrap();

        if let Some(age) = heartbeat_age_secs {
            let record = HeartbeatRecord {
                worker_id: holder.to_string(),
                timestamp: Utc::now() - chrono::Duration::seconds(age),
                health: WorkerHealth::Healthy,
                current_tasks: vec![resource_id.to_string()],
                capacity_available: 1,
                metrics: HeartbeatMetrics::default(),
            };
            store
                .set(
                    &heartbeat_key(holder),
                    serde_json::to_value(&record).unwrap(),
                    None,
                )
                .await
                .unwrap();
        }
    }

    fn monitor(
        store: Arc<InMemoryStore>,
        tracker: Arc<InMemoryTracker>,
    ) -> Arc<StaleLockMonitor> {
        StaleLockMonitor::new(
            store as Arc<dyn KeyValueStore>,
            tracker as Arc<dyn IssueTracker>,
            HeartbeatConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_fresh_holder_is_left_alone() {
        let store = Arc::new(InMemoryStore::new());
        let tracker = Arc::new(InMemoryTracker::new());
        seed_lock(&store, &tracker, "task-1", "w1", Some(5)).await;

        let monitor = monitor(store.clone(), tracker.clone());
        assert_eq!(monitor.scan_once().await.unwrap(), 0);
        assert!(tracker.get_issue("task-1").await.unwrap().is_assigned());
    }

    #[tokio::test]
    async fn test_stale_holder_is_recovered() {
        let store = Arc::new(InMemoryStore::new());
        let tracker = Arc::new(InMemoryTracker::new());
        seed_lock(&store, &tracker, "task-1", "w1", Some(600)).await;

        let monitor = monitor(store.clone(), tracker.clone());
        assert_eq!(monitor.scan_once().await.unwrap(), 1);

        let issue = tracker.get_issue("task-1").await.unwrap();
        assert!(!issue.is_assigned());
        assert!(issue
            .comments
            .iter()
            .any(|c| c.body.contains("\"recovery\"")));
        assert_eq!(store.get(&lock_key("task-1")).await.unwrap(), None);
        assert_eq!(monitor.metrics().recoveries, 1);
    }

    #[tokio::test]
    async fn test_missing_heartbeat_counts_as_stale() {
        let store = Arc::new(InMemoryStore::new());
        let tracker = Arc::new(InMemoryTracker::new());
        seed_lock(&store, &tracker, "task-1", "w1", None).await;

        let monitor = monitor(store.clone(), tracker.clone());
        assert_eq!(monitor.scan_once().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_recovery_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let tracker = Arc::new(InMemoryTracker::new());
        seed_lock(&store, &tracker, "task-1", "w1", Some(600)).await;

        let monitor = monitor(store.clone(), tracker.clone());
        assert!(monitor.recover_lock("task-1", "w1").await.unwrap());
        // Second recovery of the already-freed resource: no action, no metric.
        assert!(!monitor.recover_lock("task-1", "w1").await.unwrap());
        assert_eq!(monitor.metrics().recoveries, 1);

        let issue = tracker.get_issue("task-1").await.unwrap();
        let recovery_comments = issue
            .comments
            .iter()
            .filter(|c| c.body.contains("\"recovery\""))
            .count();
        assert_eq!(recovery_comments, 1);
    }
}
