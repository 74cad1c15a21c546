use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::backoff::backoff_delay;
use super::types::{
    ConflictStrategy, LockCommentBody, LockMetadata, LockMetrics, LockMetricsSnapshot,
    LockRequest, LockStatus, ReleaseCommentBody, ReleaseRecord,
};
use crate::config::LockConfig;
use crate::error::{Result, SwarmError};
use crate::store::{lock_key, KeyValueStore};
use crate::tracker::IssueTracker;

/// Distributed lock manager over tracker assignment.
pub struct LockManager {
    tracker: Arc<dyn IssueTracker>,
    store: Arc<dyn KeyValueStore>,
    config: LockConfig,
    metrics: Arc<LockMetrics>,
}

impl LockManager {
    pub fn new(
        tracker: Arc<dyn IssueTracker>,
        store: Arc<dyn KeyValueStore>,
        config: LockConfig,
    ) -> Self {
        Self {
            tracker,
            store,
            config,
            metrics: Arc::new(LockMetrics::default()),
        }
    }

    /// Acquires the lock on `resource_id` for `request`, resolving conflicts
    /// per `strategy`. Uncontended acquisition succeeds with zero retries.
    ///
    /// The returned lease runs a background loop refreshing the lock's
    /// `heartbeat_last` record. Call [`LockLease::release`] when done; a
    /// dropped lease leaves the lock to stale recovery.
    pub async fn acquire(
        &self,
        resource_id: &str,
        request: &LockRequest,
        strategy: ConflictStrategy,
        max_retries: u32,
    ) -> Result<LockLease> {
        let started = Instant::now();
        let mut retries: u32 = 0;

        loop {
            match self.try_claim(resource_id, request).await {
                Ok(()) => {
                    self.metrics.acquisitions.fetch_add(1, Ordering::Relaxed);
                    self.metrics.acquire_latency_ms_total.fetch_add(
                        started.elapsed().as_millis() as u64,
                        Ordering::Relaxed,
                    );
                    debug!(resource_id, worker_id = %request.worker_id, retries, "Lock acquired");
                    return Ok(self.lease(resource_id, &request.worker_id, retries));
                }
                Err(e) if e.is_lock_conflict() || e.is_transient() => {
                    // Either the resource is held, or an assign failed after a
                    // free-looking check (another worker won the race). Both
                    // are conflicts under the active strategy.
                    self.metrics.conflicts.fetch_add(1, Ordering::Relaxed);

                    if strategy == ConflictStrategy::FailFast {
                        return Err(e);
                    }

                    if strategy == ConflictStrategy::StealStale
                        && self.holder_is_stale(resource_id).await?
                    {
                        self.steal(resource_id).await?;
                        continue;
                    }

                    if retries >= max_retries {
                        return Err(SwarmError::LockAcquisitionFailed {
                            resource_id: resource_id.to_string(),
                            retries,
                        });
                    }
                    let delay = backoff_delay(
                        retries,
                        self.config.base_delay_ms,
                        self.config.max_delay_ms,
                        &request.worker_id,
                    );
                    retries += 1;
                    self.metrics.retries.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One optimistic check-then-act round.
    async fn try_claim(&self, resource_id: &str, request: &LockRequest) -> Result<()> {
        let status = self.status(resource_id).await?;

        if let Some(holder) = &status.assignee {
            if holder != &request.worker_id {
                return Err(SwarmError::AlreadyLocked {
                    resource_id: resource_id.to_string(),
                    holder: holder.clone(),
                });
            }
            // Re-acquisition by the current holder just refreshes metadata.
            return self.write_metadata(resource_id, request).await;
        }

        self.tracker
            .assign_issue(resource_id, &request.worker_id)
            .await?;

        if let Err(e) = self.write_metadata(resource_id, request).await {
            // Don't hold a lock whose metadata never landed; peers could
            // neither steal nor audit it.
            let _ = self
                .tracker
                .unassign_issue(resource_id, &request.worker_id)
                .await;
            return Err(e);
        }
        Ok(())
    }

    async fn write_metadata(&self, resource_id: &str, request: &LockRequest) -> Result<()> {
        let now = Utc::now();
        let metadata = LockMetadata {
            worker_id: request.worker_id.clone(),
            node_id: request.node_id.clone(),
            claimed_at: now,
            heartbeat_last: now,
            task_info: request.task_info.clone(),
        };

        let comment = serde_json::to_string(&LockCommentBody {
            lock: metadata.clone(),
        })?;
        self.tracker.add_comment(resource_id, &comment).await?;

        self.store
            .set(
                &lock_key(resource_id),
                serde_json::to_value(&metadata)?,
                Some(Duration::from_secs(self.config.metadata_ttl_secs)),
            )
            .await
    }

    /// Whether the current holder's recorded heartbeat is past the stale
    /// threshold. A holder with no metadata at all is treated as stale: the
    /// claim never finished or its records already expired.
    async fn holder_is_stale(&self, resource_id: &str) -> Result<bool> {
        let status = self.status(resource_id).await?;
        if status.assignee.is_none() {
            return Ok(false);
        }
        let threshold = chrono::Duration::seconds(self.config.stale_threshold_secs as i64);
        Ok(match status.metadata {
            Some(metadata) => metadata.heartbeat_age() >= threshold,
            None => true,
        })
    }

    async fn steal(&self, resource_id: &str) -> Result<()> {
        let status = self.status(resource_id).await?;
        let Some(holder) = status.assignee else {
            return Ok(());
        };

        info!(resource_id, holder = %holder, "Stealing stale lock");
        self.tracker.unassign_issue(resource_id, &holder).await?;
        let comment = serde_json::to_string(&ReleaseCommentBody {
            release: ReleaseRecord {
                worker_id: holder.clone(),
                released_at: Utc::now(),
                reason: "stale heartbeat, lock forcibly released".to_string(),
            },
        })?;
        self.tracker.add_comment(resource_id, &comment).await?;
        self.store.delete(&lock_key(resource_id)).await?;
        self.metrics.steals.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Releases the lock held by `worker_id`. Ownership violations are
    /// terminal errors, never retried.
    pub async fn release(&self, resource_id: &str, worker_id: &str) -> Result<()> {
        let status = self.status(resource_id).await?;
        match status.assignee {
            None => Err(SwarmError::NotLocked(resource_id.to_string())),
            Some(holder) if holder != worker_id => Err(SwarmError::InvalidOwner {
                resource_id: resource_id.to_string(),
                holder,
                requester: worker_id.to_string(),
            }),
            Some(_) => {
                self.tracker.unassign_issue(resource_id, worker_id).await?;
                let comment = serde_json::to_string(&ReleaseCommentBody {
                    release: ReleaseRecord {
                        worker_id: worker_id.to_string(),
                        released_at: Utc::now(),
                        reason: "released by holder".to_string(),
                    },
                })?;
                self.tracker.add_comment(resource_id, &comment).await?;
                self.store.delete(&lock_key(resource_id)).await?;
                debug!(resource_id, worker_id, "Lock released");
                Ok(())
            }
        }
    }

    /// Read-only lock state. Metadata prefers the refreshed store record and
    /// falls back to the latest lock comment.
    pub async fn status(&self, resource_id: &str) -> Result<LockStatus> {
        let issue = self.tracker.get_issue(resource_id).await?;
        let assignee = issue.holder().map(String::from);

        let mut metadata = match self.store.get(&lock_key(resource_id)).await {
            Ok(Some(raw)) => serde_json::from_value::<LockMetadata>(raw).ok(),
            _ => None,
        };
        if metadata.is_none() {
            metadata = issue
                .comments
                .iter()
                .rev()
                .find_map(|c| serde_json::from_str::<LockCommentBody>(&c.body).ok())
                .map(|body| body.lock);
        }

        Ok(LockStatus {
            is_locked: assignee.is_some(),
            assignee,
            metadata,
        })
    }

    /// Bumps `heartbeat_last` on the lock record. Used by lease refresh loops
    /// and by recovery when an otherwise healthy holder let its lock age.
    pub async fn refresh(&self, resource_id: &str, worker_id: &str) -> Result<()> {
        let key = lock_key(resource_id);
        let Some(raw) = self.store.get(&key).await? else {
            return Err(SwarmError::LockExpired {
                resource_id: resource_id.to_string(),
            });
        };
        let mut metadata: LockMetadata =
            serde_json::from_value(raw).map_err(|e| SwarmError::Sync {
                namespace: key.clone(),
                message: format!("corrupt lock record: {}", e),
            })?;
        if metadata.worker_id != worker_id {
            return Err(SwarmError::InvalidOwner {
                resource_id: resource_id.to_string(),
                holder: metadata.worker_id,
                requester: worker_id.to_string(),
            });
        }
        metadata.heartbeat_last = Utc::now();
        self.store
            .set(
                &key,
                serde_json::to_value(&metadata)?,
                Some(Duration::from_secs(self.config.metadata_ttl_secs)),
            )
            .await
    }

    pub fn metrics(&self) -> LockMetricsSnapshot {
        self.metrics.snapshot()
    }

    fn lease(&self, resource_id: &str, worker_id: &str, retries: u32) -> LockLease {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let store = Arc::clone(&self.store);
        let key = lock_key(resource_id);
        let ttl = Duration::from_secs(self.config.metadata_ttl_secs);
        let interval = Duration::from_secs(self.config.refresh_interval_secs);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = refresh_record(store.as_ref(), &key, ttl).await {
                            warn!(key = %key, error = %e, "Lock refresh failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        LockLease {
            resource_id: resource_id.to_string(),
            worker_id: worker_id.to_string(),
            retries,
            shutdown_tx: Some(shutdown_tx),
            refresh_handle: Some(handle),
            released: false,
        }
    }
}

async fn refresh_record(store: &dyn KeyValueStore, key: &str, ttl: Duration) -> Result<()> {
    let Some(raw) = store.get(key).await? else {
        // Record expired or was recovered; nothing to refresh.
        return Ok(());
    };
    let mut metadata: LockMetadata = serde_json::from_value(raw).map_err(|e| SwarmError::Sync {
        namespace: key.to_string(),
        message: format!("corrupt lock record: {}", e),
    })?;
    metadata.heartbeat_last = Utc::now();
    store
        .set(key, serde_json::to_value(&metadata)?, Some(ttl))
        .await
}

/// Held lock with a background metadata refresh loop.
///
/// Dropping the lease only stops the refresh loop; the lock itself stays
/// until [`LockLease::release`] or stale recovery frees it.
#[derive(Debug)]
pub struct LockLease {
    resource_id: String,
    worker_id: String,
    retries: u32,
    shutdown_tx: Option<watch::Sender<bool>>,
    refresh_handle: Option<tokio::task::JoinHandle<()>>,
    released: bool,
}

impl LockLease {
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Retries it took to win the lock.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    fn stop_refresh(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.refresh_handle.take() {
            handle.abort();
        }
    }

    /// Stops the refresh loop and releases the lock.
    pub async fn release(mut self, manager: &LockManager) -> Result<()> {
        self.stop_refresh();
        self.released = true;
        manager.release(&self.resource_id, &self.worker_id).await
    }
}

impl Drop for LockLease {
    fn drop(&mut self) {
        self.stop_refresh();
        if !self.released && !std::thread::panicking() {
            warn!(
                resource_id = %self.resource_id,
                worker_id = %self.worker_id,
                "Lease dropped without release; lock left to stale recovery"
            );
        }
    }
}
