//! Crash detection and stale-lock recovery across components.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use taskswarm::config::{HeartbeatConfig, LockConfig};
use taskswarm::heartbeat::{HeartbeatEmitter, HeartbeatRecord, StaleLockMonitor, WorkerHealth};
use taskswarm::lock::{ConflictStrategy, LockManager, LockRequest};
use taskswarm::store::{InMemoryStore, KeyValueStore};
use taskswarm::tracker::{InMemoryTracker, Issue, IssueTracker};
use taskswarm::Result;

/// Heartbeat thresholds tightened enough for tests to cross them quickly.
fn fast_config() -> HeartbeatConfig {
    HeartbeatConfig {
        interval_secs: 1,
        detection_interval_secs: 1,
        healthy_threshold_secs: 1,
        stale_threshold_secs: 2,
        emit_retry_ceiling: 3,
        emit_retry_delay_ms: 1,
        record_ttl_secs: 300,
    }
}

#[tokio::test]
async fn test_crashed_worker_lock_is_recovered() {
    let store = Arc::new(InMemoryStore::new());
    let tracker = Arc::new(InMemoryTracker::new());
    tracker.create_issue(Issue::new("task-1", "doomed task"));

    let manager = LockManager::new(
        tracker.clone() as Arc<dyn IssueTracker>,
        store.clone() as Arc<dyn KeyValueStore>,
        LockConfig::default(),
    );

    // The "crashing" worker emits once, takes the lock, then vanishes: no
    // further heartbeats, lease dropped without release.
    let emitter = HeartbeatEmitter::new(
        "doomed",
        store.clone() as Arc<dyn KeyValueStore>,
        fast_config(),
    );
    emitter.emit_once().await.unwrap();
    let lease = manager
        .acquire(
            "task-1",
            &LockRequest::new("doomed", "node-a"),
            ConflictStrategy::FailFast,
            0,
        )
        .await
        .unwrap();
    drop(lease);

    let monitor = StaleLockMonitor::new(
        store.clone() as Arc<dyn KeyValueStore>,
        tracker.clone() as Arc<dyn IssueTracker>,
        fast_config(),
    );

    // Heartbeat still fresh: nothing to recover.
    assert_eq!(monitor.scan_once().await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert_eq!(monitor.scan_once().await.unwrap(), 1);

    let issue = tracker.get_issue("task-1").await.unwrap();
    assert!(!issue.is_assigned());
    assert!(issue.comments.iter().any(|c| c.body.contains("recovery")));

    // The freed task is acquirable again.
    let lease = manager
        .acquire(
            "task-1",
            &LockRequest::new("survivor", "node-b"),
            ConflictStrategy::FailFast,
            0,
        )
        .await
        .unwrap();
    lease.release(&manager).await.unwrap();
}

#[tokio::test]
async fn test_two_detectors_recover_once() {
    let store = Arc::new(InMemoryStore::new());
    let tracker = Arc::new(InMemoryTracker::new());
    tracker.create_issue(Issue::new("task-1", "double watched"));
    tracker.assign_issue("task-1", "ghost").await.unwrap();

    let metadata = serde_json::json!({
        "worker_id": "ghost",
        "node_id": "node-x",
        "claimed_at": chrono::Utc::now(),
        "heartbeat_last": chrono::Utc::now(),
        "task_info": {}
    });
    store.set("locks/task-1", metadata, None).await.unwrap();

    let monitor_a = StaleLockMonitor::new(
        store.clone() as Arc<dyn KeyValueStore>,
        tracker.clone() as Arc<dyn IssueTracker>,
        fast_config(),
    );
    let monitor_b = StaleLockMonitor::new(
        store.clone() as Arc<dyn KeyValueStore>,
        tracker.clone() as Arc<dyn IssueTracker>,
        fast_config(),
    );

    // No heartbeat record exists for "ghost", so the lock is stale now.
    assert_eq!(monitor_a.scan_once().await.unwrap(), 1);
    assert_eq!(monitor_b.scan_once().await.unwrap(), 0);

    assert_eq!(monitor_a.metrics().recoveries, 1);
    assert_eq!(monitor_b.metrics().recoveries, 0);

    let issue = tracker.get_issue("task-1").await.unwrap();
    let recovery_comments = issue
        .comments
        .iter()
        .filter(|c| c.body.contains("\"recovery\""))
        .count();
    assert_eq!(recovery_comments, 1);
}

#[tokio::test]
async fn test_detection_loop_runs_in_background() {
    let store = Arc::new(InMemoryStore::new());
    let tracker = Arc::new(InMemoryTracker::new());
    tracker.create_issue(Issue::new("task-1", "watched"));
    tracker.assign_issue("task-1", "ghost").await.unwrap();
    store
        .set(
            "locks/task-1",
            serde_json::json!({
                "worker_id": "ghost",
                "node_id": "node-x",
                "claimed_at": chrono::Utc::now(),
                "heartbeat_last": chrono::Utc::now(),
                "task_info": {}
            }),
            None,
        )
        .await
        .unwrap();

    let monitor = StaleLockMonitor::new(
        store.clone() as Arc<dyn KeyValueStore>,
        tracker.clone() as Arc<dyn IssueTracker>,
        fast_config(),
    );
    monitor.start();

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    monitor.stop().await;

    assert!(!tracker.get_issue("task-1").await.unwrap().is_assigned());
    assert!(monitor.metrics().scans >= 1);
}

/// Store wrapper that fails the first N writes; exercises emission retry.
struct FlakyStore {
    inner: InMemoryStore,
    failures_left: AtomicU32,
}

impl FlakyStore {
    fn new(failures: u32) -> Self {
        Self {
            inner: InMemoryStore::new(),
            failures_left: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(taskswarm::SwarmError::Store("injected write failure".into()));
        }
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix).await
    }

    async fn search(&self, pattern: &str) -> Result<Vec<(String, Value)>> {
        self.inner.search(pattern).await
    }
}

#[tokio::test]
async fn test_emission_retries_through_transient_failures() {
    let store = Arc::new(FlakyStore::new(2));
    let emitter = HeartbeatEmitter::new(
        "w1",
        store.clone() as Arc<dyn KeyValueStore>,
        fast_config(),
    );

    // Two injected failures, third attempt lands within one emit_once call.
    emitter.emit_once().await.unwrap();
    assert_eq!(emitter.health(), WorkerHealth::Healthy);

    let raw = store.get("workers/w1/heartbeat").await.unwrap().unwrap();
    let record: HeartbeatRecord = serde_json::from_value(raw).unwrap();
    assert_eq!(record.worker_id, "w1");
}

#[tokio::test]
async fn test_persistent_emission_failure_marks_unhealthy() {
    let store = Arc::new(FlakyStore::new(1_000));
    let emitter = HeartbeatEmitter::new(
        "w1",
        store as Arc<dyn KeyValueStore>,
        fast_config(),
    );

    // Each emit exhausts its retry budget; after enough consecutive failed
    // ticks the worker self-marks unhealthy but keeps trying.
    for _ in 0..3 {
        assert!(emitter.emit_once().await.is_err());
    }
    assert_eq!(emitter.health(), WorkerHealth::Unhealthy);
}
