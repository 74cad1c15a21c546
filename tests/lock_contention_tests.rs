//! Mutual exclusion under contention.

use std::sync::Arc;

use taskswarm::config::LockConfig;
use taskswarm::lock::{ConflictStrategy, LockManager, LockRequest};
use taskswarm::store::{InMemoryStore, KeyValueStore};
use taskswarm::tracker::{InMemoryTracker, Issue, IssueTracker};
use taskswarm::SwarmError;

fn manager(tracker: Arc<InMemoryTracker>, store: Arc<InMemoryStore>) -> Arc<LockManager> {
    Arc::new(LockManager::new(
        tracker as Arc<dyn IssueTracker>,
        store as Arc<dyn KeyValueStore>,
        LockConfig {
            base_delay_ms: 2,
            max_delay_ms: 10,
            ..LockConfig::default()
        },
    ))
}

#[tokio::test]
async fn test_n_workers_one_winner() {
    let tracker = Arc::new(InMemoryTracker::new());
    let store = Arc::new(InMemoryStore::new());
    tracker.create_issue(Issue::new("task-1", "contended task"));
    let manager = manager(tracker.clone(), store);

    let mut handles = Vec::new();
    for i in 0..8 {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            manager
                .acquire(
                    "task-1",
                    &LockRequest::new(format!("w{}", i), "node-a"),
                    ConflictStrategy::FailFast,
                    0,
                )
                .await
        }));
    }

    let mut winners = Vec::new();
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(lease) => winners.push(lease),
            Err(e) if e.is_lock_conflict() => conflicts += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(winners.len(), 1, "exactly one worker may hold the lock");
    assert_eq!(conflicts, 7);

    // The winner's identity matches the tracker's assignment.
    let winner = winners.pop().unwrap();
    let status = manager.status("task-1").await.unwrap();
    assert_eq!(status.assignee.as_deref(), Some(winner.worker_id()));

    winner.release(&manager).await.unwrap();
    assert!(!manager.status("task-1").await.unwrap().is_locked);
}

#[tokio::test]
async fn test_retry_wins_after_release() {
    let tracker = Arc::new(InMemoryTracker::new());
    let store = Arc::new(InMemoryStore::new());
    tracker.create_issue(Issue::new("task-1", "handover"));
    let manager = manager(tracker.clone(), store);

    let first = manager
        .acquire(
            "task-1",
            &LockRequest::new("w1", "node-a"),
            ConflictStrategy::FailFast,
            0,
        )
        .await
        .unwrap();

    // A second worker keeps retrying while the first finishes up.
    let contender = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .acquire(
                    "task-1",
                    &LockRequest::new("w2", "node-b"),
                    ConflictStrategy::Retry,
                    50,
                )
                .await
        })
    };

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    first.release(&manager).await.unwrap();

    let lease = contender.await.unwrap().unwrap();
    assert_eq!(lease.worker_id(), "w2");
    assert!(lease.retries() > 0, "the contender had to retry");
    lease.release(&manager).await.unwrap();
}

#[tokio::test]
async fn test_sequential_handover_many_workers() {
    let tracker = Arc::new(InMemoryTracker::new());
    let store = Arc::new(InMemoryStore::new());
    tracker.create_issue(Issue::new("task-1", "queue"));
    let manager = manager(tracker.clone(), store);

    // Workers acquire and release one after another; every acquisition must
    // observe the previous holder fully gone.
    for i in 0..5 {
        let lease = manager
            .acquire(
                "task-1",
                &LockRequest::new(format!("w{}", i), "node-a"),
                ConflictStrategy::Retry,
                10,
            )
            .await
            .unwrap();
        let status = manager.status("task-1").await.unwrap();
        assert_eq!(status.assignee.as_deref(), Some(lease.worker_id()));
        lease.release(&manager).await.unwrap();
    }

    let metrics = manager.metrics();
    assert_eq!(metrics.acquisitions, 5);
}

#[tokio::test]
async fn test_conflict_metrics_accumulate() {
    let tracker = Arc::new(InMemoryTracker::new());
    let store = Arc::new(InMemoryStore::new());
    tracker.create_issue(Issue::new("task-1", "busy"));
    let manager = manager(tracker.clone(), store);

    let _lease = manager
        .acquire(
            "task-1",
            &LockRequest::new("w1", "node-a"),
            ConflictStrategy::FailFast,
            0,
        )
        .await
        .unwrap();

    for _ in 0..3 {
        let err = manager
            .acquire(
                "task-1",
                &LockRequest::new("w2", "node-b"),
                ConflictStrategy::FailFast,
                0,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SwarmError::AlreadyLocked { .. }));
    }

    let metrics = manager.metrics();
    assert_eq!(metrics.acquisitions, 1);
    assert_eq!(metrics.conflicts, 3);
    assert!(metrics.avg_acquire_latency_ms >= 0.0);
}
