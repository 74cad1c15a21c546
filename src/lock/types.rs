use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the holder is doing with the resource; advisory only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity: Option<String>,
    #[serde(
        rename = "estimated_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub estimated_duration_secs: Option<u64>,
}

/// Lock metadata carried in the structured comment and the
/// `locks/{resource}` store record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockMetadata {
    pub worker_id: String,
    pub node_id: String,
    pub claimed_at: DateTime<Utc>,
    pub heartbeat_last: DateTime<Utc>,
    #[serde(default)]
    pub task_info: TaskInfo,
}

impl LockMetadata {
    pub fn heartbeat_age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.heartbeat_last)
    }
}

/// Wire format of the lock comment body: `{"lock": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LockCommentBody {
    pub lock: LockMetadata,
}

/// Wire format of the release comment body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ReleaseCommentBody {
    pub release: ReleaseRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ReleaseRecord {
    pub worker_id: String,
    pub released_at: DateTime<Utc>,
    pub reason: String,
}

/// Identity of the worker requesting a lock.
#[derive(Debug, Clone)]
pub struct LockRequest {
    pub worker_id: String,
    pub node_id: String,
    pub task_info: TaskInfo,
}

impl LockRequest {
    pub fn new(worker_id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            node_id: node_id.into(),
            task_info: TaskInfo::default(),
        }
    }

    pub fn with_task_info(mut self, task_info: TaskInfo) -> Self {
        self.task_info = task_info;
        self
    }
}

/// How to behave when the resource is already held by someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Fail immediately, no mutation.
    FailFast,
    /// Jittered exponential backoff up to the retry budget.
    Retry,
    /// Force-unassign a holder whose heartbeat is past the stale threshold,
    /// then acquire; otherwise fall back to retrying.
    StealStale,
}

/// Read-only view of a resource's lock state.
#[derive(Debug, Clone)]
pub struct LockStatus {
    pub is_locked: bool,
    pub assignee: Option<String>,
    pub metadata: Option<LockMetadata>,
}

#[derive(Debug, Default)]
pub(crate) struct LockMetrics {
    pub acquisitions: AtomicU64,
    pub conflicts: AtomicU64,
    pub retries: AtomicU64,
    pub steals: AtomicU64,
    pub acquire_latency_ms_total: AtomicU64,
}

impl LockMetrics {
    pub fn snapshot(&self) -> LockMetricsSnapshot {
        let acquisitions = self.acquisitions.load(Ordering::Relaxed);
        let total_latency = self.acquire_latency_ms_total.load(Ordering::Relaxed);
        LockMetricsSnapshot {
            acquisitions,
            conflicts: self.conflicts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            steals: self.steals.load(Ordering::Relaxed),
            avg_acquire_latency_ms: if acquisitions > 0 {
                total_latency as f64 / acquisitions as f64
            } else {
                0.0
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LockMetricsSnapshot {
    pub acquisitions: u64,
    pub conflicts: u64,
    pub retries: u64,
    pub steals: u64,
    pub avg_acquire_latency_ms: f64,
}
