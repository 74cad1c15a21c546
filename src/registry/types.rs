use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::heartbeat::WorkerHealth;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub average_task_duration_ms: f64,
}

impl WorkerStats {
    /// Fraction of finished tasks that succeeded; optimistic 1.0 before any
    /// history exists so new workers aren't starved.
    pub fn success_rate(&self) -> f64 {
        let total = self.tasks_completed + self.tasks_failed;
        if total == 0 {
            1.0
        } else {
            self.tasks_completed as f64 / total as f64
        }
    }
}

/// One worker as the registry sees it, stored at
/// `workers/{worker_id}/registration`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: String,
    pub node_id: String,
    pub capabilities: Vec<String>,
    pub max_concurrent_tasks: u32,
    pub current_tasks: u32,
    #[serde(rename = "health_status")]
    pub health: WorkerHealth,
    pub last_heartbeat: DateTime<Utc>,
    pub metrics: WorkerStats,
}

impl WorkerRecord {
    pub fn new(id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_id: node_id.into(),
            capabilities: Vec::new(),
            max_concurrent_tasks: 1,
            current_tasks: 0,
            health: WorkerHealth::Healthy,
            last_heartbeat: Utc::now(),
            metrics: WorkerStats::default(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_max_concurrent_tasks(mut self, max: u32) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    pub fn available_capacity(&self) -> u32 {
        self.max_concurrent_tasks.saturating_sub(self.current_tasks)
    }

    pub fn has_capabilities(&self, required: &[String]) -> bool {
        required
            .iter()
            .all(|cap| self.capabilities.iter().any(|have| have == cap))
    }

    pub fn heartbeat_age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.last_heartbeat)
    }
}

/// Filter for [`crate::registry::WorkerRegistry::discover`].
#[derive(Debug, Clone, Default)]
pub struct DiscoveryFilter {
    /// Capabilities the worker must all carry.
    pub required_capabilities: Vec<String>,
    /// Acceptable health states; empty means any.
    pub health_in: Vec<WorkerHealth>,
    pub min_available_capacity: u32,
}

impl DiscoveryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.required_capabilities = capabilities;
        self
    }

    pub fn with_health(mut self, health: Vec<WorkerHealth>) -> Self {
        self.health_in = health;
        self
    }

    pub fn with_min_capacity(mut self, capacity: u32) -> Self {
        self.min_available_capacity = capacity;
        self
    }

    pub fn matches(&self, record: &WorkerRecord) -> bool {
        record.has_capabilities(&self.required_capabilities)
            && (self.health_in.is_empty() || self.health_in.contains(&record.health))
            && record.available_capacity() >= self.min_available_capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_available_capacity_saturates() {
        let mut record = WorkerRecord::new("w1", "node-a").with_max_concurrent_tasks(2);
        record.current_tasks = 5;
        assert_eq!(record.available_capacity(), 0);
    }

    #[test]
    fn test_success_rate_optimistic_default() {
        assert_eq!(WorkerStats::default().success_rate(), 1.0);
        let stats = WorkerStats {
            tasks_completed: 3,
            tasks_failed: 1,
            average_task_duration_ms: 100.0,
        };
        assert_eq!(stats.success_rate(), 0.75);
    }

    #[test]
    fn test_filter_matching() {
        let record = WorkerRecord::new("w1", "node-a")
            .with_capabilities(vec!["rust".into(), "build".into()])
            .with_max_concurrent_tasks(3);

        assert!(DiscoveryFilter::new()
            .with_capabilities(vec!["rust".into()])
            .matches(&record));
        assert!(!DiscoveryFilter::new()
            .with_capabilities(vec!["python".into()])
            .matches(&record));
        assert!(!DiscoveryFilter::new().with_min_capacity(4).matches(&record));
        assert!(!DiscoveryFilter::new()
            .with_health(vec![WorkerHealth::Degraded])
            .matches(&record));
    }
}
