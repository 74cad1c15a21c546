use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::HeartbeatConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerHealth {
    Healthy,
    Degraded,
    Unhealthy,
    Offline,
}

impl std::fmt::Display for WorkerHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatMetrics {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub uptime_secs: u64,
}

/// One worker's liveness signal, overwritten on every emission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub worker_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "health_status")]
    pub health: WorkerHealth,
    pub current_tasks: Vec<String>,
    pub capacity_available: u32,
    pub metrics: HeartbeatMetrics,
}

impl HeartbeatRecord {
    pub fn age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.timestamp)
    }
}

/// Health by heartbeat age alone.
pub fn classify_health(age: chrono::Duration, config: &HeartbeatConfig) -> WorkerHealth {
    let age_secs = age.num_seconds().max(0) as u64;
    if age_secs < config.healthy_threshold_secs {
        WorkerHealth::Healthy
    } else if age_secs < config.stale_threshold_secs {
        WorkerHealth::Degraded
    } else {
        WorkerHealth::Unhealthy
    }
}
