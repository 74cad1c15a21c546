use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{Result, SwarmError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub lock: LockConfig,
    pub heartbeat: HeartbeatConfig,
    pub registry: RegistryConfig,
    pub sync: SyncConfig,
    pub planner: PlannerConfig,
    pub recovery: RecoveryConfig,
    pub orchestrator: OrchestratorConfig,
}

impl SwarmConfig {
    pub async fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join("config.toml");
        let config = if config_path.exists() {
            let content = fs::read_to_string(&config_path).await?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, dir: &Path) -> Result<()> {
        self.validate()?;
        let config_path = dir.join("config.toml");
        let content =
            toml::to_string_pretty(self).map_err(|e| SwarmError::Config(e.to_string()))?;
        fs::write(&config_path, content).await?;
        Ok(())
    }

    /// Validate configuration values for consistency and safety.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.lock.base_delay_ms == 0 {
            errors.push("lock.base_delay_ms must be greater than 0");
        }
        if self.lock.max_delay_ms < self.lock.base_delay_ms {
            errors.push("lock.max_delay_ms must be at least lock.base_delay_ms");
        }
        if self.lock.refresh_interval_secs == 0 {
            errors.push("lock.refresh_interval_secs must be greater than 0");
        }

        if self.heartbeat.interval_secs == 0 {
            errors.push("heartbeat.interval_secs must be greater than 0");
        }
        if self.heartbeat.healthy_threshold_secs >= self.heartbeat.stale_threshold_secs {
            errors.push("heartbeat.healthy_threshold_secs must be less than stale_threshold_secs");
        }
        if self.heartbeat.detection_interval_secs >= self.heartbeat.stale_threshold_secs {
            errors.push("heartbeat.detection_interval_secs must be less than stale_threshold_secs");
        }
        if self.heartbeat.emit_retry_ceiling == 0 {
            errors.push("heartbeat.emit_retry_ceiling must be greater than 0");
        }

        if self.registry.eviction_ttl_secs <= self.heartbeat.stale_threshold_secs {
            errors.push("registry.eviction_ttl_secs must exceed heartbeat.stale_threshold_secs");
        }
        if self.registry.sweep_interval_secs == 0 {
            errors.push("registry.sweep_interval_secs must be greater than 0");
        }

        if self.sync.cache_capacity == 0 {
            errors.push("sync.cache_capacity must be greater than 0");
        }
        if self.sync.flush_interval_ms == 0 {
            errors.push("sync.flush_interval_ms must be greater than 0");
        }

        if self.planner.max_depth == 0 {
            errors.push("planner.max_depth must be greater than 0");
        }

        if self.recovery.max_retries == 0 {
            errors.push("recovery.max_retries must be greater than 0");
        }

        if self.orchestrator.max_parallel_tasks == 0 {
            errors.push("orchestrator.max_parallel_tasks must be greater than 0");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SwarmError::Config(errors.join("; ")))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// First retry delay; doubles each attempt.
    pub base_delay_ms: u64,
    /// Backoff ceiling.
    pub max_delay_ms: u64,
    pub default_max_retries: u32,
    /// Holder heartbeat age beyond which a lock is eligible for stealing.
    pub stale_threshold_secs: u64,
    /// Interval of the lease's background metadata refresh.
    pub refresh_interval_secs: u64,
    /// TTL on `locks/{resource}` coordination records.
    pub metadata_ttl_secs: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            default_max_retries: 5,
            stale_threshold_secs: 90,
            refresh_interval_secs: 15,
            metadata_ttl_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Emission interval H.
    pub interval_secs: u64,
    /// Stale-lock detection interval D; must be well under the stale threshold.
    pub detection_interval_secs: u64,
    pub healthy_threshold_secs: u64,
    pub stale_threshold_secs: u64,
    /// Consecutive emission failures before the worker marks itself unhealthy.
    pub emit_retry_ceiling: u32,
    pub emit_retry_delay_ms: u64,
    /// TTL on heartbeat records.
    pub record_ttl_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            detection_interval_secs: 15,
            healthy_threshold_secs: 30,
            stale_threshold_secs: 90,
            emit_retry_ceiling: 3,
            emit_retry_delay_ms: 500,
            record_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Hard TTL for eviction, independent of stale-lock recovery.
    pub eviction_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    /// Registration record TTL in the backing store.
    pub record_ttl_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            eviction_ttl_secs: 300,
            sweep_interval_secs: 60,
            record_ttl_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub cache_capacity: usize,
    pub flush_interval_ms: u64,
    /// TTL on flushed entries.
    pub entry_ttl_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 256,
            flush_interval_ms: 500,
            entry_ttl_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Bounds both plan length and cycle exploration.
    pub max_depth: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { max_depth: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Retry ceiling; reaching it escalates severity to critical.
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_parallel_tasks: usize,
    pub cycle_interval_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 4,
            cycle_interval_ms: 1_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SwarmConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = SwarmConfig::default();
        config.lock.base_delay_ms = 0;
        config.planner.max_depth = 0;

        let err = config.validate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("lock.base_delay_ms"));
        assert!(msg.contains("planner.max_depth"));
    }

    #[test]
    fn test_detection_interval_must_undercut_stale_threshold() {
        let mut config = SwarmConfig::default();
        config.heartbeat.detection_interval_secs = config.heartbeat.stale_threshold_secs;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_missing_file_uses_defaults() {
        let config = SwarmConfig::load(Path::new("/nonexistent-dir")).await.unwrap();
        assert_eq!(config.lock.default_max_retries, 5);
    }
}
