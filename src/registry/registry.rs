use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::balancer::LoadBalancer;
use super::types::{DiscoveryFilter, WorkerRecord};
use crate::config::{HeartbeatConfig, RegistryConfig};
use crate::error::{Result, SwarmError};
use crate::heartbeat::{classify_health, HeartbeatRecord, WorkerHealth};
use crate::store::{registration_key, KeyValueStore};

/// Aggregate view over all registered workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStatistics {
    pub worker_count: usize,
    pub total_capacity: u32,
    pub total_load: u32,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub offline: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// A fleet-level concern with a suggested remediation.
#[derive(Debug, Clone)]
pub struct FleetAlert {
    pub severity: AlertSeverity,
    pub message: String,
    pub recommendation: String,
}

/// Point-in-time fleet health with actionable alerts.
#[derive(Debug, Clone)]
pub struct FleetHealthReport {
    pub statistics: RegistryStatistics,
    pub alerts: Vec<FleetAlert>,
    /// 1.0 is a fully healthy fleet; degrades with failures and saturation.
    pub score: f64,
}

/// In-memory worker registry mirrored to `workers/{id}/registration`.
///
/// The eviction sweep is defense in depth: even if the stale-lock monitor
/// never runs, workers whose heartbeat age passes the hard TTL disappear
/// from discovery.
pub struct WorkerRegistry {
    weak: Weak<Self>,
    workers: DashMap<String, WorkerRecord>,
    store: Arc<dyn KeyValueStore>,
    config: RegistryConfig,
    heartbeat_config: HeartbeatConfig,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    sweep_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WorkerRegistry {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        config: RegistryConfig,
        heartbeat_config: HeartbeatConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            workers: DashMap::new(),
            store,
            config,
            heartbeat_config,
            shutdown_tx: Mutex::new(None),
            sweep_handle: Mutex::new(None),
        })
    }

    pub async fn register(&self, record: WorkerRecord) -> Result<()> {
        info!(worker_id = %record.id, node_id = %record.node_id, "Worker registered");
        self.workers.insert(record.id.clone(), record.clone());
        self.persist(&record).await
    }

    pub async fn unregister(&self, worker_id: &str) -> Result<()> {
        self.workers.remove(worker_id);
        self.store.delete(&registration_key(worker_id)).await?;
        debug!(worker_id, "Worker unregistered");
        Ok(())
    }

    pub fn get(&self, worker_id: &str) -> Option<WorkerRecord> {
        self.workers.get(worker_id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Applies a worker's heartbeat: liveness timestamp, self-reported
    /// health, and its current task list.
    pub async fn heartbeat(&self, record: &HeartbeatRecord) -> Result<()> {
        let updated = self.mutate(&record.worker_id, |worker| {
            worker.last_heartbeat = record.timestamp;
            worker.health = record.health;
            worker.current_tasks = record.current_tasks.len() as u32;
        })?;
        self.persist(&updated).await
    }

    /// Adjusts the in-flight task count by `delta`, floored at zero.
    pub async fn update_task_count(&self, worker_id: &str, delta: i32) -> Result<()> {
        let updated = self.mutate(worker_id, |worker| {
            let count = worker.current_tasks as i64 + delta as i64;
            worker.current_tasks = count.max(0) as u32;
        })?;
        self.persist(&updated).await
    }

    /// Folds one finished task into the worker's rolling statistics.
    pub async fn record_task_completion(
        &self,
        worker_id: &str,
        success: bool,
        duration_ms: u64,
    ) -> Result<()> {
        let updated = self.mutate(worker_id, |worker| {
            let stats = &mut worker.metrics;
            let finished = stats.tasks_completed + stats.tasks_failed;
            stats.average_task_duration_ms = (stats.average_task_duration_ms * finished as f64
                + duration_ms as f64)
                / (finished + 1) as f64;
            if success {
                stats.tasks_completed += 1;
            } else {
                stats.tasks_failed += 1;
            }
        })?;
        self.persist(&updated).await
    }

    /// Overrides a worker's health; used by recovery to reset a worker that
    /// was marked failed.
    pub async fn set_health(&self, worker_id: &str, health: WorkerHealth) -> Result<()> {
        let updated = self.mutate(worker_id, |worker| worker.health = health)?;
        self.persist(&updated).await
    }

    pub fn discover(&self, filter: &DiscoveryFilter) -> Vec<WorkerRecord> {
        let mut matches: Vec<WorkerRecord> = self
            .workers
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.clone())
            .collect();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        matches
    }

    /// All workers ranked by the balancer, highest priority first.
    pub fn workers_for_load_balancing(&self, balancer: &LoadBalancer) -> Vec<WorkerRecord> {
        let all: Vec<WorkerRecord> = self.workers.iter().map(|e| e.clone()).collect();
        balancer.prioritize(all)
    }

    pub fn statistics(&self) -> RegistryStatistics {
        let mut stats = RegistryStatistics::default();
        for entry in self.workers.iter() {
            stats.worker_count += 1;
            stats.total_capacity += entry.max_concurrent_tasks;
            stats.total_load += entry.current_tasks;
            match entry.health {
                WorkerHealth::Healthy => stats.healthy += 1,
                WorkerHealth::Degraded => stats.degraded += 1,
                WorkerHealth::Unhealthy => stats.unhealthy += 1,
                WorkerHealth::Offline => stats.offline += 1,
            }
        }
        stats
    }

    /// Fleet health with alerts for saturation, failure rate, and load
    /// imbalance.
    pub fn health_report(&self) -> FleetHealthReport {
        let statistics = self.statistics();
        let mut alerts = Vec::new();
        let mut score: f64 = 1.0;

        if statistics.worker_count == 0 {
            alerts.push(FleetAlert {
                severity: AlertSeverity::Critical,
                message: "no workers registered".to_string(),
                recommendation: "register at least one worker".to_string(),
            });
            return FleetHealthReport {
                statistics,
                alerts,
                score: 0.0,
            };
        }

        let load_ratio = if statistics.total_capacity > 0 {
            statistics.total_load as f64 / statistics.total_capacity as f64
        } else {
            1.0
        };
        if load_ratio > 0.8 {
            alerts.push(FleetAlert {
                severity: AlertSeverity::Warning,
                message: format!("fleet at {:.0}% of capacity", load_ratio * 100.0),
                recommendation: "scale up workers or throttle task intake".to_string(),
            });
            score *= 1.0 - ((load_ratio - 0.8) * 2.0).min(1.0);
        }

        let (completed, failed) = self.workers.iter().fold((0u64, 0u64), |acc, w| {
            (
                acc.0 + w.metrics.tasks_completed,
                acc.1 + w.metrics.tasks_failed,
            )
        });
        let finished = completed + failed;
        if finished > 10 {
            let success_rate = completed as f64 / finished as f64;
            if success_rate < 0.8 {
                alerts.push(FleetAlert {
                    severity: AlertSeverity::Warning,
                    message: format!("fleet success rate {:.0}%", success_rate * 100.0),
                    recommendation: "inspect failure insights for the dominant failure type"
                        .to_string(),
                });
                score *= success_rate.max(0.1);
            }
        }

        let loads: Vec<f64> = self
            .workers
            .iter()
            .filter(|w| w.max_concurrent_tasks > 0)
            .map(|w| w.current_tasks as f64 / w.max_concurrent_tasks as f64)
            .collect();
        if loads.len() > 1 {
            let max = loads.iter().copied().fold(0.0f64, f64::max);
            let min = loads.iter().copied().fold(1.0f64, f64::min);
            if max > 0.0 && (max - min) / max > 0.5 {
                alerts.push(FleetAlert {
                    severity: AlertSeverity::Info,
                    message: format!(
                        "load imbalance: busiest at {:.0}%, idlest at {:.0}%",
                        max * 100.0,
                        min * 100.0
                    ),
                    recommendation: "prefer the least-loaded or adaptive strategy".to_string(),
                });
            }
        }

        if statistics.unhealthy + statistics.offline > 0 {
            score *= statistics.healthy.max(1) as f64 / statistics.worker_count as f64;
        }

        FleetHealthReport {
            statistics,
            alerts,
            score: score.clamp(0.0, 1.0),
        }
    }

    /// Reclassifies every worker's health from heartbeat age and evicts those
    /// past the hard TTL. Returns the evicted worker ids.
    pub async fn sweep_once(&self) -> Result<Vec<String>> {
        let ttl = chrono::Duration::seconds(self.config.eviction_ttl_secs as i64);
        let mut evicted = Vec::new();
        let mut reclassified = Vec::new();

        for mut entry in self.workers.iter_mut() {
            let age = entry.heartbeat_age();
            if age >= ttl {
                evicted.push(entry.id.clone());
            } else if entry.health != WorkerHealth::Offline {
                let health = classify_health(age, &self.heartbeat_config);
                if health != entry.health {
                    entry.health = health;
                    reclassified.push(entry.clone());
                }
            }
        }

        for record in reclassified {
            self.persist(&record).await?;
        }
        for worker_id in &evicted {
            warn!(worker_id = %worker_id, "Evicting worker past heartbeat TTL");
            self.workers.remove(worker_id);
            self.store.delete(&registration_key(worker_id)).await?;
        }
        Ok(evicted)
    }

    /// Starts the background eviction sweep. Idempotent.
    pub fn start_sweep(&self) {
        let mut guard = self.shutdown_tx.lock();
        if guard.is_some() {
            return;
        }
        let Some(registry) = self.weak.upgrade() else {
            return;
        };
        let (tx, mut rx) = watch::channel(false);
        *guard = Some(tx);
        let interval = Duration::from_secs(self.config.sweep_interval_secs);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = registry.sweep_once().await {
                            warn!(error = %e, "Registry sweep failed");
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
        *self.sweep_handle.lock() = Some(handle);
    }

    pub async fn stop_sweep(&self) {
        let tx = self.shutdown_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(true);
        }
        let handle = self.sweep_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Applies `f` under the map lock and returns the updated record. The
    /// store write happens after the lock is dropped.
    fn mutate(
        &self,
        worker_id: &str,
        f: impl FnOnce(&mut WorkerRecord),
    ) -> Result<WorkerRecord> {
        let mut entry = self
            .workers
            .get_mut(worker_id)
            .ok_or_else(|| SwarmError::WorkerNotFound(worker_id.to_string()))?;
        f(entry.value_mut());
        Ok(entry.clone())
    }

    async fn persist(&self, record: &WorkerRecord) -> Result<()> {
        self.store
            .set(
                &registration_key(&record.id),
                serde_json::to_value(record)?,
                Some(Duration::from_secs(self.config.record_ttl_secs)),
            )
            .await
    }
}
