use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, error, warn};

use super::types::{HeartbeatMetrics, HeartbeatRecord, WorkerHealth};
use crate::config::HeartbeatConfig;
use crate::error::Result;
use crate::store::{heartbeat_key, KeyValueStore};

#[derive(Debug)]
struct EmitterState {
    health: WorkerHealth,
    current_tasks: Vec<String>,
    capacity_available: u32,
    cpu_usage: f64,
    memory_usage: f64,
    tasks_completed: u64,
    tasks_failed: u64,
    consecutive_failures: u32,
}

/// Periodic heartbeat emission for one worker.
///
/// Emission failures are retried with a linearly growing delay; once a full
/// tick's retry budget is spent the worker marks itself unhealthy (visible to
/// peers on the next successful emission) but keeps emitting rather than
/// giving up.
pub struct HeartbeatEmitter {
    weak: Weak<Self>,
    worker_id: String,
    store: Arc<dyn KeyValueStore>,
    config: HeartbeatConfig,
    started_at: Instant,
    state: RwLock<EmitterState>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    emit_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl HeartbeatEmitter {
    pub fn new(
        worker_id: impl Into<String>,
        store: Arc<dyn KeyValueStore>,
        config: HeartbeatConfig,
    ) -> Arc<Self> {
        let worker_id = worker_id.into();
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            worker_id,
            store,
            config,
            started_at: Instant::now(),
            state: RwLock::new(EmitterState {
                health: WorkerHealth::Healthy,
                current_tasks: Vec::new(),
                capacity_available: 0,
                cpu_usage: 0.0,
                memory_usage: 0.0,
                tasks_completed: 0,
                tasks_failed: 0,
                consecutive_failures: 0,
            }),
            shutdown_tx: Mutex::new(None),
            emit_handle: Mutex::new(None),
        })
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn set_current_tasks(&self, tasks: Vec<String>) {
        self.state.write().current_tasks = tasks;
    }

    pub fn set_capacity_available(&self, capacity: u32) {
        self.state.write().capacity_available = capacity;
    }

    pub fn set_usage(&self, cpu: f64, memory: f64) {
        let mut state = self.state.write();
        state.cpu_usage = cpu;
        state.memory_usage = memory;
    }

    pub fn record_task_result(&self, success: bool) {
        let mut state = self.state.write();
        if success {
            state.tasks_completed += 1;
        } else {
            state.tasks_failed += 1;
        }
    }

    pub fn health(&self) -> WorkerHealth {
        self.state.read().health
    }

    fn build_record(&self, health: WorkerHealth) -> HeartbeatRecord {
        let state = self.state.read();
        HeartbeatRecord {
            worker_id: self.worker_id.clone(),
            timestamp: Utc::now(),
            health,
            current_tasks: state.current_tasks.clone(),
            capacity_available: state.capacity_available,
            metrics: HeartbeatMetrics {
                cpu_usage: state.cpu_usage,
                memory_usage: state.memory_usage,
                tasks_completed: state.tasks_completed,
                tasks_failed: state.tasks_failed,
                uptime_secs: self.started_at.elapsed().as_secs(),
            },
        }
    }

    async fn write_record(&self, record: &HeartbeatRecord) -> Result<()> {
        self.store
            .set(
                &heartbeat_key(&self.worker_id),
                serde_json::to_value(record)?,
                Some(Duration::from_secs(self.config.record_ttl_secs)),
            )
            .await
    }

    /// One emission with its retry budget. Public so tests and synchronous
    /// callers can force a beat outside the background loop.
    pub async fn emit_once(&self) -> Result<()> {
        let record = self.build_record(self.health());

        let mut last_err = None;
        for attempt in 0..self.config.emit_retry_ceiling {
            match self.write_record(&record).await {
                Ok(()) => {
                    let mut state = self.state.write();
                    state.consecutive_failures = 0;
                    if state.health == WorkerHealth::Unhealthy {
                        state.health = WorkerHealth::Healthy;
                    }
                    return Ok(());
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        worker_id = %self.worker_id,
                        attempt,
                        error = %e,
                        "Heartbeat write failed"
                    );
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(
                        self.config.emit_retry_delay_ms * (attempt as u64 + 1),
                    ))
                    .await;
                }
                Err(e) => return Err(e),
            }
        }

        let mut state = self.state.write();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.config.emit_retry_ceiling {
            state.health = WorkerHealth::Unhealthy;
            error!(
                worker_id = %self.worker_id,
                failures = state.consecutive_failures,
                "Persistent heartbeat failure, self-marking unhealthy"
            );
        }
        Err(last_err.unwrap_or_else(|| crate::error::SwarmError::Store("heartbeat write".into())))
    }

    /// Starts the emission loop. Idempotent.
    pub fn start(&self) {
        let mut guard = self.shutdown_tx.lock();
        if guard.is_some() {
            return;
        }
        let Some(emitter) = self.weak.upgrade() else {
            return;
        };
        let (tx, mut rx) = watch::channel(false);
        *guard = Some(tx);
        let interval = Duration::from_secs(self.config.interval_secs);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // The loop survives emission failure; a worker that
                        // cannot write heartbeats still keeps trying.
                        let _ = emitter.emit_once().await;
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            debug!(worker_id = %emitter.worker_id, "Emission loop shutdown");
                            break;
                        }
                    }
                }
            }
        });
        *self.emit_handle.lock() = Some(handle);
    }

    /// Stops the loop and emits one final offline beat so peers recognize
    /// departure immediately instead of waiting out the stale threshold.
    pub async fn stop(&self) -> Result<()> {
        let tx = self.shutdown_tx.lock().take();
        if let Some(tx) = tx {
            let _ = tx.send(true);
        }
        let handle = self.emit_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let record = self.build_record(WorkerHealth::Offline);
        self.state.write().health = WorkerHealth::Offline;
        self.write_record(&record).await
    }
}
