use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use super::types::WorkerRecord;
use crate::heartbeat::WorkerHealth;

/// Normalization ceiling for average task duration when scoring performance.
/// Durations at or above this score zero on the speed axis.
const DURATION_CEILING_MS: f64 = 300_000.0;

/// System load above which the adaptive strategy starts favoring free
/// capacity over historical performance.
const ADAPTIVE_LOAD_PIVOT: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
    RoundRobin,
    LeastLoaded,
    CapabilityBased,
    PerformanceBased,
    /// Blends least-loaded and performance-based, weighted by how loaded the
    /// system currently is.
    Adaptive,
}

/// Ranks and selects workers for task placement.
///
/// Only workers that are selectable at all (healthy or degraded, with free
/// capacity) participate; ranking is by a strategy-specific priority score,
/// ties broken by worker id for determinism.
pub struct LoadBalancer {
    strategy: SelectionStrategy,
    rr_cursor: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(strategy: SelectionStrategy) -> Self {
        Self {
            strategy,
            rr_cursor: AtomicUsize::new(0),
        }
    }

    pub fn strategy(&self) -> SelectionStrategy {
        self.strategy
    }

    fn selectable(record: &WorkerRecord) -> bool {
        matches!(
            record.health,
            WorkerHealth::Healthy | WorkerHealth::Degraded
        ) && record.available_capacity() > 0
    }

    /// Strategy-specific priority in `[0, 1]`-ish range; higher is better.
    pub fn priority_score(&self, record: &WorkerRecord, system_load: f64) -> f64 {
        match self.strategy {
            SelectionStrategy::RoundRobin => {
                // Rotation handles ordering; score only separates the
                // selectable from the saturated.
                if Self::selectable(record) {
                    1.0
                } else {
                    0.0
                }
            }
            SelectionStrategy::LeastLoaded => capacity_score(record),
            SelectionStrategy::CapabilityBased => {
                // Breadth of capability, with free capacity as tiebreak.
                let breadth = (record.capabilities.len() as f64 / 8.0).min(1.0);
                breadth * 0.7 + capacity_score(record) * 0.3
            }
            SelectionStrategy::PerformanceBased => performance_score(record),
            SelectionStrategy::Adaptive => {
                // Under pressure, spare capacity matters more than history.
                let capacity_weight = if system_load > ADAPTIVE_LOAD_PIVOT {
                    0.7
                } else {
                    0.3
                };
                capacity_score(record) * capacity_weight
                    + performance_score(record) * (1.0 - capacity_weight)
            }
        }
    }

    /// Selectable workers sorted by non-increasing priority.
    pub fn prioritize(&self, workers: Vec<WorkerRecord>) -> Vec<WorkerRecord> {
        let system_load = system_load(&workers);
        let mut ranked: Vec<WorkerRecord> =
            workers.into_iter().filter(Self::selectable_ref).collect();

        if self.strategy == SelectionStrategy::RoundRobin {
            ranked.sort_by(|a, b| a.id.cmp(&b.id));
            if !ranked.is_empty() {
                let offset = self.rr_cursor.fetch_add(1, Ordering::Relaxed) % ranked.len();
                ranked.rotate_left(offset);
            }
            return ranked;
        }

        ranked.sort_by(|a, b| {
            let score_a = self.priority_score(a, system_load);
            let score_b = self.priority_score(b, system_load);
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        ranked
    }

    /// The highest-priority worker that carries all `required_capabilities`.
    pub fn select(
        &self,
        workers: Vec<WorkerRecord>,
        required_capabilities: &[String],
    ) -> Option<WorkerRecord> {
        self.prioritize(workers)
            .into_iter()
            .find(|w| w.has_capabilities(required_capabilities))
    }

    fn selectable_ref(record: &WorkerRecord) -> bool {
        Self::selectable(record)
    }
}

fn capacity_score(record: &WorkerRecord) -> f64 {
    if record.max_concurrent_tasks == 0 {
        return 0.0;
    }
    record.available_capacity() as f64 / record.max_concurrent_tasks as f64
}

fn performance_score(record: &WorkerRecord) -> f64 {
    let speed = 1.0 - (record.metrics.average_task_duration_ms / DURATION_CEILING_MS).min(1.0);
    record.metrics.success_rate() * 0.7 + speed * 0.3
}

/// Fraction of total capacity currently in use across the fleet.
fn system_load(workers: &[WorkerRecord]) -> f64 {
    let capacity: u32 = workers.iter().map(|w| w.max_concurrent_tasks).sum();
    if capacity == 0 {
        return 0.0;
    }
    let load: u32 = workers.iter().map(|w| w.current_tasks).sum();
    load as f64 / capacity as f64
}
