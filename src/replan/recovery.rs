use std::sync::Arc;

use tracing::{debug, info, warn};

use super::types::{
    AlternativePlan, Failure, RecoveryResult, ReplanStrategy, RootCauseCategory, Severity,
};
use crate::config::RecoveryConfig;
use crate::heartbeat::WorkerHealth;
use crate::lock::LockManager;
use crate::planner::WorldState;
use crate::registry::{DiscoveryFilter, WorkerRegistry};
use crate::store::{task_state_key, KeyValueStore};

/// Direct, lower-cost repairs applied before full replanning.
pub struct RecoveryExecutor {
    store: Arc<dyn KeyValueStore>,
    registry: Arc<WorkerRegistry>,
    lock_manager: Arc<LockManager>,
    config: RecoveryConfig,
}

impl RecoveryExecutor {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        registry: Arc<WorkerRegistry>,
        lock_manager: Arc<LockManager>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            store,
            registry,
            lock_manager,
            config,
        }
    }

    /// Tries every repair the failure qualifies for. Individual repair
    /// errors are logged and skipped; a failed repair must not make the
    /// situation worse than no repair.
    pub async fn attempt_recovery(&self, failure: &Failure, state: &WorldState) -> RecoveryResult {
        let mut actions = Vec::new();
        let mut restored_state = None;
        let category = failure.root_cause.as_ref().map(|rc| rc.category);

        if failure.severity() >= Severity::Critical {
            match self.rollback_to_checkpoint(failure).await {
                Some((seq, checkpoint)) => {
                    actions.push(format!("rolled back to checkpoint {}", seq));
                    restored_state = Some(checkpoint);
                }
                None => debug!(action = %failure.action, "No checkpoint to roll back to"),
            }
        }

        if category == Some(RootCauseCategory::Resource) {
            if let Some(candidate) = self.find_reallocation_target(failure) {
                actions.push(format!("reallocated task to worker {}", candidate));
            }
        }

        if let Some(worker_id) = &failure.context.worker_id {
            if self
                .registry
                .get(worker_id)
                .map(|w| w.health == WorkerHealth::Unhealthy)
                .unwrap_or(false)
            {
                match self.registry.set_health(worker_id, WorkerHealth::Healthy).await {
                    Ok(()) => actions.push(format!("reset failed worker {} to healthy", worker_id)),
                    Err(e) => warn!(worker_id, error = %e, "Worker reset failed"),
                }
            }
        }

        if let (Some(resource_id), Some(worker_id)) = (
            &failure.context.resource_id,
            &failure.context.worker_id,
        ) {
            match self.lock_manager.refresh(resource_id, worker_id).await {
                Ok(()) => actions.push(format!("refreshed lock expiry on {}", resource_id)),
                Err(e) => debug!(resource_id, error = %e, "Lock refresh skipped"),
            }
        }

        if category == Some(RootCauseCategory::Dependency) {
            if let Some(action) = self.restore_shared_context(failure, state).await {
                actions.push(action);
            }
        }

        let success = !actions.is_empty();
        if success {
            info!(
                failure_id = %failure.id,
                repairs = actions.len(),
                "Recovery applied"
            );
        }
        RecoveryResult {
            success,
            recovery_actions: actions,
            restored_state,
        }
    }

    /// Escalation decision: unrecoverable root cause, critical severity, a
    /// spent retry budget, or escalate being the only alternative left.
    pub fn escalate_if_needed(&self, failure: &Failure, alternatives: &[AlternativePlan]) -> bool {
        if !failure.is_recoverable() {
            return true;
        }
        if failure.severity() >= Severity::Critical {
            return true;
        }
        if failure.retry_count >= self.config.max_retries {
            return true;
        }
        alternatives
            .iter()
            .all(|a| a.strategy == ReplanStrategy::Escalate)
    }

    async fn rollback_to_checkpoint(&self, failure: &Failure) -> Option<(u64, WorldState)> {
        let task_id = failure.context.task_id.as_ref()?;
        let prefix = format!("tasks/{}/checkpoints/", task_id);
        let keys = self.store.list(&prefix).await.ok()?;

        let latest = keys
            .iter()
            .filter_map(|key| key.strip_prefix(&prefix)?.parse::<u64>().ok())
            .max()?;
        let raw = self
            .store
            .get(&format!("{}{}", prefix, latest))
            .await
            .ok()??;
        let checkpoint: WorldState = serde_json::from_value(raw).ok()?;
        Some((latest, checkpoint))
    }

    fn find_reallocation_target(&self, failure: &Failure) -> Option<String> {
        let filter = DiscoveryFilter::new()
            .with_health(vec![WorkerHealth::Healthy, WorkerHealth::Degraded])
            .with_min_capacity(1);
        self.registry
            .discover(&filter)
            .into_iter()
            .map(|w| w.id)
            .find(|id| Some(id) != failure.context.worker_id.as_ref())
    }

    /// Re-seeds a task's shared state record when a dependency-blocked
    /// failure turns out to be a lost context record.
    async fn restore_shared_context(
        &self,
        failure: &Failure,
        state: &WorldState,
    ) -> Option<String> {
        let task_id = failure.context.task_id.as_ref()?;
        let key = task_state_key(task_id);
        match self.store.get(&key).await {
            Ok(Some(_)) => None,
            Ok(None) => {
                let raw = serde_json::to_value(state).ok()?;
                match self.store.set(&key, raw, None).await {
                    Ok(()) => Some(format!("restored shared context for task {}", task_id)),
                    Err(e) => {
                        warn!(task_id, error = %e, "Context restore failed");
                        None
                    }
                }
            }
            Err(e) => {
                warn!(task_id, error = %e, "Context probe failed");
                None
            }
        }
    }
}
