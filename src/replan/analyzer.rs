use super::types::{Failure, FailureType, RootCause, RootCauseCategory, Severity};
use crate::registry::WorkerRecord;

/// Markers for faults no amount of retrying will fix.
const NON_RECOVERABLE_MARKERS: &[&str] = &[
    "permission",
    "unauthorized",
    "forbidden",
    "authorization",
    "access denied",
];

/// Root-cause analysis over a failure, the current fleet, and retry history.
pub struct RootCauseAnalyzer {
    max_retries: u32,
}

impl RootCauseAnalyzer {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn analyze(&self, failure: &Failure, workers: &[WorkerRecord]) -> RootCause {
        let category = Self::categorize(failure.failure_type);
        let mut factors = Vec::new();

        self.inspect_resources(failure, workers, &mut factors);
        self.inspect_worker_history(failure, workers, &mut factors);
        self.inspect_dependencies(failure, &mut factors);

        let recoverable = !Self::matches_non_recoverable(&failure.error);
        let severity = self.assess_severity(failure, category, recoverable);

        RootCause {
            reason: format!(
                "{} during '{}': {}",
                failure.failure_type, failure.action, failure.error
            ),
            category,
            contributing_factors: factors,
            severity,
            recoverable,
        }
    }

    fn categorize(failure_type: FailureType) -> RootCauseCategory {
        match failure_type {
            FailureType::PreconditionFailed => RootCauseCategory::Precondition,
            FailureType::ResourceUnavailable => RootCauseCategory::Resource,
            FailureType::TimeoutExceeded => RootCauseCategory::Timing,
            FailureType::DependencyBlocked => RootCauseCategory::Dependency,
            FailureType::QualityGateFailed | FailureType::ExecutionFailed => {
                RootCauseCategory::Execution
            }
        }
    }

    fn inspect_resources(
        &self,
        failure: &Failure,
        workers: &[WorkerRecord],
        factors: &mut Vec<String>,
    ) {
        if let Some(worker_id) = &failure.context.worker_id {
            if let Some(worker) = workers.iter().find(|w| &w.id == worker_id) {
                if worker.available_capacity() == 0 {
                    factors.push(format!(
                        "assigned worker {} is at full capacity ({}/{})",
                        worker.id, worker.current_tasks, worker.max_concurrent_tasks
                    ));
                }
            }
        }
        if !workers.is_empty() && workers.iter().all(|w| w.available_capacity() == 0) {
            factors.push("no worker in the fleet has free capacity".to_string());
        }
    }

    fn inspect_worker_history(
        &self,
        failure: &Failure,
        workers: &[WorkerRecord],
        factors: &mut Vec<String>,
    ) {
        let (Some(worker_id), Some(expected_ms)) = (
            &failure.context.worker_id,
            failure.context.expected_duration_ms,
        ) else {
            return;
        };
        if let Some(worker) = workers.iter().find(|w| &w.id == worker_id) {
            if worker.metrics.average_task_duration_ms > expected_ms as f64 {
                factors.push(format!(
                    "worker {} averages {:.0}ms per task against an expected {}ms",
                    worker.id, worker.metrics.average_task_duration_ms, expected_ms
                ));
            }
            if worker.metrics.success_rate() < 0.5 {
                factors.push(format!(
                    "worker {} succeeds on only {:.0}% of tasks",
                    worker.id,
                    worker.metrics.success_rate() * 100.0
                ));
            }
        }
    }

    fn inspect_dependencies(&self, failure: &Failure, factors: &mut Vec<String>) {
        for dep in failure.context.incomplete_dependencies() {
            factors.push(format!("dependency '{}' has not completed", dep.name));
        }
    }

    fn assess_severity(
        &self,
        failure: &Failure,
        category: RootCauseCategory,
        recoverable: bool,
    ) -> Severity {
        if failure.retry_count >= self.max_retries {
            return Severity::Critical;
        }
        if !recoverable {
            return Severity::High;
        }
        match category {
            RootCauseCategory::Resource => Severity::High,
            RootCauseCategory::Timing
            | RootCauseCategory::Dependency
            | RootCauseCategory::Execution => Severity::Medium,
            RootCauseCategory::Precondition => Severity::Low,
        }
    }

    fn matches_non_recoverable(error: &str) -> bool {
        let msg = error.to_lowercase();
        NON_RECOVERABLE_MARKERS
            .iter()
            .any(|marker| msg.contains(marker))
    }
}
