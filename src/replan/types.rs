use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::planner::{Plan, WorldState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    PreconditionFailed,
    ResourceUnavailable,
    TimeoutExceeded,
    DependencyBlocked,
    QualityGateFailed,
    ExecutionFailed,
}

impl std::fmt::Display for FailureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreconditionFailed => write!(f, "precondition-failed"),
            Self::ResourceUnavailable => write!(f, "resource-unavailable"),
            Self::TimeoutExceeded => write!(f, "timeout-exceeded"),
            Self::DependencyBlocked => write!(f, "dependency-blocked"),
            Self::QualityGateFailed => write!(f, "quality-gate-failed"),
            Self::ExecutionFailed => write!(f, "execution-failed"),
        }
    }
}

/// A dependency the failed action was waiting on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub completed: bool,
}

/// Execution context captured at the moment of failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureContext {
    pub task_id: Option<String>,
    pub worker_id: Option<String>,
    pub resource_id: Option<String>,
    pub dependencies: Vec<Dependency>,
    pub expected_duration_ms: Option<u64>,
}

impl FailureContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_worker(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn with_resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>, completed: bool) -> Self {
        self.dependencies.push(Dependency {
            name: name.into(),
            completed,
        });
        self
    }

    pub fn with_expected_duration_ms(mut self, ms: u64) -> Self {
        self.expected_duration_ms = Some(ms);
        self
    }

    pub fn incomplete_dependencies(&self) -> Vec<&Dependency> {
        self.dependencies.iter().filter(|d| !d.completed).collect()
    }
}

/// One detected execution fault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Failure {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub failure_type: FailureType,
    /// Name of the action that failed.
    pub action: String,
    pub error: String,
    pub context: FailureContext,
    pub retry_count: u32,
    pub root_cause: Option<RootCause>,
}

impl Failure {
    pub fn new(
        failure_type: FailureType,
        action: impl Into<String>,
        error: impl Into<String>,
        context: FailureContext,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            failure_type,
            action: action.into(),
            error: error.into(),
            context,
            retry_count: 0,
            root_cause: None,
        }
    }

    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    pub fn is_recoverable(&self) -> bool {
        self.root_cause
            .as_ref()
            .map(|rc| rc.recoverable)
            .unwrap_or(true)
    }

    pub fn severity(&self) -> Severity {
        self.root_cause
            .as_ref()
            .map(|rc| rc.severity)
            .unwrap_or(Severity::Medium)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RootCauseCategory {
    Precondition,
    Resource,
    Timing,
    Dependency,
    Execution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootCause {
    pub category: RootCauseCategory,
    pub reason: String,
    pub contributing_factors: Vec<String>,
    pub severity: Severity,
    pub recoverable: bool,
}

/// Closed set of replanning strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplanStrategy {
    RetryWithBackoff,
    AlternativePath,
    SimplifyGoal,
    RequestResources,
    Escalate,
}

impl std::fmt::Display for ReplanStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RetryWithBackoff => write!(f, "retry-with-backoff"),
            Self::AlternativePath => write!(f, "alternative-path"),
            Self::SimplifyGoal => write!(f, "simplify-goal"),
            Self::RequestResources => write!(f, "request-resources"),
            Self::Escalate => write!(f, "escalate"),
        }
    }
}

/// A candidate recovery plan, ranked by confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlternativePlan {
    pub strategy: ReplanStrategy,
    /// Concrete plan when the strategy produces one; `RequestResources` and
    /// `Escalate` carry none.
    pub plan: Option<Plan>,
    pub confidence: f64,
    pub reasoning: String,
    pub tradeoffs: Vec<String>,
}

/// Outcome of direct repair attempts made before full replanning.
#[derive(Debug, Clone, Default)]
pub struct RecoveryResult {
    pub success: bool,
    pub recovery_actions: Vec<String>,
    pub restored_state: Option<WorldState>,
}
