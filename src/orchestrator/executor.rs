use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::planner::{Action, Plan};
use crate::registry::WorkerRecord;

/// One plan step bound to the worker chosen to run it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepAssignment {
    pub action: String,
    pub worker_id: String,
}

/// The selected plan plus its resource allocation, handed across the
/// executor boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub plan: Plan,
    pub assignments: Vec<StepAssignment>,
}

/// Collaborator boundary: performs the actual work of one action.
///
/// The core never inspects how the work is done; it only learns, per action,
/// whether the step completed or failed.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Receives the selected plan and its resource allocation before any of
    /// its steps run. Called again whenever replanning adopts a new plan.
    async fn begin(&self, _task_id: &str, _decision: &Decision) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, task_id: &str, action: &Action, worker: &WorkerRecord) -> Result<()>;
}
