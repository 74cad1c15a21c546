use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use super::executor::{ActionExecutor, Decision, StepAssignment};
use super::signal::{Signal, SignalHandler};
use crate::config::SwarmConfig;
use crate::error::{Result, SwarmError};
use crate::lock::{backoff_delay, ConflictStrategy, LockManager, LockRequest};
use crate::planner::{generate_plan, Action, Goal, Plan, WorldState};
use crate::registry::{DiscoveryFilter, LoadBalancer, SelectionStrategy, WorkerRegistry};
use crate::replan::{
    AlternativePlanner, Failure, FailureContext, FailureDetector, FailureType, RecoveryExecutor,
    ReplanStrategy, RootCauseAnalyzer, StrategyLedger,
};
use crate::store::{checkpoint_key, task_state_key, KeyValueStore};
use crate::sync::CausalMemory;
use crate::tracker::IssueTracker;

/// One ready task as handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub task_id: String,
    pub initial_state: WorldState,
    pub goal: Goal,
    pub actions: Vec<Action>,
    pub required_capabilities: Vec<String>,
    pub conflict_strategy: ConflictStrategy,
}

impl TaskSpec {
    pub fn new(task_id: impl Into<String>, initial_state: WorldState, goal: Goal) -> Self {
        Self {
            task_id: task_id.into(),
            initial_state,
            goal,
            actions: Vec::new(),
            required_capabilities: Vec::new(),
            conflict_strategy: ConflictStrategy::Retry,
        }
    }

    pub fn with_actions(mut self, actions: Vec<Action>) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.required_capabilities = capabilities;
        self
    }

    pub fn with_conflict_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = strategy;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Another worker holds the task; not an error.
    NotAcquired,
    /// Marked for manual intervention with the given reason.
    Escalated(String),
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task_id: String,
    pub outcome: TaskOutcome,
    pub steps_executed: usize,
    pub failures: Vec<Failure>,
    pub recovery_actions: Vec<String>,
}

/// What the failure pipeline decided the step loop should do next.
enum StepResolution {
    Retry { delay: Duration },
    NewPlan { plan: Plan },
    NewGoal { goal: Goal, plan: Plan },
    Wait { delay: Duration },
    Escalate(String),
}

/// Drives ready tasks through plan → lock → select → execute → replan.
pub struct TaskOrchestrator {
    identity: LockRequest,
    config: SwarmConfig,
    tracker: Arc<dyn IssueTracker>,
    store: Arc<dyn KeyValueStore>,
    registry: Arc<WorkerRegistry>,
    memory: Arc<CausalMemory>,
    balancer: LoadBalancer,
    lock_manager: Arc<LockManager>,
    ledger: Arc<StrategyLedger>,
    analyzer: RootCauseAnalyzer,
    alternative_planner: AlternativePlanner,
    recovery: RecoveryExecutor,
    executor: Arc<dyn ActionExecutor>,
    signal: SignalHandler,
}

impl TaskOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: LockRequest,
        config: SwarmConfig,
        tracker: Arc<dyn IssueTracker>,
        store: Arc<dyn KeyValueStore>,
        registry: Arc<WorkerRegistry>,
        memory: Arc<CausalMemory>,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        let lock_manager = Arc::new(LockManager::new(
            Arc::clone(&tracker),
            Arc::clone(&store),
            config.lock.clone(),
        ));
        let ledger = Arc::new(StrategyLedger::new());
        Self {
            analyzer: RootCauseAnalyzer::new(config.recovery.max_retries),
            alternative_planner: AlternativePlanner::new(
                Arc::clone(&ledger),
                config.recovery.clone(),
                config.planner.clone(),
            ),
            recovery: RecoveryExecutor::new(
                Arc::clone(&store),
                Arc::clone(&registry),
                Arc::clone(&lock_manager),
                config.recovery.clone(),
            ),
            balancer: LoadBalancer::new(SelectionStrategy::Adaptive),
            identity,
            config,
            tracker,
            store,
            registry,
            memory,
            lock_manager,
            ledger,
            executor,
            signal: SignalHandler::new(),
        }
    }

    pub fn signal(&self) -> SignalHandler {
        self.signal.clone()
    }

    pub fn ledger(&self) -> Arc<StrategyLedger> {
        Arc::clone(&self.ledger)
    }

    pub fn lock_manager(&self) -> Arc<LockManager> {
        Arc::clone(&self.lock_manager)
    }

    /// Runs one task end to end. Losing the lock race yields
    /// [`TaskOutcome::NotAcquired`]; exhausting recovery escalates instead of
    /// erroring.
    pub async fn run_task(&self, spec: TaskSpec) -> Result<TaskReport> {
        if self.signal.is_cancelled() {
            return Err(SwarmError::ShuttingDown);
        }

        let mut goal = spec.goal.clone();
        let plan = match generate_plan(
            &spec.initial_state,
            &goal.state,
            &spec.actions,
            self.config.planner.max_depth,
        ) {
            Some(plan) => plan,
            // A null plan is not fatal: try the simplified goal before
            // declaring the task unplannable.
            None => match self.plan_simplified(&spec, &goal) {
                Some((reduced, plan)) => {
                    info!(task_id = %spec.task_id, "Planning against simplified goal");
                    goal = reduced;
                    plan
                }
                None => {
                    self.escalate_task(&spec.task_id, "no plan reaches the goal")
                        .await?;
                    return Ok(TaskReport {
                        task_id: spec.task_id.clone(),
                        outcome: TaskOutcome::Escalated("no plan reaches the goal".into()),
                        steps_executed: 0,
                        failures: Vec::new(),
                        recovery_actions: Vec::new(),
                    });
                }
            },
        };

        let lease = match self
            .lock_manager
            .acquire(
                &spec.task_id,
                &self.identity,
                spec.conflict_strategy,
                self.config.lock.default_max_retries,
            )
            .await
        {
            Ok(lease) => lease,
            Err(e)
                if e.is_lock_conflict()
                    || matches!(e, SwarmError::LockAcquisitionFailed { .. }) =>
            {
                debug!(task_id = %spec.task_id, "Task already claimed elsewhere");
                return Ok(TaskReport {
                    task_id: spec.task_id.clone(),
                    outcome: TaskOutcome::NotAcquired,
                    steps_executed: 0,
                    failures: Vec::new(),
                    recovery_actions: Vec::new(),
                });
            }
            Err(e) => return Err(e),
        };

        let report = self.execute_plan(&spec, goal, plan).await;
        let released = lease.release(&self.lock_manager).await;
        let report = report?;
        released?;
        Ok(report)
    }

    /// Runs a batch with bounded parallelism, honoring drain/cancel.
    pub async fn run_all(&self, specs: Vec<TaskSpec>) -> Vec<Result<TaskReport>> {
        stream::iter(specs)
            .filter(|_| futures::future::ready(self.signal.accepting_tasks()))
            .map(|spec| self.run_task(spec))
            .buffer_unordered(self.config.orchestrator.max_parallel_tasks)
            .collect()
            .await
    }

    /// Flushes shared memory and stops background loops owned here.
    pub async fn shutdown(&self) -> Result<()> {
        self.signal.cancel();
        self.registry.stop_sweep().await;
        self.memory.stop().await
    }

    fn plan_simplified(&self, spec: &TaskSpec, goal: &Goal) -> Option<(Goal, Plan)> {
        let reduced = goal.simplified()?;
        let plan = generate_plan(
            &spec.initial_state,
            &reduced,
            &spec.actions,
            self.config.planner.max_depth,
        )?;
        Some((Goal::new(reduced), plan))
    }

    async fn execute_plan(
        &self,
        spec: &TaskSpec,
        mut goal: Goal,
        mut plan: Plan,
    ) -> Result<TaskReport> {
        let mut state = spec.initial_state.clone();
        let mut failures: Vec<Failure> = Vec::new();
        let mut recovery_log: Vec<String> = Vec::new();
        let mut retry_counts: HashMap<String, u32> = HashMap::new();
        let mut pending_strategy: Option<(FailureType, ReplanStrategy)> = None;
        let mut checkpoint_seq: u64 = 0;
        let mut steps_executed = 0usize;
        let mut index = 0usize;

        self.announce_plan(&spec.task_id, &plan, &spec.required_capabilities)
            .await;

        while index < plan.actions.len() {
            match self.signal.check() {
                Signal::Cancel => {
                    return Ok(TaskReport {
                        task_id: spec.task_id.clone(),
                        outcome: TaskOutcome::Cancelled,
                        steps_executed,
                        failures,
                        recovery_actions: recovery_log,
                    });
                }
                Signal::Pause => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
                _ => {}
            }

            let action = plan.actions[index].clone();
            let candidates = self.registry.discover(&DiscoveryFilter::new());
            let worker = self
                .balancer
                .select(candidates, &spec.required_capabilities);

            let outcome = match &worker {
                Some(worker) => {
                    let _ = self.registry.update_task_count(&worker.id, 1).await;
                    let started = Instant::now();
                    let result = self
                        .executor
                        .execute(&spec.task_id, &action, worker)
                        .await;
                    let elapsed = started.elapsed().as_millis() as u64;
                    let _ = self.registry.update_task_count(&worker.id, -1).await;
                    let _ = self
                        .registry
                        .record_task_completion(&worker.id, result.is_ok(), elapsed)
                        .await;
                    result
                }
                None => Err(SwarmError::Other(
                    "no workers with free capacity match the requirements".to_string(),
                )),
            };

            match outcome {
                Ok(()) => {
                    if let Some((failure_type, strategy)) = pending_strategy.take() {
                        self.ledger.record_successful_strategy(failure_type, strategy);
                    }
                    state = state.apply(&action.effects);
                    checkpoint_seq += 1;
                    self.record_progress(&spec.task_id, checkpoint_seq, &state)
                        .await;
                    steps_executed += 1;
                    index += 1;
                }
                Err(e) => {
                    if let Some((failure_type, strategy)) = pending_strategy.take() {
                        self.ledger.record_failed_strategy(failure_type, strategy);
                    }
                    let retry_count = *retry_counts.get(&action.name).unwrap_or(&0);
                    let (failure, resolution) = self
                        .resolve_failure(
                            spec,
                            &action,
                            &e.to_string(),
                            worker.as_ref().map(|w| w.id.clone()),
                            retry_count,
                            &mut state,
                            &goal,
                            &mut recovery_log,
                        )
                        .await;
                    let failure_type = failure.failure_type;
                    failures.push(failure);

                    match resolution {
                        StepResolution::Retry { delay } => {
                            retry_counts.insert(action.name.clone(), retry_count + 1);
                            pending_strategy =
                                Some((failure_type, ReplanStrategy::RetryWithBackoff));
                            tokio::time::sleep(delay).await;
                        }
                        StepResolution::NewPlan { plan: replacement } => {
                            pending_strategy =
                                Some((failure_type, ReplanStrategy::AlternativePath));
                            plan = replacement;
                            index = 0;
                            self.announce_plan(
                                &spec.task_id,
                                &plan,
                                &spec.required_capabilities,
                            )
                            .await;
                        }
                        StepResolution::NewGoal {
                            goal: reduced,
                            plan: replacement,
                        } => {
                            pending_strategy = Some((failure_type, ReplanStrategy::SimplifyGoal));
                            goal = reduced;
                            plan = replacement;
                            index = 0;
                            self.announce_plan(
                                &spec.task_id,
                                &plan,
                                &spec.required_capabilities,
                            )
                            .await;
                        }
                        StepResolution::Wait { delay } => {
                            retry_counts.insert(action.name.clone(), retry_count + 1);
                            pending_strategy =
                                Some((failure_type, ReplanStrategy::RequestResources));
                            tokio::time::sleep(delay).await;
                        }
                        StepResolution::Escalate(reason) => {
                            self.escalate_task(&spec.task_id, &reason).await?;
                            return Ok(TaskReport {
                                task_id: spec.task_id.clone(),
                                outcome: TaskOutcome::Escalated(reason),
                                steps_executed,
                                failures,
                                recovery_actions: recovery_log,
                            });
                        }
                    }
                }
            }
        }

        debug_assert!(state.satisfies(&goal.state));
        self.memory.force_sync().await?;
        info!(task_id = %spec.task_id, steps = steps_executed, "Task completed");
        Ok(TaskReport {
            task_id: spec.task_id.clone(),
            outcome: TaskOutcome::Completed,
            steps_executed,
            failures,
            recovery_actions: recovery_log,
        })
    }

    /// The replanning pipeline for one failed step: classify, analyze,
    /// repair, generate alternatives, pick the next move.
    #[allow(clippy::too_many_arguments)]
    async fn resolve_failure(
        &self,
        spec: &TaskSpec,
        action: &Action,
        error: &str,
        worker_id: Option<String>,
        retry_count: u32,
        state: &mut WorldState,
        goal: &Goal,
        recovery_log: &mut Vec<String>,
    ) -> (Failure, StepResolution) {
        let mut context = FailureContext::new()
            .with_task(&spec.task_id)
            .with_resource(&spec.task_id);
        if let Some(worker_id) = &worker_id {
            context = context.with_worker(worker_id);
        }

        let mut failure =
            FailureDetector::detect(&action.name, error, context).with_retry_count(retry_count);
        let workers = self.registry.discover(&DiscoveryFilter::new());
        failure.root_cause = Some(self.analyzer.analyze(&failure, &workers));
        self.ledger.record_failure_event(&failure);
        warn!(
            task_id = %spec.task_id,
            action = %failure.action,
            failure_type = %failure.failure_type,
            retry_count,
            "Step failed"
        );

        let recovery = self.recovery.attempt_recovery(&failure, state).await;
        recovery_log.extend(recovery.recovery_actions.clone());
        if let Some(restored) = recovery.restored_state {
            *state = restored;
        }

        let alternatives =
            self.alternative_planner
                .generate(state, goal, &spec.actions, &failure);
        if self.recovery.escalate_if_needed(&failure, &alternatives) {
            let reason = failure
                .root_cause
                .as_ref()
                .map(|rc| rc.reason.clone())
                .unwrap_or_else(|| error.to_string());
            return (failure, StepResolution::Escalate(reason));
        }

        let best = &alternatives[0];
        let resolution = match best.strategy {
            ReplanStrategy::RetryWithBackoff => StepResolution::Retry {
                delay: backoff_delay(
                    retry_count,
                    self.config.recovery.retry_base_delay_ms,
                    self.config.lock.max_delay_ms,
                    &self.identity.worker_id,
                ),
            },
            ReplanStrategy::AlternativePath => match &best.plan {
                Some(plan) => StepResolution::NewPlan { plan: plan.clone() },
                None => StepResolution::Escalate("alternative path had no plan".into()),
            },
            ReplanStrategy::SimplifyGoal => match (&best.plan, goal.simplified()) {
                (Some(plan), Some(reduced)) => StepResolution::NewGoal {
                    goal: Goal::new(reduced),
                    plan: plan.clone(),
                },
                _ => StepResolution::Escalate("goal simplification had no plan".into()),
            },
            ReplanStrategy::RequestResources => StepResolution::Wait {
                delay: Duration::from_millis(self.config.orchestrator.cycle_interval_ms),
            },
            ReplanStrategy::Escalate => {
                StepResolution::Escalate("no viable recovery strategy".into())
            }
        };
        (failure, resolution)
    }

    /// Hands the adopted plan and its current resource allocation across the
    /// executor boundary before its steps run.
    async fn announce_plan(&self, task_id: &str, plan: &Plan, capabilities: &[String]) {
        let candidates = self.registry.discover(&DiscoveryFilter::new());
        let assignments: Vec<StepAssignment> = plan
            .actions
            .iter()
            .filter_map(|action| {
                self.balancer
                    .select(candidates.clone(), capabilities)
                    .map(|worker| StepAssignment {
                        action: action.name.clone(),
                        worker_id: worker.id,
                    })
            })
            .collect();
        let decision = Decision {
            plan: plan.clone(),
            assignments,
        };
        if let Err(e) = self.executor.begin(task_id, &decision).await {
            warn!(task_id, error = %e, "Executor rejected plan announcement");
        }
    }

    async fn record_progress(&self, task_id: &str, seq: u64, state: &WorldState) {
        if let Ok(raw) = serde_json::to_value(state) {
            if let Err(e) = self.store.set(&checkpoint_key(task_id, seq), raw, None).await {
                warn!(task_id, seq, error = %e, "Checkpoint write failed");
            }
        }
        if let Ok(raw) = serde_json::to_value(state) {
            self.memory.write(&task_state_key(task_id), raw);
        }
    }

    /// Marks a task for manual intervention. A task that exhausts all
    /// alternatives is escalated, never silently dropped or retried forever.
    async fn escalate_task(&self, task_id: &str, reason: &str) -> Result<()> {
        warn!(task_id, reason, "Escalating task for manual intervention");
        let body = serde_json::to_string(&serde_json::json!({
            "escalation": {
                "worker_id": self.identity.worker_id,
                "reason": reason,
                "escalated_at": chrono::Utc::now(),
            }
        }))?;
        self.tracker.add_comment(task_id, &body).await
    }
}
