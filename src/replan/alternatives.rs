use std::sync::Arc;

use tracing::debug;

use super::learning::StrategyLedger;
use super::types::{AlternativePlan, Failure, ReplanStrategy, RootCauseCategory};
use crate::config::{PlannerConfig, RecoveryConfig};
use crate::planner::{generate_plan, Action, Goal, Plan, WorldState};

/// Weight of historical evidence when biasing a candidate's confidence.
const HISTORY_WEIGHT: f64 = 0.3;

/// Builds ranked alternative plans after a failure.
pub struct AlternativePlanner {
    ledger: Arc<StrategyLedger>,
    recovery: RecoveryConfig,
    planner: PlannerConfig,
}

impl AlternativePlanner {
    pub fn new(
        ledger: Arc<StrategyLedger>,
        recovery: RecoveryConfig,
        planner: PlannerConfig,
    ) -> Self {
        Self {
            ledger,
            recovery,
            planner,
        }
    }

    /// Candidate plans for recovering from `failure`, sorted by descending
    /// confidence. `Escalate` is always present at confidence zero as the
    /// guaranteed fallback, and is the only candidate for unrecoverable
    /// failures.
    pub fn generate(
        &self,
        state: &WorldState,
        goal: &Goal,
        actions: &[Action],
        failure: &Failure,
    ) -> Vec<AlternativePlan> {
        let escalate = AlternativePlan {
            strategy: ReplanStrategy::Escalate,
            plan: None,
            confidence: 0.0,
            reasoning: "hand the task to manual intervention".to_string(),
            tradeoffs: vec!["requires a human; no automated progress".to_string()],
        };

        if !failure.is_recoverable() {
            return vec![escalate];
        }

        let mut candidates = Vec::new();

        if failure.retry_count < self.recovery.max_retries {
            let retried: Vec<Action> = actions
                .iter()
                .filter(|a| a.name == failure.action)
                .cloned()
                .collect();
            candidates.push(self.scored(
                failure,
                AlternativePlan {
                    strategy: ReplanStrategy::RetryWithBackoff,
                    plan: (!retried.is_empty()).then(|| Plan::new(retried)),
                    confidence: 0.5,
                    reasoning: format!(
                        "retry '{}' with backoff (attempt {} of {})",
                        failure.action,
                        failure.retry_count + 1,
                        self.recovery.max_retries
                    ),
                    tradeoffs: vec!["repeats the approach that just failed".to_string()],
                },
            ));
        }

        if let Some(plan) = self.plan_without_failed_action(state, &goal.state, actions, failure)
        {
            candidates.push(self.scored(
                failure,
                AlternativePlan {
                    strategy: ReplanStrategy::AlternativePath,
                    reasoning: format!(
                        "reach the goal without '{}' ({} steps, cost {})",
                        failure.action,
                        plan.len(),
                        plan.total_cost
                    ),
                    plan: Some(plan),
                    confidence: 0.6,
                    tradeoffs: vec!["may cost more than the original plan".to_string()],
                },
            ));
        }

        if let Some(reduced_goal) = goal.simplified() {
            if let Some(plan) =
                generate_plan(state, &reduced_goal, actions, self.planner.max_depth)
            {
                candidates.push(self.scored(
                    failure,
                    AlternativePlan {
                        strategy: ReplanStrategy::SimplifyGoal,
                        reasoning: "pursue the goal without its flexible constraints"
                            .to_string(),
                        plan: Some(plan),
                        confidence: 0.4,
                        tradeoffs: vec![
                            "delivers a reduced outcome".to_string(),
                            "dropped constraints must be revisited later".to_string(),
                        ],
                    },
                ));
            }
        }

        let category = failure.root_cause.as_ref().map(|rc| rc.category);
        if category == Some(RootCauseCategory::Resource) {
            candidates.push(self.scored(
                failure,
                AlternativePlan {
                    strategy: ReplanStrategy::RequestResources,
                    plan: None,
                    confidence: 0.45,
                    reasoning: "wait for or request additional worker capacity".to_string(),
                    tradeoffs: vec!["progress stalls until capacity appears".to_string()],
                },
            ));
        }

        candidates.push(escalate);
        candidates.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        debug!(
            failure_type = %failure.failure_type,
            candidates = candidates.len(),
            "Generated alternative plans"
        );
        candidates
    }

    fn plan_without_failed_action(
        &self,
        state: &WorldState,
        goal: &WorldState,
        actions: &[Action],
        failure: &Failure,
    ) -> Option<Plan> {
        let remaining: Vec<Action> = actions
            .iter()
            .filter(|a| a.name != failure.action)
            .cloned()
            .collect();
        if remaining.len() == actions.len() || remaining.is_empty() {
            return None;
        }
        generate_plan(state, goal, &remaining, self.planner.max_depth)
    }

    /// Biases a candidate's confidence by the strategy's historical success
    /// rate for this failure type. No history leaves the base untouched;
    /// `Escalate` is never scored (fixed at zero).
    fn scored(&self, failure: &Failure, mut candidate: AlternativePlan) -> AlternativePlan {
        if let Some(rate) = self
            .ledger
            .success_rate(failure.failure_type, candidate.strategy)
        {
            candidate.confidence =
                (candidate.confidence + HISTORY_WEIGHT * (rate - 0.5)).clamp(0.01, 0.99);
        }
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replan::{FailureContext, FailureDetector, RootCause, RootCauseAnalyzer, Severity};

    fn planner() -> AlternativePlanner {
        AlternativePlanner::new(
            Arc::new(StrategyLedger::new()),
            RecoveryConfig::default(),
            PlannerConfig::default(),
        )
    }

    fn build_actions() -> Vec<Action> {
        vec![
            Action::new("fast_build")
                .with_effect("built", true)
                .with_cost(1.0),
            Action::new("slow_build")
                .with_effect("built", true)
                .with_cost(3.0),
            Action::new("polish")
                .with_precondition("built", true)
                .with_effect("polished", true)
                .with_cost(1.0),
        ]
    }

    fn failed(action: &str, error: &str) -> Failure {
        FailureDetector::detect(action, error, FailureContext::new())
    }

    #[test]
    fn test_escalate_always_present_and_last() {
        let alternatives = planner().generate(
            &WorldState::new(),
            &Goal::new(WorldState::new().with("built", true)),
            &build_actions(),
            &failed("fast_build", "boom"),
        );
        let last = alternatives.last().unwrap();
        assert_eq!(last.strategy, ReplanStrategy::Escalate);
        assert_eq!(last.confidence, 0.0);
    }

    #[test]
    fn test_sorted_by_descending_confidence() {
        let alternatives = planner().generate(
            &WorldState::new(),
            &Goal::new(WorldState::new().with("built", true)),
            &build_actions(),
            &failed("fast_build", "boom"),
        );
        for pair in alternatives.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
    }

    #[test]
    fn test_no_retry_candidate_at_ceiling() {
        let failure = failed("fast_build", "boom").with_retry_count(3);
        let alternatives = planner().generate(
            &WorldState::new(),
            &Goal::new(WorldState::new().with("built", true)),
            &build_actions(),
            &failure,
        );
        assert!(alternatives
            .iter()
            .all(|a| a.strategy != ReplanStrategy::RetryWithBackoff));
    }

    #[test]
    fn test_alternative_path_avoids_failed_action() {
        let alternatives = planner().generate(
            &WorldState::new(),
            &Goal::new(WorldState::new().with("built", true)),
            &build_actions(),
            &failed("fast_build", "boom"),
        );
        let alt = alternatives
            .iter()
            .find(|a| a.strategy == ReplanStrategy::AlternativePath)
            .unwrap();
        let plan = alt.plan.as_ref().unwrap();
        assert_eq!(plan.action_names(), vec!["slow_build"]);
    }

    #[test]
    fn test_simplify_only_with_flexible_goal() {
        let rigid_goal = Goal::new(WorldState::new().with("built", true).with("polished", true));
        let alternatives = planner().generate(
            &WorldState::new(),
            &rigid_goal,
            &build_actions(),
            &failed("polish", "boom"),
        );
        assert!(alternatives
            .iter()
            .all(|a| a.strategy != ReplanStrategy::SimplifyGoal));

        let flexible_goal = rigid_goal.clone().with_flexible("polished");
        let alternatives = planner().generate(
            &WorldState::new(),
            &flexible_goal,
            &build_actions(),
            &failed("polish", "boom"),
        );
        let simplified = alternatives
            .iter()
            .find(|a| a.strategy == ReplanStrategy::SimplifyGoal)
            .unwrap();
        assert!(simplified.plan.is_some());
    }

    #[test]
    fn test_request_resources_only_for_resource_category() {
        let analyzer = RootCauseAnalyzer::new(3);

        let mut resource_failure = failed("fast_build", "no workers with capacity");
        resource_failure.root_cause = Some(analyzer.analyze(&resource_failure, &[]));
        let alternatives = planner().generate(
            &WorldState::new(),
            &Goal::new(WorldState::new().with("built", true)),
            &build_actions(),
            &resource_failure,
        );
        assert!(alternatives
            .iter()
            .any(|a| a.strategy == ReplanStrategy::RequestResources));

        let mut exec_failure = failed("fast_build", "boom");
        exec_failure.root_cause = Some(analyzer.analyze(&exec_failure, &[]));
        let alternatives = planner().generate(
            &WorldState::new(),
            &Goal::new(WorldState::new().with("built", true)),
            &build_actions(),
            &exec_failure,
        );
        assert!(alternatives
            .iter()
            .all(|a| a.strategy != ReplanStrategy::RequestResources));
    }

    #[test]
    fn test_unrecoverable_yields_only_escalate() {
        let mut failure = failed("fast_build", "403 forbidden");
        failure.root_cause = Some(RootCause {
            category: RootCauseCategory::Execution,
            reason: "forbidden".into(),
            contributing_factors: vec![],
            severity: Severity::High,
            recoverable: false,
        });

        let alternatives = planner().generate(
            &WorldState::new(),
            &Goal::new(WorldState::new().with("built", true)),
            &build_actions(),
            &failure,
        );
        assert_eq!(alternatives.len(), 1);
        assert_eq!(alternatives[0].strategy, ReplanStrategy::Escalate);
    }

    #[test]
    fn test_history_biases_confidence() {
        let ledger = Arc::new(StrategyLedger::new());
        for _ in 0..5 {
            ledger.record_successful_strategy(
                crate::replan::FailureType::ExecutionFailed,
                ReplanStrategy::AlternativePath,
            );
        }
        for _ in 0..5 {
            ledger.record_failed_strategy(
                crate::replan::FailureType::ExecutionFailed,
                ReplanStrategy::RetryWithBackoff,
            );
        }
        let biased = AlternativePlanner::new(
            ledger,
            RecoveryConfig::default(),
            PlannerConfig::default(),
        );

        let alternatives = biased.generate(
            &WorldState::new(),
            &Goal::new(WorldState::new().with("built", true)),
            &build_actions(),
            &failed("fast_build", "boom"),
        );
        let alt_path = alternatives
            .iter()
            .find(|a| a.strategy == ReplanStrategy::AlternativePath)
            .unwrap();
        let retry = alternatives
            .iter()
            .find(|a| a.strategy == ReplanStrategy::RetryWithBackoff)
            .unwrap();

        // Perfect history pushes above the base 0.6; zero history pushes
        // below the base 0.5.
        assert!(alt_path.confidence > 0.6);
        assert!(retry.confidence < 0.5);
    }
}
