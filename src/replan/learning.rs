//! Outcome tracking that feeds strategy confidence and insight queries.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::types::{Failure, FailureType, ReplanStrategy};

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    successes: u64,
    failures: u64,
}

impl Tally {
    fn total(&self) -> u64 {
        self.successes + self.failures
    }

    fn rate(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.successes as f64 / self.total() as f64
        }
    }
}

/// Aggregate answers to "what keeps failing and what works against it".
#[derive(Debug, Clone, Default)]
pub struct StrategyInsights {
    /// Failure types by frequency, most frequent first.
    pub most_frequent_failures: Vec<(FailureType, u64)>,
    /// Best-performing strategy per failure type, with its success rate.
    pub most_effective_strategies: Vec<(FailureType, ReplanStrategy, f64)>,
    /// Action names by failure frequency, riskiest first.
    pub riskiest_actions: Vec<(String, u64)>,
}

/// Per-(failure type, strategy) success/failure counters.
#[derive(Debug, Default)]
pub struct StrategyLedger {
    strategies: RwLock<HashMap<(FailureType, ReplanStrategy), Tally>>,
    failures_by_type: RwLock<HashMap<FailureType, u64>>,
    failures_by_action: RwLock<HashMap<String, u64>>,
}

impl StrategyLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one observed failure toward frequency insights.
    pub fn record_failure_event(&self, failure: &Failure) {
        *self
            .failures_by_type
            .write()
            .entry(failure.failure_type)
            .or_insert(0) += 1;
        *self
            .failures_by_action
            .write()
            .entry(failure.action.clone())
            .or_insert(0) += 1;
    }

    pub fn record_successful_strategy(&self, failure_type: FailureType, strategy: ReplanStrategy) {
        self.strategies
            .write()
            .entry((failure_type, strategy))
            .or_default()
            .successes += 1;
    }

    pub fn record_failed_strategy(&self, failure_type: FailureType, strategy: ReplanStrategy) {
        self.strategies
            .write()
            .entry((failure_type, strategy))
            .or_default()
            .failures += 1;
    }

    /// Historical success rate for a strategy against a failure type; `None`
    /// before any outcome was recorded.
    pub fn success_rate(
        &self,
        failure_type: FailureType,
        strategy: ReplanStrategy,
    ) -> Option<f64> {
        self.strategies
            .read()
            .get(&(failure_type, strategy))
            .filter(|tally| tally.total() > 0)
            .map(Tally::rate)
    }

    pub fn insights(&self) -> StrategyInsights {
        let mut most_frequent_failures: Vec<(FailureType, u64)> = self
            .failures_by_type
            .read()
            .iter()
            .map(|(t, c)| (*t, *c))
            .collect();
        most_frequent_failures.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.to_string().cmp(&b.0.to_string())));

        let strategies = self.strategies.read();
        let mut best: HashMap<FailureType, (ReplanStrategy, f64, u64)> = HashMap::new();
        for ((failure_type, strategy), tally) in strategies.iter() {
            if tally.total() == 0 {
                continue;
            }
            let rate = tally.rate();
            let replace = match best.get(failure_type) {
                Some((_, best_rate, best_total)) => {
                    rate > *best_rate || (rate == *best_rate && tally.total() > *best_total)
                }
                None => true,
            };
            if replace {
                best.insert(*failure_type, (*strategy, rate, tally.total()));
            }
        }
        let mut most_effective_strategies: Vec<(FailureType, ReplanStrategy, f64)> = best
            .into_iter()
            .map(|(t, (s, rate, _))| (t, s, rate))
            .collect();
        most_effective_strategies
            .sort_by(|a, b| a.0.to_string().cmp(&b.0.to_string()));

        let mut riskiest_actions: Vec<(String, u64)> = self
            .failures_by_action
            .read()
            .iter()
            .map(|(a, c)| (a.clone(), *c))
            .collect();
        riskiest_actions.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        StrategyInsights {
            most_frequent_failures,
            most_effective_strategies,
            riskiest_actions,
        }
    }
}
