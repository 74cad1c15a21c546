use serde::{Deserialize, Serialize};

use super::action::Action;

/// An ordered action sequence with its summed cost.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub actions: Vec<Action>,
    pub total_cost: f64,
}

impl Plan {
    pub fn new(actions: Vec<Action>) -> Self {
        let total_cost = actions.iter().map(|a| a.cost).sum();
        Self {
            actions,
            total_cost,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn action_names(&self) -> Vec<&str> {
        self.actions.iter().map(|a| a.name.as_str()).collect()
    }
}
