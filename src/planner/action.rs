use serde::{Deserialize, Serialize};

use super::state::{StateValue, WorldState};

/// A stateless operator: applicable when its preconditions hold, producing a
/// successor state by overwriting with its effects. Cost must be
/// non-negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    pub preconditions: WorldState,
    pub effects: WorldState,
    pub cost: f64,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            preconditions: WorldState::new(),
            effects: WorldState::new(),
            cost: 1.0,
        }
    }

    pub fn with_precondition(
        mut self,
        key: impl Into<String>,
        value: impl Into<StateValue>,
    ) -> Self {
        self.preconditions.set(key, value);
        self
    }

    pub fn with_effect(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.effects.set(key, value);
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn is_applicable(&self, state: &WorldState) -> bool {
        state.satisfies(&self.preconditions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applicability() {
        let action = Action::new("open_door")
            .with_precondition("has_key", true)
            .with_effect("door_open", true);

        assert!(action.is_applicable(&WorldState::new().with("has_key", true)));
        assert!(!action.is_applicable(&WorldState::new().with("has_key", false)));
        assert!(!action.is_applicable(&WorldState::new()));
    }
}
