use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A condition value: boolean flag, numeric level, or symbolic name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

// Number carries plan-authored constants, never NaN; bit equality is exact
// for every value a caller can construct from the From impls.
impl Eq for StateValue {}

impl Hash for StateValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Bool(b) => {
                0u8.hash(state);
                b.hash(state);
            }
            Self::Number(n) => {
                1u8.hash(state);
                n.to_bits().hash(state);
            }
            Self::Text(s) => {
                2u8.hash(state);
                s.hash(state);
            }
        }
    }
}

impl From<bool> for StateValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for StateValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<i64> for StateValue {
    fn from(v: i64) -> Self {
        Self::Number(v as f64)
    }
}

impl From<&str> for StateValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for StateValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Mapping from condition name to value. The same shape serves as current
/// state, precondition set, effect set, and goal; a goal is a partial state
/// where only the listed keys are checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorldState {
    entries: BTreeMap<String, StateValue>,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<StateValue>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<StateValue> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &StateValue)> {
        self.entries.iter()
    }

    /// Subset match: every key/value pair in `conditions` holds here.
    /// Unrelated keys are ignored.
    pub fn satisfies(&self, conditions: &WorldState) -> bool {
        conditions
            .entries
            .iter()
            .all(|(key, expected)| self.entries.get(key) == Some(expected))
    }

    /// Goal pairs not yet matched; the planner's admissible heuristic, since
    /// each unmet condition needs at least one more action.
    pub fn unmet_count(&self, goal: &WorldState) -> usize {
        goal.entries
            .iter()
            .filter(|(key, expected)| self.entries.get(*key) != Some(*expected))
            .count()
    }

    /// Successor state: this state with `effects` overwriting matched keys.
    pub fn apply(&self, effects: &WorldState) -> WorldState {
        let mut next = self.clone();
        for (key, value) in &effects.entries {
            next.entries.insert(key.clone(), value.clone());
        }
        next
    }
}

/// A goal with optional flexible keys the replanner may drop when
/// simplifying after repeated failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub state: WorldState,
    pub flexible: BTreeSet<String>,
}

impl Goal {
    pub fn new(state: WorldState) -> Self {
        Self {
            state,
            flexible: BTreeSet::new(),
        }
    }

    pub fn with_flexible(mut self, key: impl Into<String>) -> Self {
        self.flexible.insert(key.into());
        self
    }

    /// The goal with flexible constraints dropped, or `None` when nothing is
    /// flexible (no simplification exists).
    pub fn simplified(&self) -> Option<WorldState> {
        if self.flexible.is_empty() {
            return None;
        }
        let mut reduced = self.state.clone();
        for key in &self.flexible {
            reduced.remove(key);
        }
        if reduced.len() == self.state.len() {
            None
        } else {
            Some(reduced)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_satisfies_is_partial_match() {
        let state = WorldState::new()
            .with("has_key", true)
            .with("door_open", false)
            .with("fuel", 10.0);

        assert!(state.satisfies(&WorldState::new().with("has_key", true)));
        assert!(state.satisfies(&WorldState::new()));
        assert!(!state.satisfies(&WorldState::new().with("door_open", true)));
        assert!(!state.satisfies(&WorldState::new().with("missing", true)));
    }

    #[test]
    fn test_unmet_count() {
        let state = WorldState::new().with("a", true).with("b", false);
        let goal = WorldState::new()
            .with("a", true)
            .with("b", true)
            .with("c", "done");
        assert_eq!(state.unmet_count(&goal), 2);
    }

    #[test]
    fn test_apply_overwrites_matched_keys() {
        let state = WorldState::new().with("a", 1.0).with("b", 2.0);
        let next = state.apply(&WorldState::new().with("b", 5.0).with("c", "new"));

        assert_eq!(next.get("a"), Some(&StateValue::Number(1.0)));
        assert_eq!(next.get("b"), Some(&StateValue::Number(5.0)));
        assert_eq!(next.get("c"), Some(&StateValue::Text("new".into())));
        // Original untouched.
        assert_eq!(state.get("b"), Some(&StateValue::Number(2.0)));
    }

    #[test]
    fn test_goal_simplification() {
        let goal = Goal::new(
            WorldState::new()
                .with("built", true)
                .with("polished", true),
        )
        .with_flexible("polished");

        let reduced = goal.simplified().unwrap();
        assert_eq!(reduced.len(), 1);
        assert!(reduced.get("polished").is_none());

        let rigid = Goal::new(WorldState::new().with("built", true));
        assert!(rigid.simplified().is_none());
    }
}
