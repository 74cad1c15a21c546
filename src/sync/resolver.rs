//! Conflict resolution for concurrent writes.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::types::VersionedEntry;

/// Caller-supplied resolver: local entry, remote entry → merged value.
pub type CustomResolver = Arc<dyn Fn(&VersionedEntry, &VersionedEntry) -> Value + Send + Sync>;

/// How a key-class resolves true concurrent conflicts.
#[derive(Clone, Default)]
pub enum MergePolicy {
    /// Keep the write with the later wall-clock timestamp.
    #[default]
    LastWriteWins,
    /// Union of two arrays, preserving local order, deduplicated.
    UnionMerge,
    /// Recursive object merge; remote wins on scalar collisions.
    DeepMerge,
    /// Larger numeric value wins.
    NumericMax,
    Custom(CustomResolver),
}

impl fmt::Debug for MergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::LastWriteWins => "LastWriteWins",
            Self::UnionMerge => "UnionMerge",
            Self::DeepMerge => "DeepMerge",
            Self::NumericMax => "NumericMax",
            Self::Custom(_) => "Custom",
        };
        f.write_str(name)
    }
}

impl MergePolicy {
    /// Produces the merged value for two concurrent entries.
    pub fn resolve(&self, local: &VersionedEntry, remote: &VersionedEntry) -> Value {
        match self {
            Self::LastWriteWins => {
                if remote.timestamp > local.timestamp {
                    remote.value.clone()
                } else {
                    local.value.clone()
                }
            }
            Self::UnionMerge => union_arrays(&local.value, &remote.value),
            Self::DeepMerge => deep_merge(&local.value, &remote.value),
            Self::NumericMax => numeric_max(&local.value, &remote.value),
            Self::Custom(resolver) => resolver(local, remote),
        }
    }
}

fn union_arrays(local: &Value, remote: &Value) -> Value {
    match (local.as_array(), remote.as_array()) {
        (Some(a), Some(b)) => {
            let mut merged = a.clone();
            for item in b {
                if !merged.contains(item) {
                    merged.push(item.clone());
                }
            }
            Value::Array(merged)
        }
        // Not both arrays: fall back to the remote write.
        _ => remote.clone(),
    }
}

fn deep_merge(local: &Value, remote: &Value) -> Value {
    match (local, remote) {
        (Value::Object(a), Value::Object(b)) => {
            let mut merged: Map<String, Value> = a.clone();
            for (key, rv) in b {
                let entry = match merged.get(key) {
                    Some(lv) => deep_merge(lv, rv),
                    None => rv.clone(),
                };
                merged.insert(key.clone(), entry);
            }
            Value::Object(merged)
        }
        _ => remote.clone(),
    }
}

fn numeric_max(local: &Value, remote: &Value) -> Value {
    match (local.as_f64(), remote.as_f64()) {
        (Some(a), Some(b)) => {
            if b > a {
                remote.clone()
            } else {
                local.clone()
            }
        }
        _ => remote.clone(),
    }
}
