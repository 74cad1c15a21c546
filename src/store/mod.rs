//! Backing key/value store abstraction.
//!
//! All cross-worker state passes through an external store reachable by every
//! worker. The store offers no compare-and-swap; callers that need mutual
//! exclusion layer optimistic check-then-act loops on top (see `lock`).

mod keys;
mod memory;

pub use keys::{
    checkpoint_key, heartbeat_key, lock_key, registration_key, resource_from_lock_key,
    task_state_key, HEARTBEAT_PREFIX, LOCK_PREFIX, REGISTRATION_PREFIX, TASK_PREFIX,
};
pub use memory::InMemoryStore;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// External key/value store client.
///
/// Keys are namespaced paths (`workers/{id}/heartbeat`, `locks/{resource}`).
/// TTLs bound unbounded growth of heartbeat and lock-metadata records.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    /// Returns true if the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// All live keys starting with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Key/value pairs whose key matches a glob-style pattern (`*` wildcard).
    async fn search(&self, pattern: &str) -> Result<Vec<(String, Value)>>;
}

/// Glob match with `*` as the only wildcard.
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(idx) => rest = &rest[idx + part.len()..],
                None => return false,
            }
        }
    }
    // Pattern ended with '*'
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_exact() {
        assert!(glob_match("locks/task-1", "locks/task-1"));
        assert!(!glob_match("locks/task-1", "locks/task-2"));
    }

    #[test]
    fn test_glob_prefix() {
        assert!(glob_match("locks/*", "locks/task-1"));
        assert!(!glob_match("locks/*", "workers/w1/heartbeat"));
    }

    #[test]
    fn test_glob_infix() {
        assert!(glob_match("workers/*/heartbeat", "workers/w1/heartbeat"));
        assert!(!glob_match("workers/*/heartbeat", "workers/w1/registration"));
    }

    #[test]
    fn test_glob_suffix() {
        assert!(glob_match("*/heartbeat", "workers/w1/heartbeat"));
    }
}
