//! In-memory store for tests and single-process development.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;

use super::{glob_match, KeyValueStore};
use crate::error::Result;

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|t| Utc::now() >= t).unwrap_or(false)
    }
}

/// Map-backed [`KeyValueStore`] with lazy TTL expiry.
///
/// Operations on a single key are atomic (the map shard lock covers the whole
/// entry update), which mirrors the per-record atomicity of real backing
/// stores without providing any cross-key transaction.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: DashMap<String, StoredEntry>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        // The guard must drop before the expired-entry removal; a remove
        // under a live read guard on the same shard deadlocks.
        let (value, expired) = match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => (Some(entry.value.clone()), false),
            Some(_) => (None, true),
            None => (None, false),
        };
        if expired {
            self.entries.remove(key);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.and_then(|d| {
            chrono::Duration::from_std(d)
                .ok()
                .and_then(|d| Utc::now().checked_add_signed(d))
        });
        self.entries
            .insert(key.to_string(), StoredEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self
            .entries
            .remove(key)
            .map(|(_, e)| !e.is_expired())
            .unwrap_or(false))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix) && !e.is_expired())
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn search(&self, pattern: &str) -> Result<Vec<(String, Value)>> {
        let mut hits: Vec<(String, Value)> = self
            .entries
            .iter()
            .filter(|e| !e.is_expired() && glob_match(pattern, e.key()))
            .map(|e| (e.key().clone(), e.value.clone()))
            .collect();
        hits.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(hits)
    }
}
