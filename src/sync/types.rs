use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::clock::VectorClock;

/// A value paired with the causal version that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionedEntry {
    pub value: Value,
    pub version: VectorClock,
    /// Wall-clock time of the write. Used only for last-write-wins
    /// tie-breaking within true conflicts, never for ordering.
    pub timestamp: DateTime<Utc>,
    pub writer_id: String,
}

impl VersionedEntry {
    pub fn new(value: Value, version: VectorClock, writer_id: impl Into<String>) -> Self {
        Self {
            value,
            version,
            timestamp: Utc::now(),
            writer_id: writer_id.into(),
        }
    }
}
