//! Issue-tracker client abstraction.
//!
//! Assignment-list membership on an issue is the authoritative lock-held
//! signal; structured comments carry lock metadata and the audit trail. The
//! tracker offers no compare-and-swap, so `assign_issue` failing after a
//! free-looking read is an ordinary lost race, not an error condition.

mod memory;

pub use memory::InMemoryTracker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueState {
    Open,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueComment {
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A tracked task as seen by the coordination layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub title: String,
    pub state: IssueState,
    pub assignees: Vec<String>,
    pub labels: Vec<String>,
    pub comments: Vec<IssueComment>,
}

impl Issue {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            state: IssueState::Open,
            assignees: Vec::new(),
            labels: Vec::new(),
            comments: Vec::new(),
        }
    }

    pub fn is_assigned(&self) -> bool {
        !self.assignees.is_empty()
    }

    /// The coordination layer treats the first assignee as the holder.
    pub fn holder(&self) -> Option<&str> {
        self.assignees.first().map(String::as_str)
    }
}

#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn get_issue(&self, id: &str) -> Result<Issue>;

    /// Assigns `identity` to the issue. Fails with `AlreadyLocked` when a
    /// different identity is already assigned; this is the one atomic
    /// primitive the whole lock design leans on.
    async fn assign_issue(&self, id: &str, identity: &str) -> Result<()>;

    /// Removes `identity` from the assignee list. Removing an identity that
    /// is not assigned is a no-op, which keeps recovery idempotent.
    async fn unassign_issue(&self, id: &str, identity: &str) -> Result<()>;

    async fn add_comment(&self, id: &str, body: &str) -> Result<()>;
}
