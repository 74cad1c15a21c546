//! In-memory tracker for tests and single-process development.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::{Issue, IssueComment, IssueTracker};
use crate::error::{Result, SwarmError};

/// Map-backed [`IssueTracker`].
///
/// Each issue lives under one map entry, so assignment checks and mutations
/// happen under a single shard lock. Concurrent `assign_issue` calls for the
/// same issue therefore serialize exactly like a real tracker's backend:
/// one caller wins, the rest observe `AlreadyLocked`.
#[derive(Debug, Default)]
pub struct InMemoryTracker {
    issues: DashMap<String, Issue>,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_issue(&self, issue: Issue) {
        self.issues.insert(issue.id.clone(), issue);
    }

    pub fn issue_count(&self) -> usize {
        self.issues.len()
    }
}

#[async_trait]
impl IssueTracker for InMemoryTracker {
    async fn get_issue(&self, id: &str) -> Result<Issue> {
        self.issues
            .get(id)
            .map(|i| i.clone())
            .ok_or_else(|| SwarmError::IssueNotFound(id.to_string()))
    }

    async fn assign_issue(&self, id: &str, identity: &str) -> Result<()> {
        let mut issue = self
            .issues
            .get_mut(id)
            .ok_or_else(|| SwarmError::IssueNotFound(id.to_string()))?;

        if let Some(holder) = issue.holder() {
            if holder != identity {
                return Err(SwarmError::AlreadyLocked {
                    resource_id: id.to_string(),
                    holder: holder.to_string(),
                });
            }
            return Ok(());
        }

        issue.assignees.push(identity.to_string());
        Ok(())
    }

    async fn unassign_issue(&self, id: &str, identity: &str) -> Result<()> {
        let mut issue = self
            .issues
            .get_mut(id)
            .ok_or_else(|| SwarmError::IssueNotFound(id.to_string()))?;
        issue.assignees.retain(|a| a != identity);
        Ok(())
    }

    async fn add_comment(&self, id: &str, body: &str) -> Result<()> {
        let mut issue = self
            .issues
            .get_mut(id)
            .ok_or_else(|| SwarmError::IssueNotFound(id.to_string()))?;
        let author = issue
            .holder()
            .unwrap_or("taskswarm")
            .to_string();
        issue.comments.push(IssueComment {
            author,
            body: body.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_assign_is_exclusive() {
        let tracker = InMemoryTracker::new();
        tracker.create_issue(Issue::new("task-1", "build the thing"));

        tracker.assign_issue("task-1", "w1").await.unwrap();
        let err = tracker.assign_issue("task-1", "w2").await.unwrap_err();
        assert!(matches!(err, SwarmError::AlreadyLocked { .. }));

        // Re-assigning the same identity is idempotent.
        tracker.assign_issue("task-1", "w1").await.unwrap();
        let issue = tracker.get_issue("task-1").await.unwrap();
        assert_eq!(issue.assignees, vec!["w1".to_string()]);
    }

    #[tokio::test]
    async fn test_unassign_is_idempotent() {
        let tracker = InMemoryTracker::new();
        tracker.create_issue(Issue::new("task-1", "build the thing"));

        tracker.assign_issue("task-1", "w1").await.unwrap();
        tracker.unassign_issue("task-1", "w1").await.unwrap();
        tracker.unassign_issue("task-1", "w1").await.unwrap();
        assert!(!tracker.get_issue("task-1").await.unwrap().is_assigned());
    }

    #[tokio::test]
    async fn test_missing_issue() {
        let tracker = InMemoryTracker::new();
        let err = tracker.get_issue("nope").await.unwrap_err();
        assert!(matches!(err, SwarmError::IssueNotFound(_)));
    }
}
