//! Mutual exclusion over task ids, backed by tracker assignment.
//!
//! Assignment-list membership on the issue is the lock; a structured comment
//! and a `locks/{resource}` store record carry the metadata. The tracker has
//! no compare-and-swap, so acquisition is an optimistic check-then-act loop:
//! an assign that fails after a free-looking read is a lost race and feeds
//! the retry path, never the error path.

mod backoff;
mod manager;
mod types;

pub use backoff::backoff_delay;
pub use manager::{LockLease, LockManager};
pub use types::{
    ConflictStrategy, LockMetadata, LockMetricsSnapshot, LockRequest, LockStatus, TaskInfo,
};
