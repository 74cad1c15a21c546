//! Key namespace layout for the backing store.

pub const LOCK_PREFIX: &str = "locks/";
pub const HEARTBEAT_PREFIX: &str = "workers/";
pub const REGISTRATION_PREFIX: &str = "workers/";
pub const TASK_PREFIX: &str = "tasks/";

pub fn lock_key(resource_id: &str) -> String {
    format!("{}{}", LOCK_PREFIX, resource_id)
}

pub fn heartbeat_key(worker_id: &str) -> String {
    format!("workers/{}/heartbeat", worker_id)
}

pub fn registration_key(worker_id: &str) -> String {
    format!("workers/{}/registration", worker_id)
}

pub fn task_state_key(task_id: &str) -> String {
    format!("tasks/{}/state", task_id)
}

pub fn checkpoint_key(task_id: &str, seq: u64) -> String {
    format!("tasks/{}/checkpoints/{}", task_id, seq)
}

/// Extracts the resource id from a `locks/{resource}` key.
pub fn resource_from_lock_key(key: &str) -> Option<&str> {
    key.strip_prefix(LOCK_PREFIX).filter(|r| !r.is_empty())
}

/// Extracts the worker id from a `workers/{id}/heartbeat` key.
pub fn worker_from_heartbeat_key(key: &str) -> Option<&str> {
    key.strip_prefix("workers/")?
        .strip_suffix("/heartbeat")
        .filter(|w| !w.is_empty())
}
