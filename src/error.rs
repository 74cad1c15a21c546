use thiserror::Error;

#[derive(Error, Debug)]
pub enum SwarmError {
    #[error("Resource {resource_id} already locked by {holder}")]
    AlreadyLocked { resource_id: String, holder: String },

    #[error("Lock on {resource_id} expired")]
    LockExpired { resource_id: String },

    #[error("Lock on {resource_id} held by {holder}, not {requester}")]
    InvalidOwner {
        resource_id: String,
        holder: String,
        requester: String,
    },

    #[error("Resource {0} is not locked")]
    NotLocked(String),

    #[error("Failed to acquire lock on {resource_id} after {retries} retries")]
    LockAcquisitionFailed { resource_id: String, retries: u32 },

    #[error("Worker {worker_id}: {message}")]
    Worker { worker_id: String, message: String },

    #[error("Worker not registered: {0}")]
    WorkerNotFound(String),

    #[error("Sync error in {namespace}: {message}")]
    Sync { namespace: String, message: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Tracker error: {0}")]
    Tracker(String),

    #[error("Issue not found: {0}")]
    IssueNotFound(String),

    #[error("Planning failed: {0}")]
    Planning(String),

    #[error("Plan validation failed: {0}")]
    PlanValidation(String),

    #[error("Recovery error: {0}")]
    Recovery(String),

    #[error("Human escalation required: {summary}")]
    EscalationRequired { summary: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Shutdown in progress")]
    ShuttingDown,

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl SwarmError {
    /// Transient errors are retried locally with backoff and never surfaced
    /// unless retries exhaust. Ownership violations and validation failures
    /// are terminal.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Store(_) | Self::Tracker(_) | Self::Timeout(_) | Self::Io(_)
        )
    }

    /// Conflicts are the expected outcome of losing a race for a lock. They
    /// feed the retry loop rather than the error path.
    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, Self::AlreadyLocked { .. })
    }
}

pub type Result<T> = std::result::Result<T, SwarmError>;
