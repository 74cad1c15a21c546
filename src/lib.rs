//! Distributed task coordination and adaptive planning for worker swarms.
//!
//! Many independent worker processes compete for tasks recorded in an
//! external issue tracker. The crate provides mutual exclusion over task ids
//! (backed by tracker assignment), heartbeat-based failure detection with
//! stale-lock recovery, a capacity-aware worker registry, causally
//! consistent shared memory over a backing key/value store, goal-oriented
//! action planning, and adaptive replanning when actions fail.

pub mod config;
pub mod error;
pub mod heartbeat;
pub mod lock;
pub mod orchestrator;
pub mod planner;
pub mod registry;
pub mod replan;
pub mod store;
pub mod sync;
pub mod tracker;

pub use config::SwarmConfig;
pub use error::{Result, SwarmError};
pub use heartbeat::{HeartbeatEmitter, HeartbeatRecord, StaleLockMonitor, WorkerHealth};
pub use lock::{ConflictStrategy, LockManager, LockRequest};
pub use orchestrator::{ActionExecutor, TaskOrchestrator, TaskOutcome, TaskReport, TaskSpec};
pub use planner::{generate_plan, validate_plan, Action, Goal, Plan, WorldState};
pub use registry::{DiscoveryFilter, LoadBalancer, SelectionStrategy, WorkerRecord, WorkerRegistry};
pub use replan::{
    AlternativePlanner, FailureDetector, RecoveryExecutor, RootCauseAnalyzer, StrategyLedger,
};
pub use store::{InMemoryStore, KeyValueStore};
pub use sync::{CausalMemory, MergePolicy, VectorClock};
pub use tracker::{InMemoryTracker, Issue, IssueTracker};
