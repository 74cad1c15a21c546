//! Failure handling and plan revision.
//!
//! When an action fails, the pipeline runs: classify the raw error into a
//! [`FailureType`], analyze the root cause against current state and worker
//! history, try direct lower-cost repairs, and only then build ranked
//! alternative plans. Strategy outcomes feed back into confidence scoring.

mod alternatives;
mod analyzer;
mod detector;
mod learning;
mod recovery;
mod types;

pub use alternatives::AlternativePlanner;
pub use analyzer::RootCauseAnalyzer;
pub use detector::FailureDetector;
pub use learning::{StrategyInsights, StrategyLedger};
pub use recovery::RecoveryExecutor;
pub use types::{
    AlternativePlan, Dependency, Failure, FailureContext, FailureType, RecoveryResult,
    ReplanStrategy, RootCause, RootCauseCategory, Severity,
};
