mod settings;

pub use settings::{
    HeartbeatConfig, LockConfig, OrchestratorConfig, PlannerConfig, RecoveryConfig,
    RegistryConfig, SwarmConfig, SyncConfig,
};
