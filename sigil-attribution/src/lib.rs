//! sigil-attribution - Signal attribution for multi-agent work
//!
//! Links free-text status signals such as `[gg]` or `[bb]` to the agent most
//! likely responsible for them. Several independent strategies propose
//! candidates, an ensemble fuses them, and a registry learns from every
//! attribution and every piece of verified feedback.

pub mod bridge;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod ensemble;
pub mod error;
pub mod feedback;
pub mod maintenance;
pub mod metrics;
pub mod registry;
pub mod strategy;
pub mod types;

pub use config::AttributionConfig;
pub use engine::AttributionEngine;
pub use error::{AttributionError, Result};
pub use types::*;

// Component re-exports
pub use bridge::{AgentBridge, AgentSession, BridgeCleanup, BridgeConfig, CorrelationResult};
pub use collaborators::{
    ActivityStore, AgentDirectory, MemoryActivityStore, StaticAgentDirectory, UNKNOWN_AGENT_TYPE,
};
pub use ensemble::{EnsembleAggregator, EnsembleConfig, StrategyWeights, VotingMethod};
pub use feedback::{FeedbackConfig, FeedbackLoop, FeedbackOutcome, Verdict};
pub use maintenance::{MaintenanceSummary, maintenance_loop, spawn_maintenance};
pub use metrics::{AttributionMetrics, StrategyStats};
pub use registry::{
    AgentSignalRelationship, LifecycleStage, PatternObservation, PatternSummary, RegistryCleanup,
    RegistryConfig, RegistrySnapshot, SignalLifecycle, SignalRegistry, Verification,
    VerifiedAttribution,
};
pub use strategy::{
    AgentSignature, AttributionModel, CorrelationStrategy, ModelFeatures, ModelPrediction,
    StrategiesConfig, StrategyKind, TrainingSample,
};
