//! Correlation strategies
//!
//! Each strategy independently proposes at most one candidate agent for a
//! signal. Strategies only read shared state, so the engine runs them
//! concurrently and fuses the proposals in the ensemble.

mod contextual;
mod model;
mod pattern;
mod signature;
mod temporal;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bridge::AgentSession;
use crate::error::Result;
use crate::registry::SignalRegistry;
use crate::types::{AgentActivity, Candidate, ConfidenceThresholds, DetectionContext, Signal};

pub use contextual::{ContextualConfig, ContextualStrategy};
pub use model::{
    AttributionModel, ModelConfig, ModelFeatures, ModelPrediction, ModelStrategy, TrainingSample,
};
pub use pattern::{PatternMatchConfig, PatternMatchStrategy, frequency_confidence};
pub use signature::{AgentSignature, SignatureConfig, SignatureStrategy};
pub use temporal::{TemporalConfig, TemporalStrategy};

/// Default time budget for a single strategy evaluation.
const DEFAULT_STRATEGY_TIMEOUT: Duration = Duration::from_millis(1000);

/// The closed set of correlation strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Temporal,
    Contextual,
    PatternMatch,
    Signature,
    Model,
}

impl StrategyKind {
    /// All variants in evaluation order
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::Temporal,
        StrategyKind::Contextual,
        StrategyKind::PatternMatch,
        StrategyKind::Signature,
        StrategyKind::Model,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temporal => "temporal",
            Self::Contextual => "contextual",
            Self::PatternMatch => "pattern_match",
            Self::Signature => "signature",
            Self::Model => "model",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a strategy may look at for one signal
#[derive(Debug, Clone)]
pub struct StrategyInput {
    pub signal: Signal,
    pub context: DetectionContext,
    /// Recent activities, newest first
    pub activities: Vec<AgentActivity>,
    /// Active agent sessions, ordered by agent id
    pub sessions: Vec<AgentSession>,
}

impl StrategyInput {
    pub fn new(signal: Signal, context: DetectionContext, activities: Vec<AgentActivity>) -> Self {
        Self {
            signal,
            context,
            activities,
            sessions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_sessions(mut self, sessions: Vec<AgentSession>) -> Self {
        self.sessions = sessions;
        self
    }
}

/// Uniform contract implemented by every strategy
#[async_trait]
pub trait CorrelationStrategy: Send + Sync {
    /// Which variant this strategy implements
    fn kind(&self) -> StrategyKind;

    /// Propose zero or one candidate
    ///
    /// Errors are allowed here; [`run_strategy`] turns them into abstentions.
    async fn propose(&self, input: &StrategyInput) -> Result<Option<Candidate>>;
}

/// What came back from one strategy evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyOutcome {
    Proposed(Candidate),
    Abstained,
    Failed(String),
    TimedOut,
}

impl StrategyOutcome {
    pub fn into_candidate(self) -> Option<Candidate> {
        match self {
            Self::Proposed(candidate) => Some(candidate),
            _ => None,
        }
    }
}

/// Outcome plus how long the strategy took
#[derive(Debug, Clone)]
pub struct StrategyRun {
    pub kind: StrategyKind,
    pub outcome: StrategyOutcome,
    pub elapsed: Duration,
}

/// Evaluate a strategy without letting it fail the attribution
pub async fn run_strategy(
    strategy: &dyn CorrelationStrategy,
    input: &StrategyInput,
    timeout: Duration,
) -> StrategyRun {
    let kind = strategy.kind();
    let started = Instant::now();

    let outcome = match tokio::time::timeout(timeout, strategy.propose(input)).await {
        Ok(Ok(Some(candidate))) => StrategyOutcome::Proposed(candidate),
        Ok(Ok(None)) => StrategyOutcome::Abstained,
        Ok(Err(e)) => {
            warn!(
                strategy = %kind,
                signal_id = %input.signal.id,
                error = %e,
                "Strategy failed, excluding from ensemble"
            );
            StrategyOutcome::Failed(e.to_string())
        }
        Err(_) => {
            warn!(
                strategy = %kind,
                signal_id = %input.signal.id,
                timeout_ms = timeout.as_millis() as u64,
                "Strategy timed out, excluding from ensemble"
            );
            StrategyOutcome::TimedOut
        }
    };

    StrategyRun {
        kind,
        outcome,
        elapsed: started.elapsed(),
    }
}

/// Configuration for the strategy set
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategiesConfig {
    pub temporal: TemporalConfig,
    pub contextual: ContextualConfig,
    pub pattern_match: PatternMatchConfig,
    pub signature: SignatureConfig,
    pub model: ModelConfig,
    /// Per-strategy time budget in milliseconds
    pub timeout_ms: u64,
}

impl Default for StrategiesConfig {
    fn default() -> Self {
        Self {
            temporal: TemporalConfig::default(),
            contextual: ContextualConfig::default(),
            pattern_match: PatternMatchConfig::default(),
            signature: SignatureConfig::default(),
            model: ModelConfig::default(),
            timeout_ms: DEFAULT_STRATEGY_TIMEOUT.as_millis() as u64,
        }
    }
}

impl StrategiesConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Instantiate every enabled strategy in evaluation order
    ///
    /// The model strategy is only built when it is enabled; whether a model
    /// is actually installed is decided at proposal time. Strategies that
    /// score numerically bucket with `thresholds`.
    pub fn build(
        &self,
        registry: Arc<SignalRegistry>,
        model: Option<Arc<dyn AttributionModel>>,
        thresholds: &ConfidenceThresholds,
    ) -> Result<Vec<Arc<dyn CorrelationStrategy>>> {
        let mut strategies: Vec<Arc<dyn CorrelationStrategy>> = Vec::new();

        for kind in StrategyKind::ALL {
            match kind {
                StrategyKind::Temporal if self.temporal.enabled => {
                    strategies.push(Arc::new(TemporalStrategy::with_config(
                        self.temporal.clone(),
                    )));
                }
                StrategyKind::Contextual if self.contextual.enabled => {
                    strategies.push(Arc::new(ContextualStrategy::new()));
                }
                StrategyKind::PatternMatch if self.pattern_match.enabled => {
                    strategies.push(Arc::new(
                        PatternMatchStrategy::new(registry.clone(), self.pattern_match.clone())
                            .with_thresholds(thresholds.clone()),
                    ));
                }
                StrategyKind::Signature if self.signature.enabled => {
                    strategies.push(Arc::new(SignatureStrategy::from_config(&self.signature)?));
                }
                StrategyKind::Model if self.model.enabled => {
                    strategies.push(Arc::new(
                        ModelStrategy::new(model.clone(), self.model.clone())
                            .with_thresholds(thresholds.clone()),
                    ));
                }
                _ => {}
            }
        }

        Ok(strategies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AttributionError;
    use crate::registry::RegistryConfig;
    use crate::types::Confidence;
    use chrono::Utc;

    struct FailingStrategy;

    #[async_trait]
    impl CorrelationStrategy for FailingStrategy {
        fn kind(&self) -> StrategyKind {
            StrategyKind::Signature
        }

        async fn propose(&self, _input: &StrategyInput) -> Result<Option<Candidate>> {
            Err(AttributionError::strategy(StrategyKind::Signature, "boom"))
        }
    }

    struct SlowStrategy;

    #[async_trait]
    impl CorrelationStrategy for SlowStrategy {
        fn kind(&self) -> StrategyKind {
            StrategyKind::Model
        }

        async fn propose(&self, _input: &StrategyInput) -> Result<Option<Candidate>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Some(Candidate::new(
                StrategyKind::Model,
                "late",
                Confidence::High,
                "too slow",
            )))
        }
    }

    fn input() -> StrategyInput {
        StrategyInput::new(
            Signal::new("s-1", "gg", Utc::now(), "[gg]"),
            DetectionContext::default(),
            vec![],
        )
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(StrategyKind::PatternMatch.to_string(), "pattern_match");
        let json = serde_json::to_string(&StrategyKind::PatternMatch).unwrap();
        assert_eq!(json, "\"pattern_match\"");
    }

    #[tokio::test]
    async fn test_failure_becomes_abstention() {
        let run = run_strategy(&FailingStrategy, &input(), Duration::from_secs(1)).await;
        assert_eq!(run.kind, StrategyKind::Signature);
        assert!(matches!(run.outcome, StrategyOutcome::Failed(_)));
        assert!(run.outcome.into_candidate().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_abstention() {
        let run = run_strategy(&SlowStrategy, &input(), Duration::from_millis(50)).await;
        assert_eq!(run.outcome, StrategyOutcome::TimedOut);
    }

    #[test]
    fn test_build_respects_enabled_flags() {
        let registry = Arc::new(SignalRegistry::new(RegistryConfig::default()));
        let config = StrategiesConfig::default();
        let kinds: Vec<_> = config
            .build(registry.clone(), None, &ConfidenceThresholds::default())
            .unwrap()
            .iter()
            .map(|s| s.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                StrategyKind::Temporal,
                StrategyKind::Contextual,
                StrategyKind::PatternMatch,
                StrategyKind::Signature,
            ]
        );

        let mut config = StrategiesConfig::default();
        config.temporal.enabled = false;
        config.model.enabled = true;
        let kinds: Vec<_> = config
            .build(registry, None, &ConfidenceThresholds::default())
            .unwrap()
            .iter()
            .map(|s| s.kind())
            .collect();
        assert!(!kinds.contains(&StrategyKind::Temporal));
        assert_eq!(kinds.last(), Some(&StrategyKind::Model));
    }
}
