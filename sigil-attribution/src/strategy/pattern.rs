//! Learned pattern matching
//!
//! Looks up which agent has most often emitted the signal's code according to
//! the registry's decayed frequency model.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{CorrelationStrategy, StrategyInput, StrategyKind};
use crate::error::Result;
use crate::registry::SignalRegistry;
use crate::types::{Candidate, Confidence, ConfidenceThresholds};

/// Frequency at which pattern confidence saturates.
const SATURATION_FREQUENCY: f64 = 10.0;

/// Configuration for pattern matching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternMatchConfig {
    pub enabled: bool,
    /// Proposals below this confidence are discarded (default: 0.6)
    pub min_confidence_threshold: f64,
}

impl Default for PatternMatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_confidence_threshold: 0.6,
        }
    }
}

/// Convert a learned frequency into a [0, 1] confidence
pub fn frequency_confidence(frequency: f64) -> f64 {
    (frequency / SATURATION_FREQUENCY).clamp(0.0, 1.0)
}

/// Strategy backed by the registry's learned frequencies
pub struct PatternMatchStrategy {
    registry: Arc<SignalRegistry>,
    config: PatternMatchConfig,
    thresholds: ConfidenceThresholds,
}

impl PatternMatchStrategy {
    pub fn new(registry: Arc<SignalRegistry>, config: PatternMatchConfig) -> Self {
        Self {
            registry,
            config,
            thresholds: ConfidenceThresholds::default(),
        }
    }

    #[must_use]
    pub fn with_thresholds(mut self, thresholds: ConfidenceThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }
}

#[async_trait]
impl CorrelationStrategy for PatternMatchStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PatternMatch
    }

    async fn propose(&self, input: &StrategyInput) -> Result<Option<Candidate>> {
        let Some((agent_id, frequency)) = self.registry.top_agent_for_code(&input.signal.code).await
        else {
            return Ok(None);
        };

        let score = frequency_confidence(frequency);
        if score < self.config.min_confidence_threshold {
            return Ok(None);
        }

        Ok(Some(
            Candidate::new(
                StrategyKind::PatternMatch,
                agent_id,
                Confidence::from_score(score, &self.thresholds),
                format!(
                    "learned frequency {frequency:.2} for code '{}'",
                    input.signal.code
                ),
            )
            .with_evidence(format!("frequency={frequency:.3}"))
            .with_evidence(format!("pattern_confidence={score:.3}")),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{PatternObservation, RegistryConfig};
    use crate::types::{AgentId, DetectionContext, Signal};
    use chrono::Utc;

    fn input(code: &str) -> StrategyInput {
        StrategyInput::new(
            Signal::new("s-1", code, Utc::now(), format!("[{code}]")),
            DetectionContext::default(),
            vec![],
        )
    }

    /// Registry with a learning rate of 1.0 so observations land verbatim
    fn registry() -> Arc<SignalRegistry> {
        Arc::new(SignalRegistry::new(RegistryConfig {
            learning_rate: 1.0,
            ..Default::default()
        }))
    }

    #[test]
    fn test_frequency_confidence_saturates() {
        assert!((frequency_confidence(6.0) - 0.6).abs() < f64::EPSILON);
        assert_eq!(frequency_confidence(25.0), 1.0);
        assert_eq!(frequency_confidence(-1.0), 0.0);
    }

    #[tokio::test]
    async fn test_highest_frequency_agent_is_proposed() {
        let registry = registry();
        registry
            .learn_signal_patterns(&AgentId::from("agentA"), &[PatternObservation::new("gg", 7.0)])
            .await;
        registry
            .learn_signal_patterns(&AgentId::from("agentB"), &[PatternObservation::new("gg", 9.0)])
            .await;

        let strategy = PatternMatchStrategy::new(registry, PatternMatchConfig::default());
        let candidate = strategy.propose(&input("gg")).await.unwrap().unwrap();

        assert_eq!(candidate.agent_id, AgentId::from("agentB"));
        assert_eq!(candidate.confidence, Confidence::High);
    }

    #[tokio::test]
    async fn test_low_confidence_is_discarded() {
        let registry = registry();
        registry
            .learn_signal_patterns(&AgentId::from("agentA"), &[PatternObservation::new("gg", 4.0)])
            .await;

        let strategy = PatternMatchStrategy::new(registry, PatternMatchConfig::default());

        assert!(strategy.propose(&input("gg")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_code_abstains() {
        let strategy = PatternMatchStrategy::new(registry(), PatternMatchConfig::default());
        assert!(strategy.propose(&input("zz")).await.unwrap().is_none());
    }
}
