//! Pluggable model strategy
//!
//! No model ships with this crate. Hosts may install one implementing
//! [`AttributionModel`]; without it the strategy abstains.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CorrelationStrategy, StrategyInput, StrategyKind};
use crate::error::{AttributionError, Result};
use crate::types::{AgentId, Candidate, Confidence, ConfidenceThresholds, DetectionContext, Signal, SignalId};

/// Default time budget for a single prediction.
const DEFAULT_PREDICT_TIMEOUT: Duration = Duration::from_millis(500);

/// Most recent distinct agents carried in the feature vector.
const MAX_RECENT_AGENTS: usize = 8;

/// Features handed to a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFeatures {
    pub signal_code: String,
    pub content_length: usize,
    pub hour_of_day: u32,
    pub file_path: Option<String>,
    pub prp_context: Option<String>,
    /// Distinct agents seen around the signal, newest first
    pub recent_agents: Vec<AgentId>,
}

impl ModelFeatures {
    pub fn new(
        signal: &Signal,
        context: &DetectionContext,
        agents: impl IntoIterator<Item = AgentId>,
    ) -> Self {
        let mut recent_agents: Vec<AgentId> = Vec::new();
        for agent in agents {
            if recent_agents.len() >= MAX_RECENT_AGENTS {
                break;
            }
            if !recent_agents.contains(&agent) {
                recent_agents.push(agent);
            }
        }

        Self {
            signal_code: signal.code.clone(),
            content_length: signal.raw_content.len(),
            hour_of_day: signal.detected_at.hour(),
            file_path: context.file_path.clone(),
            prp_context: context.prp_context.clone(),
            recent_agents,
        }
    }

    pub fn from_input(input: &StrategyInput) -> Self {
        Self::new(
            &input.signal,
            &input.context,
            input.activities.iter().map(|a| a.agent_id.clone()),
        )
    }
}

/// A model's guess
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrediction {
    pub agent_id: AgentId,
    /// Continuous confidence in [0, 1]
    pub confidence: f64,
}

/// Verified example accumulated for retraining
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub signal_id: SignalId,
    pub context_features: ModelFeatures,
    pub actual_agent_id: AgentId,
    /// Whether the original attribution was confirmed correct
    pub verified: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Interface for an optional trained model
#[async_trait]
pub trait AttributionModel: Send + Sync {
    /// Predict the responsible agent, if the model has an opinion
    async fn predict(&self, features: &ModelFeatures) -> Result<Option<ModelPrediction>>;

    /// Retrain on accumulated verified samples
    async fn train(&self, samples: &[TrainingSample]) -> Result<()>;
}

/// Configuration for the model strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Capability flag, off unless a host opts in
    pub enabled: bool,
    pub predict_timeout_ms: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            predict_timeout_ms: DEFAULT_PREDICT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl ModelConfig {
    pub fn predict_timeout(&self) -> Duration {
        Duration::from_millis(self.predict_timeout_ms)
    }
}

/// Strategy delegating to an injected model
pub struct ModelStrategy {
    model: Option<Arc<dyn AttributionModel>>,
    config: ModelConfig,
    thresholds: ConfidenceThresholds,
}

impl ModelStrategy {
    pub fn new(model: Option<Arc<dyn AttributionModel>>, config: ModelConfig) -> Self {
        Self {
            model,
            config,
            thresholds: ConfidenceThresholds::default(),
        }
    }

    /// Bucket predicted scores with these thresholds
    #[must_use]
    pub fn with_thresholds(mut self, thresholds: ConfidenceThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }
}

#[async_trait]
impl CorrelationStrategy for ModelStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Model
    }

    async fn propose(&self, input: &StrategyInput) -> Result<Option<Candidate>> {
        let Some(model) = &self.model else {
            debug!(signal_id = %input.signal.id, "No attribution model installed, abstaining");
            return Ok(None);
        };

        let features = ModelFeatures::from_input(input);
        let prediction =
            match tokio::time::timeout(self.config.predict_timeout(), model.predict(&features))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(AttributionError::Model(format!(
                        "predict exceeded {}ms",
                        self.config.predict_timeout_ms
                    )));
                }
            };

        Ok(prediction.map(|p| {
            let score = p.confidence.clamp(0.0, 1.0);
            Candidate::new(
                StrategyKind::Model,
                p.agent_id,
                Confidence::from_score(score, &self.thresholds),
                format!("model predicted with confidence {score:.2}"),
            )
            .with_evidence(format!("model_confidence={score:.3}"))
        }))
    }
}
