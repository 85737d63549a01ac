//! Feedback and online learning
//!
//! Verified attributions update the registry right away. Each one is also
//! buffered as a training sample; once the buffer reaches the retraining
//! threshold an installed model is retrained and the buffer cleared.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{AttributionError, Result};
use crate::registry::{SignalRegistry, Verification};
use crate::strategy::{AttributionModel, ModelFeatures, TrainingSample};
use crate::types::{AgentId, AttributionResult, SignalId};

/// External judgement of an attribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Correct,
    Incorrect,
}

impl Verdict {
    pub fn is_correct(&self) -> bool {
        matches!(self, Self::Correct)
    }
}

impl From<bool> for Verdict {
    fn from(is_correct: bool) -> Self {
        if is_correct { Self::Correct } else { Self::Incorrect }
    }
}

/// Configuration for the feedback loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Samples needed before the model is retrained (default: 50)
    pub model_retraining_threshold: usize,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            model_retraining_threshold: 50,
        }
    }
}

impl FeedbackConfig {
    pub fn validate(&self) -> Result<()> {
        if self.model_retraining_threshold == 0 {
            return Err(AttributionError::InvalidConfig(
                "feedback.model_retraining_threshold must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// What a single piece of feedback did
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackOutcome {
    /// False when the signal was unknown, expired or already resolved
    pub applied: bool,
    /// The version this feedback produced, or the existing resolution when
    /// the signal was already resolved
    pub revised: Option<AttributionResult>,
    pub pending_samples: usize,
    pub retrained: bool,
}

/// Applies verified attributions and drives model retraining
pub struct FeedbackLoop {
    config: FeedbackConfig,
    registry: Arc<SignalRegistry>,
    model: Option<Arc<dyn AttributionModel>>,
    samples: Mutex<Vec<TrainingSample>>,
}

impl FeedbackLoop {
    pub fn new(config: FeedbackConfig, registry: Arc<SignalRegistry>) -> Self {
        Self {
            config,
            registry,
            model: None,
            samples: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: Arc<dyn AttributionModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub async fn pending_samples(&self) -> usize {
        self.samples.lock().await.len()
    }

    async fn not_applied(&self, revised: Option<AttributionResult>) -> FeedbackOutcome {
        FeedbackOutcome {
            applied: false,
            revised,
            pending_samples: self.pending_samples().await,
            retrained: false,
        }
    }

    /// Apply one verification
    ///
    /// Repeating feedback for a resolved signal is a no-op that reports the
    /// existing resolution.
    pub async fn provide_feedback(
        &self,
        signal_id: &SignalId,
        correct_agent_id: &AgentId,
        verdict: Verdict,
    ) -> Result<FeedbackOutcome> {
        if signal_id.is_empty() {
            return Err(AttributionError::InvalidFeedback("signal id is empty".into()));
        }
        if correct_agent_id.is_empty() {
            return Err(AttributionError::InvalidFeedback(format!(
                "correct agent id is empty for signal {signal_id}"
            )));
        }

        let verified = match self
            .registry
            .verify_attribution(signal_id, correct_agent_id, verdict.is_correct())
            .await?
        {
            Verification::Applied(verified) => verified,
            Verification::AlreadyResolved(latest) => {
                return Ok(self.not_applied(Some(latest)).await);
            }
            Verification::NotApplied => return Ok(self.not_applied(None).await),
        };

        let voters = verified.previous.votes.iter().map(|v| v.agent_id.clone());
        let sample = TrainingSample {
            signal_id: signal_id.clone(),
            context_features: ModelFeatures::new(&verified.signal, &verified.context, voters),
            actual_agent_id: correct_agent_id.clone(),
            verified: verdict.is_correct(),
            recorded_at: Utc::now(),
        };

        let threshold = self.config.model_retraining_threshold;
        let mut samples = self.samples.lock().await;
        samples.push(sample);

        let mut retrained = false;
        if samples.len() >= threshold
            && let Some(model) = &self.model
        {
            match model.train(&samples).await {
                Ok(()) => {
                    info!(samples = samples.len(), "Attribution model retrained");
                    samples.clear();
                    retrained = true;
                }
                Err(e) => warn!(error = %e, "Model retraining failed, keeping samples"),
            }
        }

        // Without a working model only the newest samples are kept
        if samples.len() > threshold {
            let excess = samples.len() - threshold;
            samples.drain(..excess);
        }

        Ok(FeedbackOutcome {
            applied: true,
            revised: Some(verified.revised),
            pending_samples: samples.len(),
            retrained,
        })
    }
}
