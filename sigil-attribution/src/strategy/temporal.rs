//! Temporal correlation
//!
//! Attributes a signal to the agent whose activity happened closest in time
//! to the moment the signal was detected.

use async_trait::async_trait;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use super::{CorrelationStrategy, StrategyInput, StrategyKind};
use crate::config::secs_to_delta;
use crate::error::Result;
use crate::types::{Candidate, Confidence};

/// Configuration for temporal correlation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemporalConfig {
    pub enabled: bool,
    /// Maximum distance between signal and activity (default: 30s)
    pub time_window_secs: u64,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            time_window_secs: 30,
        }
    }
}

impl TemporalConfig {
    pub fn window(&self) -> TimeDelta {
        secs_to_delta(self.time_window_secs)
    }
}

/// Nearest-activity-in-time strategy
pub struct TemporalStrategy {
    config: TemporalConfig,
}

impl TemporalStrategy {
    /// Create a new strategy with default configuration
    pub fn new() -> Self {
        Self {
            config: TemporalConfig::default(),
        }
    }

    /// Create a new strategy with custom configuration
    pub fn with_config(config: TemporalConfig) -> Self {
        Self { config }
    }

    /// Map a time delta to a confidence bucket
    pub fn confidence_for(&self, delta: TimeDelta) -> Confidence {
        let window = self.config.window();
        let delta = delta.abs();
        if delta <= window / 2 {
            Confidence::High
        } else if delta <= window {
            Confidence::Medium
        } else {
            Confidence::Low
        }
    }
}

impl Default for TemporalStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CorrelationStrategy for TemporalStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Temporal
    }

    async fn propose(&self, input: &StrategyInput) -> Result<Option<Candidate>> {
        let window = self.config.window();
        let detected_at = input.signal.detected_at;

        // Smallest delta wins; equal deltas go to the most recent activity
        let nearest = input
            .activities
            .iter()
            .map(|a| (a, (a.timestamp - detected_at).abs()))
            .filter(|(_, delta)| *delta <= window)
            .min_by(|(a, da), (b, db)| da.cmp(db).then_with(|| b.timestamp.cmp(&a.timestamp)));

        let Some((activity, delta)) = nearest else {
            return Ok(None);
        };

        let confidence = self.confidence_for(delta);
        let delta_ms = delta.num_milliseconds();

        Ok(Some(
            Candidate::new(
                StrategyKind::Temporal,
                activity.agent_id.clone(),
                confidence,
                format!(
                    "activity {} occurred {delta_ms}ms from the signal within a {}s window",
                    activity.id, self.config.time_window_secs
                ),
            )
            .with_evidence(format!("time_delta_ms={delta_ms}"))
            .with_evidence(format!("activity_id={}", activity.id))
            .with_activity(activity.id.clone()),
        ))
    }
}
