//! Configuration for sigil-attribution
//!
//! Every section defaults sensibly so a partial (or empty) TOML file is a
//! valid configuration.

use std::path::Path;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::bridge::BridgeConfig;
use crate::ensemble::EnsembleConfig;
use crate::error::{AttributionError, Result};
use crate::feedback::FeedbackConfig;
use crate::registry::RegistryConfig;
use crate::strategy::{SignatureStrategy, StrategiesConfig, StrategyKind};

/// Largest accepted value for any `*_secs` setting (ten years)
pub const MAX_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// A seconds setting as a `TimeDelta`, saturating instead of overflowing
pub(crate) fn secs_to_delta(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

/// Reject seconds settings too large to do date arithmetic with
pub(crate) fn check_secs(field: &str, secs: u64) -> Result<()> {
    if secs > MAX_SECS {
        return Err(AttributionError::InvalidConfig(format!(
            "{field} must be at most {MAX_SECS}, got {secs}"
        )));
    }
    Ok(())
}

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributionConfig {
    pub strategies: StrategiesConfig,
    pub ensemble: EnsembleConfig,
    pub registry: RegistryConfig,
    pub bridge: BridgeConfig,
    pub feedback: FeedbackConfig,
    /// How far around a signal activities are fetched (default: 300)
    pub activity_lookback_secs: u64,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            strategies: StrategiesConfig::default(),
            ensemble: EnsembleConfig::default(),
            registry: RegistryConfig::default(),
            bridge: BridgeConfig::default(),
            feedback: FeedbackConfig::default(),
            activity_lookback_secs: 300,
        }
    }
}

impl AttributionConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| AttributionError::Config(format!("invalid attribution TOML: {}", e)))
    }

    /// Load and validate configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AttributionError::Config(format!("failed to read config file {:?}: {}", path, e))
        })?;
        let config = Self::from_toml_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| AttributionError::Serialization(e.to_string()))
    }

    pub fn activity_lookback(&self) -> TimeDelta {
        secs_to_delta(self.activity_lookback_secs)
    }

    /// Check every section for consistency
    pub fn validate(&self) -> Result<()> {
        self.validate_strategies()?;
        self.validate_ensemble()?;
        self.registry.validate()?;
        self.bridge.validate()?;
        self.feedback.validate()?;
        check_secs("activity_lookback_secs", self.activity_lookback_secs)?;
        if self.activity_lookback_secs < self.strategies.temporal.time_window_secs {
            return Err(AttributionError::InvalidConfig(
                "activity_lookback_secs must cover strategies.temporal.time_window_secs".into(),
            ));
        }
        Ok(())
    }

    fn validate_strategies(&self) -> Result<()> {
        let strategies = &self.strategies;
        if strategies.timeout_ms == 0 {
            return Err(AttributionError::InvalidConfig(
                "strategies.timeout_ms must be positive".into(),
            ));
        }
        if strategies.temporal.time_window_secs == 0 {
            return Err(AttributionError::InvalidConfig(
                "strategies.temporal.time_window_secs must be positive".into(),
            ));
        }
        check_secs(
            "strategies.temporal.time_window_secs",
            strategies.temporal.time_window_secs,
        )?;
        let threshold = strategies.pattern_match.min_confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(AttributionError::InvalidConfig(format!(
                "strategies.pattern_match.min_confidence_threshold must be in [0, 1], got {threshold}"
            )));
        }
        if strategies.model.predict_timeout_ms == 0 {
            return Err(AttributionError::InvalidConfig(
                "strategies.model.predict_timeout_ms must be positive".into(),
            ));
        }
        // Compiles every pattern
        SignatureStrategy::from_config(&strategies.signature)?;
        Ok(())
    }

    fn validate_ensemble(&self) -> Result<()> {
        let ensemble = &self.ensemble;
        for kind in StrategyKind::ALL {
            let weight = ensemble.weights.weight_for(kind);
            if !weight.is_finite() || weight < 0.0 {
                return Err(AttributionError::InvalidConfig(format!(
                    "ensemble.weights.{kind} must be a non-negative number, got {weight}"
                )));
            }
        }

        let t = &ensemble.thresholds;
        let ordered = 0.0 <= t.low && t.low <= t.medium && t.medium <= t.high && t.high <= 1.0;
        if !ordered {
            return Err(AttributionError::InvalidConfig(format!(
                "ensemble.thresholds must satisfy 0 <= low <= medium <= high <= 1, got {}/{}/{}",
                t.low, t.medium, t.high
            )));
        }

        if !(0.0..=1.0).contains(&ensemble.minimum_agreement) {
            return Err(AttributionError::InvalidConfig(format!(
                "ensemble.minimum_agreement must be in [0, 1], got {}",
                ensemble.minimum_agreement
            )));
        }
        Ok(())
    }
}
