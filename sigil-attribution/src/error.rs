//! Error types for sigil-attribution

use thiserror::Error;

use crate::strategy::StrategyKind;

/// Error type for attribution operations
///
/// Only contract violations (`InvalidSignal`, `InvalidFeedback`,
/// `InvalidConfig`) escape the public attribution API. Strategy, model and
/// activity-store failures are absorbed by the engine and surface as
/// degradations on the result.
#[derive(Debug, Error)]
pub enum AttributionError {
    /// Signal is missing a required field
    #[error("Invalid signal: {0}")]
    InvalidSignal(String),

    /// Feedback is missing a required field
    #[error("Invalid feedback: {0}")]
    InvalidFeedback(String),

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration could not be read or parsed
    #[error("Config error: {0}")]
    Config(String),

    /// A correlation strategy failed internally
    #[error("Strategy {strategy} failed: {message}")]
    Strategy {
        strategy: StrategyKind,
        message: String,
    },

    /// No pluggable model is installed
    #[error("Attribution model unavailable")]
    ModelUnavailable,

    /// The pluggable model returned an error
    #[error("Model error: {0}")]
    Model(String),

    /// Lifecycle transition was rejected
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Activity store query failed
    #[error("Activity store error: {0}")]
    ActivityStore(String),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AttributionError {
    /// Build a strategy failure
    pub fn strategy(strategy: StrategyKind, message: impl Into<String>) -> Self {
        Self::Strategy {
            strategy,
            message: message.into(),
        }
    }
}

/// Result type alias for attribution operations
pub type Result<T> = std::result::Result<T, AttributionError>;
