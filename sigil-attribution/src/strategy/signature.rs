//! Signature matching
//!
//! Scans a signal's raw content for tokens known to identify an agent,
//! such as `@robo-dev` or `[agent: robo-qa]`. No learning happens here.

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::{CorrelationStrategy, StrategyInput, StrategyKind};
use crate::error::{AttributionError, Result};
use crate::types::{AgentId, Candidate, Confidence};

/// Patterns that identify one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSignature {
    pub agent_id: AgentId,
    /// Regular expressions, matched case-insensitively
    pub patterns: Vec<String>,
}

impl AgentSignature {
    pub fn new(agent_id: impl Into<AgentId>, patterns: &[&str]) -> Self {
        Self {
            agent_id: agent_id.into(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Configuration for signature matching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    pub enabled: bool,
    /// Checked in order; the first match wins
    pub signatures: Vec<AgentSignature>,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            signatures: Vec::new(),
        }
    }
}

/// A compiled pattern with the agent it identifies
struct CompiledSignature {
    agent_id: AgentId,
    regex: Regex,
    pattern_str: String,
}

/// Regex-based agent signature strategy
pub struct SignatureStrategy {
    signatures: Vec<CompiledSignature>,
}

impl SignatureStrategy {
    /// Compile every configured pattern
    ///
    /// An invalid pattern is a configuration error.
    pub fn from_config(config: &SignatureConfig) -> Result<Self> {
        let mut signatures = Vec::new();

        for signature in &config.signatures {
            for pattern in &signature.patterns {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        AttributionError::InvalidConfig(format!(
                            "invalid signature pattern '{}' for {}: {}",
                            pattern, signature.agent_id, e
                        ))
                    })?;
                signatures.push(CompiledSignature {
                    agent_id: signature.agent_id.clone(),
                    regex,
                    pattern_str: pattern.clone(),
                });
            }
        }

        Ok(Self { signatures })
    }

    /// Number of compiled patterns
    pub fn pattern_count(&self) -> usize {
        self.signatures.len()
    }
}

#[async_trait]
impl CorrelationStrategy for SignatureStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Signature
    }

    async fn propose(&self, input: &StrategyInput) -> Result<Option<Candidate>> {
        let content = &input.signal.raw_content;

        let hit = self
            .signatures
            .iter()
            .find_map(|sig| sig.regex.find(content).map(|m| (sig, m.as_str().to_string())));

        Ok(hit.map(|(sig, matched)| {
            Candidate::new(
                StrategyKind::Signature,
                sig.agent_id.clone(),
                Confidence::High,
                format!("content matches signature '{}'", sig.pattern_str),
            )
            .with_evidence(format!("matched_token={matched}"))
        }))
    }
}
