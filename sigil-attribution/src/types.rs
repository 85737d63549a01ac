//! Core types shared by the attribution engine
//!
//! Signals come from an external detector, activities from an external
//! activity store. Everything else in this module is produced by the
//! strategies and the ensemble aggregator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AttributionError, Result};
use crate::strategy::StrategyKind;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

string_id!(
    /// Identifier assigned to a signal by the detector.
    SignalId
);
string_id!(
    /// Identifier of an agent (human or AI worker).
    AgentId
);
string_id!(
    /// Identifier of a recorded agent activity.
    ActivityId
);
string_id!(
    /// Identifier of an agent session tracked by the bridge.
    SessionId
);

/// A status marker found in a progress log or detector output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    /// Short code such as `gg` or `bb`
    pub code: String,
    pub detected_at: DateTime<Utc>,
    /// The text the signal was found in
    pub raw_content: String,
    /// Detector component that found the signal
    pub source_component: String,
}

impl Signal {
    pub fn new(
        id: impl Into<SignalId>,
        code: impl Into<String>,
        detected_at: DateTime<Utc>,
        raw_content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            code: code.into(),
            detected_at,
            raw_content: raw_content.into(),
            source_component: "detector".to_string(),
        }
    }

    #[must_use]
    pub fn with_source(mut self, source_component: impl Into<String>) -> Self {
        self.source_component = source_component.into();
        self
    }

    /// Reject signals missing required fields
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(AttributionError::InvalidSignal("signal id is empty".into()));
        }
        if self.code.trim().is_empty() {
            return Err(AttributionError::InvalidSignal(format!(
                "signal {} has an empty code",
                self.id
            )));
        }
        Ok(())
    }
}

/// Optional context the detector attaches to a signal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionContext {
    pub file_path: Option<String>,
    pub prp_context: Option<String>,
}

impl DetectionContext {
    pub fn for_file(path: impl Into<String>) -> Self {
        Self {
            file_path: Some(path.into()),
            prp_context: None,
        }
    }

    pub fn for_prp(prp: impl Into<String>) -> Self {
        Self {
            file_path: None,
            prp_context: Some(prp.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.file_path.is_none() && self.prp_context.is_none()
    }
}

/// Kind of work an activity record describes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    FileRead,
    FileEdit,
    Command,
    Message,
    SignalEmitted,
    TaskStarted,
    TaskCompleted,
    Other(String),
}

/// A single recorded action by an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentActivity {
    pub id: ActivityId,
    pub agent_id: AgentId,
    pub agent_type: String,
    pub activity_type: ActivityType,
    pub timestamp: DateTime<Utc>,
    pub file_path: Option<String>,
    pub prp_context: Option<String>,
    pub session_id: Option<SessionId>,
}

impl AgentActivity {
    pub fn new(
        id: impl Into<ActivityId>,
        agent_id: impl Into<AgentId>,
        activity_type: ActivityType,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            agent_type: "unknown".to_string(),
            activity_type,
            timestamp,
            file_path: None,
            prp_context: None,
            session_id: None,
        }
    }

    #[must_use]
    pub fn with_agent_type(mut self, agent_type: impl Into<String>) -> Self {
        self.agent_type = agent_type.into();
        self
    }

    #[must_use]
    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_prp(mut self, prp: impl Into<String>) -> Self {
        self.prp_context = Some(prp.into());
        self
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<SessionId>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Bucketed certainty of an attribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    High,
    Medium,
    Low,
    Unknown,
}

impl Confidence {
    /// Numeric value used by confidence-weighted voting
    pub fn as_score(&self) -> f64 {
        match self {
            Self::High => 1.0,
            Self::Medium => 0.7,
            Self::Low => 0.4,
            Self::Unknown => 0.1,
        }
    }

    /// Bucket a continuous score using the given thresholds
    pub fn from_score(score: f64, thresholds: &ConfidenceThresholds) -> Self {
        if score >= thresholds.high {
            Self::High
        } else if score >= thresholds.medium {
            Self::Medium
        } else if score >= thresholds.low {
            Self::Low
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score cut-offs for bucketing continuous confidence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceThresholds {
    pub high: f64,
    pub medium: f64,
    pub low: f64,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self {
            high: 0.8,
            medium: 0.6,
            low: 0.4,
        }
    }
}

/// A piece of evidence supporting a candidate attribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Strategy that produced it, `None` for external verification
    pub strategy: Option<StrategyKind>,
    pub detail: String,
}

impl Evidence {
    pub fn new(strategy: StrategyKind, detail: impl Into<String>) -> Self {
        Self {
            strategy: Some(strategy),
            detail: detail.into(),
        }
    }

    pub fn verification(detail: impl Into<String>) -> Self {
        Self {
            strategy: None,
            detail: detail.into(),
        }
    }
}

/// A single strategy's proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub strategy: StrategyKind,
    pub agent_id: AgentId,
    pub confidence: Confidence,
    pub evidence: Vec<Evidence>,
    pub reasoning: String,
    /// Activity the proposal was derived from, when there is one
    pub activity_id: Option<ActivityId>,
}

impl Candidate {
    pub fn new(
        strategy: StrategyKind,
        agent_id: impl Into<AgentId>,
        confidence: Confidence,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            strategy,
            agent_id: agent_id.into(),
            confidence,
            evidence: Vec::new(),
            reasoning: reasoning.into(),
            activity_id: None,
        }
    }

    #[must_use]
    pub fn with_evidence(mut self, detail: impl Into<String>) -> Self {
        self.evidence.push(Evidence::new(self.strategy, detail));
        self
    }

    #[must_use]
    pub fn with_activity(mut self, activity_id: ActivityId) -> Self {
        self.activity_id = Some(activity_id);
        self
    }
}

/// How an attribution was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionMethod {
    /// A single strategy proposed the only candidate
    Strategy(StrategyKind),
    /// Multiple strategies were fused by the ensemble
    Ensemble,
    /// Revised by external verification
    Feedback,
    /// Nothing was proposed
    Unattributed,
}

impl std::fmt::Display for AttributionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strategy(kind) => write!(f, "{kind}"),
            Self::Ensemble => f.write_str("ensemble"),
            Self::Feedback => f.write_str("feedback"),
            Self::Unattributed => f.write_str("unattributed"),
        }
    }
}

/// Rule the ensemble applied to reach its decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    NoResults,
    SingleStrategy,
    Consensus,
    Plurality,
    Verified,
}

impl ConflictResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoResults => "no_results",
            Self::SingleStrategy => "single_strategy",
            Self::Consensus => "consensus",
            Self::Plurality => "plurality",
            Self::Verified => "verified",
        }
    }
}

/// One strategy's vote as seen by the ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyVote {
    pub strategy: StrategyKind,
    pub agent_id: AgentId,
    pub confidence: Confidence,
}

/// Reason an attribution is less trustworthy than a clean run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Degradation {
    StrategyFailed(StrategyKind),
    StrategyTimedOut(StrategyKind),
    ActivityStoreUnavailable,
    NoCandidates,
}

/// Operational details attached to an attribution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributionMetadata {
    /// True whenever the result is degraded in any way
    pub fallback_attribution: bool,
    pub degradations: Vec<Degradation>,
    /// Result was served from the correlation cache
    pub cache_hit: bool,
    /// Type of the attributed agent, `unknown` when the directory has no entry
    pub agent_type: Option<String>,
    pub latency_ms: u64,
}

impl AttributionMetadata {
    pub fn degrade(&mut self, degradation: Degradation) {
        if !self.degradations.contains(&degradation) {
            self.degradations.push(degradation);
        }
        self.fallback_attribution = true;
    }
}

/// Final decision for a signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionResult {
    pub signal_id: SignalId,
    pub attributed_agent_id: Option<AgentId>,
    pub confidence: Confidence,
    pub evidence: Vec<Evidence>,
    pub method: AttributionMethod,
    /// Fused confidence in [0, 1]
    pub ensemble_confidence: f64,
    pub conflict_resolution: ConflictResolution,
    /// Share of votes cast for the winner
    pub agreement_ratio: f64,
    pub votes: Vec<StrategyVote>,
    pub metadata: AttributionMetadata,
    /// Starts at 1, incremented on each revision
    pub version: u32,
    pub attributed_at: DateTime<Utc>,
}

impl AttributionResult {
    /// Result for a signal nobody could be linked to
    pub fn unknown(signal_id: SignalId) -> Self {
        Self {
            signal_id,
            attributed_agent_id: None,
            confidence: Confidence::Unknown,
            evidence: Vec::new(),
            method: AttributionMethod::Unattributed,
            ensemble_confidence: 0.0,
            conflict_resolution: ConflictResolution::NoResults,
            agreement_ratio: 0.0,
            votes: Vec::new(),
            metadata: AttributionMetadata::default(),
            version: 1,
            attributed_at: Utc::now(),
        }
    }

    pub fn is_attributed(&self) -> bool {
        self.attributed_agent_id.is_some()
    }

    /// New version reflecting an externally verified agent
    pub fn revised(&self, correct_agent: AgentId, is_correct: bool) -> Self {
        let mut revised = self.clone();
        revised.evidence.push(Evidence::verification(if is_correct {
            format!("verified correct for {correct_agent}")
        } else {
            format!("corrected to {correct_agent}")
        }));
        revised.attributed_agent_id = Some(correct_agent);
        revised.confidence = Confidence::High;
        revised.method = AttributionMethod::Feedback;
        revised.ensemble_confidence = 1.0;
        revised.conflict_resolution = ConflictResolution::Verified;
        revised.version = self.version + 1;
        revised.attributed_at = Utc::now();
        revised
    }
}
