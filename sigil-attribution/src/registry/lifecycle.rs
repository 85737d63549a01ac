//! Signal lifecycle tracking
//!
//! `detected → attributed → processed → {resolved | expired}`. Entries are
//! append-only and never move backward.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AttributionError, Result};
use crate::strategy::StrategyKind;
use crate::types::{AgentId, Candidate, Confidence, DetectionContext, Signal, SignalId};

/// Stage of a signal's life
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStage {
    Detected,
    Attributed,
    Processed,
    Resolved,
    Expired,
}

impl LifecycleStage {
    /// No transition leaves a terminal stage
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Expired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::Attributed => "attributed",
            Self::Processed => "processed",
            Self::Resolved => "resolved",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stage transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEntry {
    pub stage: LifecycleStage,
    pub timestamp: DateTime<Utc>,
    pub agent_id: Option<AgentId>,
    pub context: BTreeMap<String, String>,
}

/// One strategy's attempt, kept whether or not it won
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionAttempt {
    pub strategy: StrategyKind,
    pub agent_id: AgentId,
    pub confidence: Confidence,
    pub reasoning: String,
    pub recorded_at: DateTime<Utc>,
}

impl AttributionAttempt {
    pub fn from_candidate(candidate: &Candidate, recorded_at: DateTime<Utc>) -> Self {
        Self {
            strategy: candidate.strategy,
            agent_id: candidate.agent_id.clone(),
            confidence: candidate.confidence,
            reasoning: candidate.reasoning.clone(),
            recorded_at,
        }
    }
}

/// Full history of a single signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalLifecycle {
    pub signal: Signal,
    pub context: DetectionContext,
    entries: Vec<LifecycleEntry>,
    pub attribution_chain: Vec<AttributionAttempt>,
}

impl SignalLifecycle {
    /// Start a lifecycle in `detected` at the signal's detection time
    pub fn new(signal: Signal, context: DetectionContext) -> Self {
        let mut entry_context = BTreeMap::new();
        entry_context.insert("source_component".to_string(), signal.source_component.clone());
        let entries = vec![LifecycleEntry {
            stage: LifecycleStage::Detected,
            timestamp: signal.detected_at,
            agent_id: None,
            context: entry_context,
        }];
        Self {
            signal,
            context,
            entries,
            attribution_chain: Vec::new(),
        }
    }

    pub fn signal_id(&self) -> &SignalId {
        &self.signal.id
    }

    pub fn entries(&self) -> &[LifecycleEntry] {
        &self.entries
    }

    /// Always the stage of the last entry
    pub fn current_stage(&self) -> LifecycleStage {
        self.last_entry().stage
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_entry().timestamp
    }

    fn last_entry(&self) -> &LifecycleEntry {
        // `new` always seeds one entry and entries are never removed
        &self.entries[self.entries.len() - 1]
    }

    /// Append a stage transition
    ///
    /// Returns `Ok(false)` when already in `stage`. Backward moves and moves
    /// out of a terminal stage are errors. Timestamps are clamped so they
    /// never go back in time.
    pub fn advance(
        &mut self,
        stage: LifecycleStage,
        at: DateTime<Utc>,
        agent_id: Option<AgentId>,
        context: BTreeMap<String, String>,
    ) -> Result<bool> {
        let current = self.current_stage();
        if current == stage {
            return Ok(false);
        }
        if current.is_terminal() {
            return Err(AttributionError::Lifecycle(format!(
                "signal {} is already {current}, cannot move to {stage}",
                self.signal.id
            )));
        }
        if stage < current {
            return Err(AttributionError::Lifecycle(format!(
                "signal {} cannot move back from {current} to {stage}",
                self.signal.id
            )));
        }

        let timestamp = at.max(self.last_updated());
        self.entries.push(LifecycleEntry {
            stage,
            timestamp,
            agent_id,
            context,
        });
        Ok(true)
    }

    pub fn record_attempts(&mut self, candidates: &[Candidate], at: DateTime<Utc>) {
        self.attribution_chain
            .extend(candidates.iter().map(|c| AttributionAttempt::from_candidate(c, at)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn lifecycle() -> SignalLifecycle {
        SignalLifecycle::new(
            Signal::new("s-1", "gg", Utc::now(), "[gg]"),
            DetectionContext::default(),
        )
    }

    #[test]
    fn test_starts_detected() {
        let lc = lifecycle();
        assert_eq!(lc.current_stage(), LifecycleStage::Detected);
        assert_eq!(lc.entries().len(), 1);
    }

    #[test]
    fn test_forward_transitions() {
        let mut lc = lifecycle();
        let now = Utc::now();
        assert!(lc.advance(LifecycleStage::Attributed, now, None, BTreeMap::new()).unwrap());
        assert!(lc.advance(LifecycleStage::Processed, now, None, BTreeMap::new()).unwrap());
        assert!(lc.advance(LifecycleStage::Resolved, now, None, BTreeMap::new()).unwrap());
        assert_eq!(lc.current_stage(), LifecycleStage::Resolved);
        assert_eq!(lc.entries().len(), 4);
    }

    #[test]
    fn test_same_stage_is_noop() {
        let mut lc = lifecycle();
        assert!(!lc.advance(LifecycleStage::Detected, Utc::now(), None, BTreeMap::new()).unwrap());
        assert_eq!(lc.entries().len(), 1);
    }

    #[test]
    fn test_backward_move_rejected() {
        let mut lc = lifecycle();
        lc.advance(LifecycleStage::Processed, Utc::now(), None, BTreeMap::new())
            .unwrap();
        let err = lc
            .advance(LifecycleStage::Attributed, Utc::now(), None, BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, AttributionError::Lifecycle(_)));
    }

    #[test]
    fn test_terminal_is_final() {
        let mut lc = lifecycle();
        lc.advance(LifecycleStage::Expired, Utc::now(), None, BTreeMap::new())
            .unwrap();
        assert!(lc
            .advance(LifecycleStage::Resolved, Utc::now(), None, BTreeMap::new())
            .is_err());
    }

    #[test]
    fn test_timestamps_never_decrease() {
        let mut lc = lifecycle();
        let earlier = lc.last_updated() - TimeDelta::seconds(60);
        lc.advance(LifecycleStage::Attributed, earlier, None, BTreeMap::new())
            .unwrap();
        let stamps: Vec<_> = lc.entries().iter().map(|e| e.timestamp).collect();
        assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
    }
}
