//! Agent ↔ signal relationships
//!
//! Each agent keeps a bounded FIFO of relationship records. Inserting past
//! capacity evicts the oldest record regardless of its confidence.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AgentId, Confidence, SignalId};

/// Outcome of external verification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipVerification {
    pub verified: bool,
    /// 1.0 when confirmed, 0.0 when refuted
    pub accuracy_score: Option<f64>,
    pub verified_at: Option<DateTime<Utc>>,
}

/// Link between an agent and a signal it was attributed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSignalRelationship {
    pub agent_id: AgentId,
    pub signal_id: SignalId,
    pub signal_code: String,
    /// Strength in [0, 1]
    pub strength: f64,
    pub confidence: Confidence,
    pub interaction_count: u32,
    pub verification: RelationshipVerification,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentSignalRelationship {
    pub fn new(
        agent_id: AgentId,
        signal_id: SignalId,
        signal_code: impl Into<String>,
        strength: f64,
        confidence: Confidence,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            agent_id,
            signal_id,
            signal_code: signal_code.into(),
            strength: strength.clamp(0.0, 1.0),
            confidence,
            interaction_count: 1,
            verification: RelationshipVerification::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn verify(&mut self, accurate: bool, now: DateTime<Utc>) {
        self.verification = RelationshipVerification {
            verified: true,
            accuracy_score: Some(if accurate { 1.0 } else { 0.0 }),
            verified_at: Some(now),
        };
        self.updated_at = now;
    }
}

/// Bounded per-agent relationship list
#[derive(Debug, Clone)]
pub(crate) struct RelationshipLog {
    capacity: usize,
    entries: VecDeque<AgentSignalRelationship>,
}

impl RelationshipLog {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    /// Insert or refresh the record for `relationship.signal_id`
    ///
    /// Returns the evicted record when the log overflowed.
    pub(crate) fn upsert(
        &mut self,
        relationship: AgentSignalRelationship,
    ) -> Option<AgentSignalRelationship> {
        if let Some(existing) = self.find_mut(&relationship.signal_id) {
            existing.interaction_count += 1;
            existing.strength = relationship.strength;
            existing.confidence = relationship.confidence;
            existing.updated_at = relationship.updated_at;
            return None;
        }

        self.entries.push_back(relationship);
        if self.entries.len() > self.capacity {
            self.entries.pop_front()
        } else {
            None
        }
    }

    pub(crate) fn find_mut(&mut self, signal_id: &SignalId) -> Option<&mut AgentSignalRelationship> {
        self.entries.iter_mut().find(|r| &r.signal_id == signal_id)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &AgentSignalRelationship> {
        self.entries.iter()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
