//! Correlation cache
//!
//! Bounded record of past strategy correlations, keyed by a stable hash of
//! `(signal_id, activity_id)`. Overflow evicts the oldest insertion.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::strategy::StrategyKind;
use crate::types::{ActivityId, AgentId, Candidate, SignalId};

/// A cached correlation outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub signal_id: SignalId,
    /// `None` for strategies that do not work from an activity
    pub activity_id: Option<ActivityId>,
    pub agent_id: AgentId,
    pub correlation_score: f64,
    pub method: StrategyKind,
    pub timestamp: DateTime<Utc>,
}

impl CorrelationResult {
    pub fn from_candidate(signal_id: &SignalId, candidate: &Candidate, now: DateTime<Utc>) -> Self {
        Self {
            signal_id: signal_id.clone(),
            activity_id: candidate.activity_id.clone(),
            agent_id: candidate.agent_id.clone(),
            correlation_score: candidate.confidence.as_score(),
            method: candidate.strategy,
            timestamp: now,
        }
    }

    pub fn key(&self) -> String {
        correlation_key(&self.signal_id, self.activity_id.as_ref(), self.method)
    }
}

/// Stable cache key
///
/// Correlations without an activity are keyed by their strategy instead.
pub fn correlation_key(
    signal_id: &SignalId,
    activity_id: Option<&ActivityId>,
    method: StrategyKind,
) -> String {
    let activity = match activity_id {
        Some(id) => format!("activity:{id}"),
        None => format!("strategy:{method}"),
    };
    let mut hasher = Sha256::new();
    hasher.update(signal_id.as_str().as_bytes());
    hasher.update([0x1f]);
    hasher.update(activity.as_bytes());
    hex::encode(hasher.finalize())
}

/// Insertion-ordered bounded cache
#[derive(Debug)]
pub struct CorrelationCache {
    capacity: usize,
    entries: HashMap<String, CorrelationResult>,
    order: VecDeque<String>,
    /// Live entry count per signal
    per_signal: HashMap<SignalId, usize>,
}

impl CorrelationCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
            per_signal: HashMap::new(),
        }
    }

    /// Insert a correlation, returning how many entries were evicted
    ///
    /// Re-inserting an existing key replaces the value in place.
    pub fn insert(&mut self, result: CorrelationResult) -> usize {
        let key = result.key();
        let signal_id = result.signal_id.clone();
        // Keys hash the signal id, so a replaced entry belongs to the same signal
        if self.entries.insert(key.clone(), result).is_none() {
            self.order.push_back(key);
            *self.per_signal.entry(signal_id).or_insert(0) += 1;
        }
        self.trim_to(self.capacity)
    }

    /// Evict oldest entries until at most `bound` remain
    pub fn trim_to(&mut self, bound: usize) -> usize {
        let mut evicted = 0;
        while self.order.len() > bound {
            if let Some(oldest) = self.order.pop_front() {
                if let Some(removed) = self.entries.remove(&oldest) {
                    self.release(&removed.signal_id);
                }
                evicted += 1;
            }
        }
        evicted
    }

    pub fn get(
        &self,
        signal_id: &SignalId,
        activity_id: Option<&ActivityId>,
        method: StrategyKind,
    ) -> Option<&CorrelationResult> {
        self.entries
            .get(&correlation_key(signal_id, activity_id, method))
    }

    /// Correlations for a signal in insertion order
    pub fn for_signal(&self, signal_id: &SignalId) -> Vec<CorrelationResult> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get(key))
            .filter(|r| &r.signal_id == signal_id)
            .cloned()
            .collect()
    }

    fn release(&mut self, signal_id: &SignalId) {
        if let Some(count) = self.per_signal.get_mut(signal_id) {
            *count -= 1;
            if *count == 0 {
                self.per_signal.remove(signal_id);
            }
        }
    }

    pub fn contains_signal(&self, signal_id: &SignalId) -> bool {
        self.per_signal.contains_key(signal_id)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
