//! Learned signal patterns
//!
//! Per signal code, an exponentially smoothed frequency for each agent that
//! has been linked to it. Frequencies decay over time and are pruned once
//! they fall below the configured floor.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::strategy::frequency_confidence;
use crate::types::{AgentId, DetectionContext};

/// Most distinct contextual factors tracked per pattern.
const MAX_CONTEXT_FACTORS: usize = 64;

/// An observed frequency handed to the learner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternObservation {
    pub signal_code: String,
    pub frequency: f64,
}

impl PatternObservation {
    pub fn new(signal_code: impl Into<String>, frequency: f64) -> Self {
        Self {
            signal_code: signal_code.into(),
            frequency,
        }
    }
}

/// Introspection view of one agent's pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSummary {
    pub signal_code: String,
    pub frequency: f64,
    pub confidence: f64,
}

/// Learned frequencies for one signal code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPattern {
    pub signal_code: String,
    /// Ordered by agent id so ties resolve the same way every time
    pub per_agent_frequency: BTreeMap<AgentId, f64>,
    /// Attributions counted per agent since the entry was last pruned
    pub observations: BTreeMap<AgentId, u64>,
    pub last_seen: DateTime<Utc>,
    /// Occurrence counts of `file:` / `prp:` context values
    pub contextual_factors: BTreeMap<String, u32>,
}

impl SignalPattern {
    pub fn new(signal_code: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            signal_code: signal_code.into(),
            per_agent_frequency: BTreeMap::new(),
            observations: BTreeMap::new(),
            last_seen: now,
            contextual_factors: BTreeMap::new(),
        }
    }

    pub fn frequency(&self, agent_id: &AgentId) -> Option<f64> {
        self.per_agent_frequency.get(agent_id).copied()
    }

    /// Exponential update toward `observed`, never negative
    pub fn learn(
        &mut self,
        agent_id: &AgentId,
        observed: f64,
        learning_rate: f64,
        now: DateTime<Utc>,
    ) -> f64 {
        let old = self.frequency(agent_id).unwrap_or(0.0);
        let updated = (old * (1.0 - learning_rate) + observed * learning_rate).max(0.0);
        self.per_agent_frequency.insert(agent_id.clone(), updated);
        self.last_seen = self.last_seen.max(now);
        updated
    }

    /// Count one more attribution for the agent and return the new count
    pub fn observe(&mut self, agent_id: &AgentId) -> u64 {
        let count = self.observations.entry(agent_id.clone()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn note_context(&mut self, context: &DetectionContext) {
        let keys = [
            context.file_path.as_ref().map(|p| format!("file:{p}")),
            context.prp_context.as_ref().map(|p| format!("prp:{p}")),
        ];
        for key in keys.into_iter().flatten() {
            if let Some(count) = self.contextual_factors.get_mut(&key) {
                *count += 1;
            } else if self.contextual_factors.len() < MAX_CONTEXT_FACTORS {
                self.contextual_factors.insert(key, 1);
            }
        }
    }

    /// Multiply every frequency by `factor` and prune those below `floor`
    ///
    /// Returns the number of pruned agent entries.
    pub fn decay(&mut self, factor: f64, floor: f64) -> usize {
        let before = self.per_agent_frequency.len();
        for frequency in self.per_agent_frequency.values_mut() {
            *frequency *= factor;
        }
        self.per_agent_frequency.retain(|_, f| *f >= floor);
        let freq = &self.per_agent_frequency;
        self.observations.retain(|agent, _| freq.contains_key(agent));
        before - self.per_agent_frequency.len()
    }

    /// Agent with the highest frequency; ties go to the smallest agent id
    pub fn top_agent(&self) -> Option<(&AgentId, f64)> {
        let mut best: Option<(&AgentId, f64)> = None;
        for (agent, &frequency) in &self.per_agent_frequency {
            match best {
                Some((_, top)) if frequency <= top => {}
                _ => best = Some((agent, frequency)),
            }
        }
        best
    }

    pub fn summary_for(&self, agent_id: &AgentId) -> Option<PatternSummary> {
        self.frequency(agent_id).map(|frequency| PatternSummary {
            signal_code: self.signal_code.clone(),
            frequency,
            confidence: frequency_confidence(frequency),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.per_agent_frequency.is_empty()
    }
}
