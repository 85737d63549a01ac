//! Signal registry
//!
//! Owns learned signal patterns, agent ↔ signal relationships, signal
//! lifecycles and the versioned attribution history. Constructed explicitly
//! and shared by `Arc`; every mutation goes through a single write lock.
//!
//! Operations on unknown agents or signals log a warning and do nothing.

mod lifecycle;
mod patterns;
mod relationships;

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::{check_secs, secs_to_delta};
use crate::error::{AttributionError, Result};
use crate::types::{
    AgentId, AttributionResult, Candidate, Confidence, DetectionContext, Signal, SignalId,
};

pub use lifecycle::{AttributionAttempt, LifecycleEntry, LifecycleStage, SignalLifecycle};
pub use patterns::{PatternObservation, PatternSummary, SignalPattern};
pub use relationships::{AgentSignalRelationship, RelationshipVerification};

use relationships::RelationshipLog;

/// Configuration for the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Exponential update rate α (default: 0.1)
    pub learning_rate: f64,
    /// Multiplier applied on every cleanup (default: 0.95)
    pub decay_factor: f64,
    /// Frequencies below this are pruned (default: 3)
    pub min_pattern_frequency: f64,
    pub max_relationships_per_agent: usize,
    pub cleanup_interval_secs: u64,
    /// Signals still `detected` after this long expire
    pub lifecycle_retention_secs: u64,
    /// Terminal lifecycles older than this are dropped
    pub history_retention_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            decay_factor: 0.95,
            min_pattern_frequency: 3.0,
            max_relationships_per_agent: 1000,
            cleanup_interval_secs: 3600,
            lifecycle_retention_secs: 3600,
            history_retention_secs: 86_400,
        }
    }
}

impl RegistryConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(AttributionError::InvalidConfig(format!(
                "registry.learning_rate must be in (0, 1], got {}",
                self.learning_rate
            )));
        }
        if !(self.decay_factor > 0.0 && self.decay_factor <= 1.0) {
            return Err(AttributionError::InvalidConfig(format!(
                "registry.decay_factor must be in (0, 1], got {}",
                self.decay_factor
            )));
        }
        if self.min_pattern_frequency < 0.0 {
            return Err(AttributionError::InvalidConfig(
                "registry.min_pattern_frequency must not be negative".into(),
            ));
        }
        if self.max_relationships_per_agent == 0 {
            return Err(AttributionError::InvalidConfig(
                "registry.max_relationships_per_agent must be positive".into(),
            ));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(AttributionError::InvalidConfig(
                "registry.cleanup_interval_secs must be positive".into(),
            ));
        }
        check_secs("registry.cleanup_interval_secs", self.cleanup_interval_secs)?;
        check_secs("registry.lifecycle_retention_secs", self.lifecycle_retention_secs)?;
        check_secs("registry.history_retention_secs", self.history_retention_secs)?;
        Ok(())
    }
}

/// Result of a successful verification
#[derive(Debug, Clone)]
pub struct VerifiedAttribution {
    pub previous: AttributionResult,
    pub revised: AttributionResult,
    pub signal: Signal,
    pub context: DetectionContext,
}

/// What a verification did
#[derive(Debug, Clone)]
pub enum Verification {
    /// The signal was resolved and learning updated
    Applied(VerifiedAttribution),
    /// An earlier verification already resolved the signal; carries the
    /// latest version
    AlreadyResolved(AttributionResult),
    /// Unknown or expired signal
    NotApplied,
}

/// What a registry cleanup pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCleanup {
    pub pruned_frequencies: usize,
    pub removed_patterns: usize,
    pub expired_signals: usize,
    pub dropped_lifecycles: usize,
}

/// Serializable view of the whole registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub taken_at: DateTime<Utc>,
    pub patterns: Vec<SignalPattern>,
    pub relationships: BTreeMap<AgentId, Vec<AgentSignalRelationship>>,
    pub lifecycles: Vec<SignalLifecycle>,
    pub history_versions: usize,
}

#[derive(Default)]
struct RegistryState {
    patterns: BTreeMap<String, SignalPattern>,
    relationships: HashMap<AgentId, RelationshipLog>,
    lifecycles: HashMap<SignalId, SignalLifecycle>,
    history: HashMap<SignalId, Vec<AttributionResult>>,
}

impl RegistryState {
    fn learn(
        &mut self,
        agent_id: &AgentId,
        observation: &PatternObservation,
        learning_rate: f64,
        now: DateTime<Utc>,
    ) -> f64 {
        self.patterns
            .entry(observation.signal_code.clone())
            .or_insert_with(|| SignalPattern::new(&observation.signal_code, now))
            .learn(agent_id, observation.frequency, learning_rate, now)
    }

    /// Count an attribution and learn the running count as the observation
    fn reinforce(
        &mut self,
        agent_id: &AgentId,
        signal_code: &str,
        learning_rate: f64,
        now: DateTime<Utc>,
    ) -> f64 {
        let pattern = self
            .patterns
            .entry(signal_code.to_string())
            .or_insert_with(|| SignalPattern::new(signal_code, now));
        let count = pattern.observe(agent_id);
        pattern.learn(agent_id, count as f64, learning_rate, now)
    }

    fn upsert_relationship(&mut self, relationship: AgentSignalRelationship, capacity: usize) {
        let log = self
            .relationships
            .entry(relationship.agent_id.clone())
            .or_insert_with(|| RelationshipLog::new(capacity));
        if let Some(evicted) = log.upsert(relationship) {
            debug!(
                agent_id = %evicted.agent_id,
                signal_id = %evicted.signal_id,
                "Relationship log full, evicted oldest entry"
            );
        }
    }
}

/// Single-writer store of everything learned about signals
pub struct SignalRegistry {
    config: RegistryConfig,
    state: RwLock<RegistryState>,
}

impl SignalRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            state: RwLock::new(RegistryState::default()),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Exponentially update learned frequencies for an agent
    pub async fn learn_signal_patterns(
        &self,
        agent_id: &AgentId,
        observations: &[PatternObservation],
    ) {
        let now = Utc::now();
        let mut state = self.state.write().await;
        for observation in observations {
            let frequency = state.learn(agent_id, observation, self.config.learning_rate, now);
            debug!(
                agent_id = %agent_id,
                signal_code = %observation.signal_code,
                frequency,
                "Learned signal pattern"
            );
        }
    }

    /// Agent with the highest learned frequency for a code
    pub async fn top_agent_for_code(&self, signal_code: &str) -> Option<(AgentId, f64)> {
        let state = self.state.read().await;
        state
            .patterns
            .get(signal_code)
            .and_then(|p| p.top_agent())
            .map(|(agent, frequency)| (agent.clone(), frequency))
    }

    /// Learned patterns for one agent, ordered by signal code
    pub async fn get_signal_patterns(&self, agent_id: &AgentId) -> Vec<PatternSummary> {
        let state = self.state.read().await;
        state
            .patterns
            .values()
            .filter_map(|p| p.summary_for(agent_id))
            .collect()
    }

    /// Persist an attribution and learn from it
    ///
    /// Starts the signal's lifecycle if needed, records every candidate in
    /// the attribution chain and appends the result to the history. When an
    /// agent was attributed, the lifecycle moves to `processed` and the
    /// agent's pattern and relationship are reinforced. Returns the result as
    /// stored, with its history version.
    pub async fn record_attribution(
        &self,
        signal: &Signal,
        context: &DetectionContext,
        candidates: &[Candidate],
        result: &AttributionResult,
    ) -> AttributionResult {
        let now = Utc::now();
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let lifecycle = state
            .lifecycles
            .entry(signal.id.clone())
            .or_insert_with(|| SignalLifecycle::new(signal.clone(), context.clone()));
        lifecycle.record_attempts(candidates, now);
        let stage = lifecycle.current_stage();

        if let Some(agent_id) = &result.attributed_agent_id {
            if stage < LifecycleStage::Attributed {
                let mut entry_context = BTreeMap::new();
                entry_context.insert("method".to_string(), result.method.to_string());
                entry_context.insert(
                    "conflict_resolution".to_string(),
                    result.conflict_resolution.as_str().to_string(),
                );
                let advanced = lifecycle
                    .advance(LifecycleStage::Attributed, now, Some(agent_id.clone()), entry_context)
                    .and_then(|_| {
                        lifecycle.advance(
                            LifecycleStage::Processed,
                            now,
                            Some(agent_id.clone()),
                            BTreeMap::new(),
                        )
                    });
                if let Err(e) = advanced {
                    warn!(signal_id = %signal.id, error = %e, "Lifecycle transition rejected");
                }
            } else {
                debug!(
                    signal_id = %signal.id,
                    stage = %stage,
                    "Signal re-attributed, lifecycle left in place"
                );
            }
        }

        let mut stored = result.clone();
        let versions = state.history.entry(signal.id.clone()).or_default();
        if let Some(last) = versions.last() {
            stored.version = last.version + 1;
        }
        versions.push(stored.clone());

        let Some(agent_id) = &result.attributed_agent_id else {
            debug!(signal_id = %signal.id, "Recorded unattributed signal");
            return stored;
        };

        let frequency = state.reinforce(agent_id, &signal.code, self.config.learning_rate, now);
        if let Some(pattern) = state.patterns.get_mut(&signal.code) {
            pattern.note_context(context);
        }

        state.upsert_relationship(
            AgentSignalRelationship::new(
                agent_id.clone(),
                signal.id.clone(),
                signal.code.clone(),
                result.ensemble_confidence,
                result.confidence,
                now,
            ),
            self.config.max_relationships_per_agent,
        );

        debug!(
            signal_id = %signal.id,
            agent_id = %agent_id,
            version = stored.version,
            frequency,
            "Recorded attribution"
        );
        stored
    }

    /// Apply external verification to the latest attribution of a signal
    ///
    /// Resolves the lifecycle, scores the relationship, appends a revised
    /// history version and adjusts learned frequencies. Nothing changes for
    /// an unknown, expired or already resolved signal.
    ///
    /// A verdict that contradicts the latest attribution (`is_correct` while
    /// naming a different agent, or the reverse) is `InvalidFeedback`.
    pub async fn verify_attribution(
        &self,
        signal_id: &SignalId,
        correct_agent_id: &AgentId,
        is_correct: bool,
    ) -> Result<Verification> {
        let now = Utc::now();
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let Some(previous) = state.history.get(signal_id).and_then(|v| v.last()).cloned() else {
            warn!(signal_id = %signal_id, "Verification for unknown signal ignored");
            return Ok(Verification::NotApplied);
        };
        let Some(lifecycle) = state.lifecycles.get_mut(signal_id) else {
            warn!(signal_id = %signal_id, "Verification for signal without lifecycle ignored");
            return Ok(Verification::NotApplied);
        };

        match lifecycle.current_stage() {
            LifecycleStage::Resolved => {
                debug!(signal_id = %signal_id, version = previous.version, "Signal already resolved");
                return Ok(Verification::AlreadyResolved(previous));
            }
            LifecycleStage::Expired => {
                warn!(signal_id = %signal_id, "Verification for expired signal ignored");
                return Ok(Verification::NotApplied);
            }
            _ => {}
        }

        let attributed = previous.attributed_agent_id.clone();
        let names_attributed = attributed.as_ref() == Some(correct_agent_id);
        if is_correct != names_attributed {
            let attributed_to = attributed.as_ref().map_or("nobody", |a| a.as_str());
            return Err(AttributionError::InvalidFeedback(format!(
                "signal {signal_id} is attributed to {attributed_to}; a {} verdict cannot name {correct_agent_id}",
                if is_correct { "correct" } else { "incorrect" }
            )));
        }

        let mut entry_context = BTreeMap::new();
        entry_context.insert("is_correct".to_string(), is_correct.to_string());
        lifecycle.advance(
            LifecycleStage::Resolved,
            now,
            Some(correct_agent_id.clone()),
            entry_context,
        )?;
        let signal = lifecycle.signal.clone();
        let context = lifecycle.context.clone();

        if let Some(agent) = &attributed
            && let Some(relationship) = state
                .relationships
                .get_mut(agent)
                .and_then(|log| log.find_mut(signal_id))
        {
            relationship.verify(is_correct, now);
        }

        let rate = self.config.learning_rate;
        if !is_correct {
            let mut relationship = AgentSignalRelationship::new(
                correct_agent_id.clone(),
                signal_id.clone(),
                signal.code.clone(),
                1.0,
                Confidence::High,
                now,
            );
            relationship.verify(true, now);
            state.upsert_relationship(relationship, self.config.max_relationships_per_agent);

            if let Some(wrong) = &attributed {
                state.learn(wrong, &PatternObservation::new(&signal.code, 0.0), rate, now);
            }
        }
        state.reinforce(correct_agent_id, &signal.code, rate, now);

        let revised = previous.revised(correct_agent_id.clone(), is_correct);
        state
            .history
            .entry(signal_id.clone())
            .or_default()
            .push(revised.clone());

        info!(
            signal_id = %signal_id,
            correct_agent = %correct_agent_id,
            is_correct,
            version = revised.version,
            "Attribution verified"
        );

        Ok(Verification::Applied(VerifiedAttribution {
            previous,
            revised,
            signal,
            context,
        }))
    }

    /// Move a signal's lifecycle forward
    ///
    /// `Ok(false)` means nothing changed: the signal is unknown or already in
    /// `stage`.
    pub async fn advance_lifecycle(
        &self,
        signal_id: &SignalId,
        stage: LifecycleStage,
        agent_id: Option<AgentId>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let Some(lifecycle) = state.lifecycles.get_mut(signal_id) else {
            warn!(signal_id = %signal_id, stage = %stage, "Lifecycle update for unknown signal ignored");
            return Ok(false);
        };
        lifecycle.advance(stage, Utc::now(), agent_id, BTreeMap::new())
    }

    /// Decay patterns, expire stale signals and drop old history
    pub async fn cleanup(&self, now: DateTime<Utc>) -> RegistryCleanup {
        let mut report = RegistryCleanup::default();
        let expire_before = now
            .checked_sub_signed(secs_to_delta(self.config.lifecycle_retention_secs))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let drop_before = now
            .checked_sub_signed(secs_to_delta(self.config.history_retention_secs))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut state = self.state.write().await;

        for pattern in state.patterns.values_mut() {
            report.pruned_frequencies +=
                pattern.decay(self.config.decay_factor, self.config.min_pattern_frequency);
        }
        let before = state.patterns.len();
        state.patterns.retain(|_, p| !p.is_empty());
        report.removed_patterns = before - state.patterns.len();

        for lifecycle in state.lifecycles.values_mut() {
            if lifecycle.current_stage() == LifecycleStage::Detected
                && lifecycle.signal.detected_at < expire_before
            {
                let mut entry_context = BTreeMap::new();
                entry_context.insert("reason".to_string(), "retention_elapsed".to_string());
                if let Ok(true) =
                    lifecycle.advance(LifecycleStage::Expired, now, None, entry_context)
                {
                    report.expired_signals += 1;
                }
            }
        }

        let stale: Vec<SignalId> = state
            .lifecycles
            .values()
            .filter(|lc| lc.current_stage().is_terminal() && lc.last_updated() < drop_before)
            .map(|lc| lc.signal_id().clone())
            .collect();
        for signal_id in &stale {
            state.lifecycles.remove(signal_id);
            state.history.remove(signal_id);
        }
        report.dropped_lifecycles = stale.len();

        info!(
            pruned = report.pruned_frequencies,
            removed_patterns = report.removed_patterns,
            expired = report.expired_signals,
            dropped = report.dropped_lifecycles,
            "Registry cleanup complete"
        );
        report
    }

    pub async fn latest_attribution(&self, signal_id: &SignalId) -> Option<AttributionResult> {
        let state = self.state.read().await;
        state.history.get(signal_id).and_then(|v| v.last()).cloned()
    }

    /// Every recorded version, oldest first
    pub async fn attribution_history(&self, signal_id: &SignalId) -> Vec<AttributionResult> {
        let state = self.state.read().await;
        state.history.get(signal_id).cloned().unwrap_or_default()
    }

    pub async fn signal_lifecycle(&self, signal_id: &SignalId) -> Option<SignalLifecycle> {
        let state = self.state.read().await;
        state.lifecycles.get(signal_id).cloned()
    }

    /// Relationships for an agent, oldest first
    pub async fn agent_relationships(&self, agent_id: &AgentId) -> Vec<AgentSignalRelationship> {
        let state = self.state.read().await;
        state
            .relationships
            .get(agent_id)
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn snapshot(&self) -> RegistrySnapshot {
        let state = self.state.read().await;
        let mut lifecycles: Vec<SignalLifecycle> = state.lifecycles.values().cloned().collect();
        lifecycles.sort_by(|a, b| a.signal_id().cmp(b.signal_id()));

        RegistrySnapshot {
            taken_at: Utc::now(),
            patterns: state.patterns.values().cloned().collect(),
            relationships: state
                .relationships
                .iter()
                .map(|(agent, log)| (agent.clone(), log.iter().cloned().collect()))
                .collect(),
            lifecycles,
            history_versions: state.history.values().map(Vec::len).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::StrategyKind;
    use crate::types::ConflictResolution;

    fn signal(id: &str) -> Signal {
        Signal::new(id, "gg", Utc::now(), "[gg] done")
    }

    fn attributed(signal_id: &str, agent: &str) -> (Vec<Candidate>, AttributionResult) {
        let candidate = Candidate::new(StrategyKind::Temporal, agent, Confidence::High, "close");
        let mut result = AttributionResult::unknown(SignalId::from(signal_id));
        result.attributed_agent_id = Some(AgentId::from(agent));
        result.confidence = Confidence::High;
        result.ensemble_confidence = 1.0;
        result.conflict_resolution = ConflictResolution::SingleStrategy;
        (vec![candidate], result)
    }

    async fn record(registry: &SignalRegistry, signal_id: &str, agent: &str) {
        let (candidates, result) = attributed(signal_id, agent);
        registry
            .record_attribution(&signal(signal_id), &DetectionContext::default(), &candidates, &result)
            .await;
    }

    #[tokio::test]
    async fn test_learning_twice_converges_without_overshoot() {
        let registry = SignalRegistry::new(RegistryConfig::default());
        let agent = AgentId::from("agentA");
        let obs = [PatternObservation::new("gg", 8.0)];

        registry.learn_signal_patterns(&agent, &obs).await;
        let first = registry.get_signal_patterns(&agent).await[0].frequency;
        registry.learn_signal_patterns(&agent, &obs).await;
        let second = registry.get_signal_patterns(&agent).await[0].frequency;

        assert!((first - 0.8).abs() < 1e-9);
        assert!(second > first);
        assert!(second < 8.0);
    }

    #[tokio::test]
    async fn test_record_attribution_walks_lifecycle() {
        let registry = SignalRegistry::new(RegistryConfig::default());
        record(&registry, "s-1", "agentA").await;

        let lifecycle = registry.signal_lifecycle(&SignalId::from("s-1")).await.unwrap();
        let stages: Vec<_> = lifecycle.entries().iter().map(|e| e.stage).collect();
        assert_eq!(
            stages,
            vec![
                LifecycleStage::Detected,
                LifecycleStage::Attributed,
                LifecycleStage::Processed
            ]
        );
        assert_eq!(lifecycle.attribution_chain.len(), 1);

        let rels = registry.agent_relationships(&AgentId::from("agentA")).await;
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].signal_code, "gg");
    }

    #[tokio::test]
    async fn test_unattributed_signal_stays_detected() {
        let registry = SignalRegistry::new(RegistryConfig::default());
        let result = AttributionResult::unknown(SignalId::from("s-1"));
        registry
            .record_attribution(&signal("s-1"), &DetectionContext::default(), &[], &result)
            .await;

        let lifecycle = registry.signal_lifecycle(&SignalId::from("s-1")).await.unwrap();
        assert_eq!(lifecycle.current_stage(), LifecycleStage::Detected);
        assert_eq!(registry.attribution_history(&SignalId::from("s-1")).await.len(), 1);
    }

    #[tokio::test]
    async fn test_relationships_bounded_per_agent() {
        let registry = SignalRegistry::new(RegistryConfig {
            max_relationships_per_agent: 5,
            ..Default::default()
        });
        for i in 0..8 {
            record(&registry, &format!("s-{i}"), "agentA").await;
        }

        let rels = registry.agent_relationships(&AgentId::from("agentA")).await;
        assert_eq!(rels.len(), 5);
        assert_eq!(rels[0].signal_id, SignalId::from("s-3"));
    }

    #[tokio::test]
    async fn test_incorrect_verification_scores_zero() {
        let registry = SignalRegistry::new(RegistryConfig::default());
        record(&registry, "s-1", "agentA").await;

        let Verification::Applied(verified) = registry
            .verify_attribution(&SignalId::from("s-1"), &AgentId::from("agentB"), false)
            .await
            .unwrap()
        else {
            panic!("verification should apply");
        };

        assert_eq!(verified.revised.version, 2);
        let rel = &registry.agent_relationships(&AgentId::from("agentA")).await[0];
        assert_eq!(rel.verification.accuracy_score, Some(0.0));
        let corrected = &registry.agent_relationships(&AgentId::from("agentB")).await[0];
        assert_eq!(corrected.verification.accuracy_score, Some(1.0));

        let lifecycle = registry.signal_lifecycle(&SignalId::from("s-1")).await.unwrap();
        assert_eq!(lifecycle.current_stage(), LifecycleStage::Resolved);

        let history = registry.attribution_history(&SignalId::from("s-1")).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].attributed_agent_id, Some(AgentId::from("agentB")));
    }

    #[tokio::test]
    async fn test_verify_unknown_signal_is_noop() {
        let registry = SignalRegistry::new(RegistryConfig::default());
        let outcome = registry
            .verify_attribution(&SignalId::from("ghost"), &AgentId::from("agentA"), true)
            .await
            .unwrap();
        assert!(matches!(outcome, Verification::NotApplied));
        assert!(registry.snapshot().await.lifecycles.is_empty());
    }

    #[tokio::test]
    async fn test_expired_signal_is_not_verified() {
        let registry = SignalRegistry::new(RegistryConfig::default());
        let result = AttributionResult::unknown(SignalId::from("s-1"));
        registry
            .record_attribution(&signal("s-1"), &DetectionContext::default(), &[], &result)
            .await;
        registry.cleanup(Utc::now() + TimeDelta::seconds(7200)).await;

        let outcome = registry
            .verify_attribution(&SignalId::from("s-1"), &AgentId::from("agentA"), false)
            .await
            .unwrap();

        assert!(matches!(outcome, Verification::NotApplied));
        let lifecycle = registry.signal_lifecycle(&SignalId::from("s-1")).await.unwrap();
        assert_eq!(lifecycle.current_stage(), LifecycleStage::Expired);
        assert_eq!(registry.attribution_history(&SignalId::from("s-1")).await.len(), 1);
        assert!(registry.get_signal_patterns(&AgentId::from("agentA")).await.is_empty());
    }

    #[tokio::test]
    async fn test_second_verification_changes_nothing() {
        let registry = SignalRegistry::new(RegistryConfig::default());
        record(&registry, "s-1", "agentA").await;
        let agent = AgentId::from("agentA");

        let first = registry
            .verify_attribution(&SignalId::from("s-1"), &agent, true)
            .await
            .unwrap();
        assert!(matches!(first, Verification::Applied(_)));
        let frequency = registry.get_signal_patterns(&agent).await[0].frequency;

        let second = registry
            .verify_attribution(&SignalId::from("s-1"), &agent, true)
            .await
            .unwrap();

        let Verification::AlreadyResolved(latest) = second else {
            panic!("second verification should report the existing resolution");
        };
        assert_eq!(latest.version, 2);
        assert_eq!(registry.attribution_history(&SignalId::from("s-1")).await.len(), 2);
        assert_eq!(registry.get_signal_patterns(&agent).await[0].frequency, frequency);
        let lifecycle = registry.signal_lifecycle(&SignalId::from("s-1")).await.unwrap();
        let resolved = lifecycle
            .entries()
            .iter()
            .filter(|e| e.stage == LifecycleStage::Resolved)
            .count();
        assert_eq!(resolved, 1);
    }

    #[tokio::test]
    async fn test_contradictory_verdict_rejected() {
        let registry = SignalRegistry::new(RegistryConfig::default());
        record(&registry, "s-1", "agentA").await;

        let correct_but_other = registry
            .verify_attribution(&SignalId::from("s-1"), &AgentId::from("agentB"), true)
            .await;
        assert!(matches!(correct_but_other, Err(AttributionError::InvalidFeedback(_))));

        let incorrect_but_same = registry
            .verify_attribution(&SignalId::from("s-1"), &AgentId::from("agentA"), false)
            .await;
        assert!(matches!(incorrect_but_same, Err(AttributionError::InvalidFeedback(_))));

        let rel = &registry.agent_relationships(&AgentId::from("agentA")).await[0];
        assert_eq!(rel.verification.accuracy_score, None);
        assert!(registry.agent_relationships(&AgentId::from("agentB")).await.is_empty());
        let lifecycle = registry.signal_lifecycle(&SignalId::from("s-1")).await.unwrap();
        assert_eq!(lifecycle.current_stage(), LifecycleStage::Processed);
    }

    #[tokio::test]
    async fn test_cleanup_decays_and_prunes() {
        let registry = SignalRegistry::new(RegistryConfig {
            learning_rate: 1.0,
            ..Default::default()
        });
        let agent = AgentId::from("agentA");
        registry
            .learn_signal_patterns(
                &agent,
                &[PatternObservation::new("gg", 3.1), PatternObservation::new("bb", 20.0)],
            )
            .await;

        let report = registry.cleanup(Utc::now()).await;

        assert_eq!(report.pruned_frequencies, 1);
        assert_eq!(report.removed_patterns, 1);
        let patterns = registry.get_signal_patterns(&agent).await;
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].signal_code, "bb");
        assert!((patterns[0].frequency - 19.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cleanup_expires_stale_detected_signals() {
        let registry = SignalRegistry::new(RegistryConfig::default());
        let result = AttributionResult::unknown(SignalId::from("s-1"));
        registry
            .record_attribution(&signal("s-1"), &DetectionContext::default(), &[], &result)
            .await;

        let later = Utc::now() + TimeDelta::seconds(7200);
        let report = registry.cleanup(later).await;
        assert_eq!(report.expired_signals, 1);
        let lifecycle = registry.signal_lifecycle(&SignalId::from("s-1")).await.unwrap();
        assert_eq!(lifecycle.current_stage(), LifecycleStage::Expired);

        let much_later = later + TimeDelta::seconds(90_000);
        let report = registry.cleanup(much_later).await;
        assert_eq!(report.dropped_lifecycles, 1);
        assert!(registry.signal_lifecycle(&SignalId::from("s-1")).await.is_none());
    }

    #[tokio::test]
    async fn test_backward_lifecycle_move_rejected() {
        let registry = SignalRegistry::new(RegistryConfig::default());
        record(&registry, "s-1", "agentA").await;

        let result = registry
            .advance_lifecycle(&SignalId::from("s-1"), LifecycleStage::Detected, None)
            .await;

        assert!(matches!(result, Err(AttributionError::Lifecycle(_))));
    }

    #[tokio::test]
    async fn test_snapshot_serializes() {
        let registry = SignalRegistry::new(RegistryConfig::default());
        record(&registry, "s-1", "agentA").await;

        let snapshot = registry.snapshot().await;
        let json = serde_json::to_value(&snapshot).unwrap();

        assert_eq!(json["lifecycles"][0]["signal"]["id"], "s-1");
        assert!(json["relationships"]["agentA"].is_array());
        assert_eq!(snapshot.history_versions, 1);
    }

    #[test]
    fn test_config_validation() {
        assert!(RegistryConfig::default().validate().is_ok());
        let bad = RegistryConfig {
            decay_factor: 1.5,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(AttributionError::InvalidConfig(_))));
    }
}
