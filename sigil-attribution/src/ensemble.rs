//! Ensemble aggregation
//!
//! Fuses the candidates proposed by individual strategies into a single
//! attribution. The same candidates in the same order always produce the
//! same result.
//!
//! ## Rules
//!
//! - No candidates: `UNKNOWN`, `no_results`, ensemble confidence 0
//! - One candidate: passed through as-is, `single_strategy`
//! - Two or more: votes grouped per agent and scored by the configured
//!   [`VotingMethod`]; ties go to the agent that received a vote first.
//!   Agreement at or above `minimum_agreement` is `consensus`, otherwise
//!   `plurality`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::strategy::StrategyKind;
use crate::types::{
    AgentId, AttributionMethod, AttributionResult, Candidate, Confidence, ConfidenceThresholds,
    ConflictResolution, Evidence, SignalId, StrategyVote,
};

/// How per-agent votes are scored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VotingMethod {
    /// Raw vote count
    Majority,
    /// Sum of strategy weights
    Weighted,
    /// Sum of strategy weights times mean numeric confidence
    #[default]
    ConfidenceWeighted,
}

/// Weight of each strategy's vote
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyWeights {
    pub temporal: f64,
    pub contextual: f64,
    pub pattern_match: f64,
    pub signature: f64,
    pub model: f64,
}

impl Default for StrategyWeights {
    fn default() -> Self {
        Self {
            temporal: 0.2,
            contextual: 0.3,
            pattern_match: 0.25,
            signature: 0.15,
            model: 0.1,
        }
    }
}

impl StrategyWeights {
    pub fn weight_for(&self, kind: StrategyKind) -> f64 {
        match kind {
            StrategyKind::Temporal => self.temporal,
            StrategyKind::Contextual => self.contextual,
            StrategyKind::PatternMatch => self.pattern_match,
            StrategyKind::Signature => self.signature,
            StrategyKind::Model => self.model,
        }
    }
}

/// Configuration for the ensemble
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub voting_method: VotingMethod,
    /// Agreement ratio needed to call the decision a consensus (default: 0.6)
    pub minimum_agreement: f64,
    pub weights: StrategyWeights,
    pub thresholds: ConfidenceThresholds,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            voting_method: VotingMethod::default(),
            minimum_agreement: 0.6,
            weights: StrategyWeights::default(),
            thresholds: ConfidenceThresholds::default(),
        }
    }
}

/// Per-agent vote tally
#[derive(Debug, Clone)]
struct AgentTally {
    agent_id: AgentId,
    vote_count: u32,
    total_weight: f64,
    confidences: Vec<f64>,
}

impl AgentTally {
    fn new(agent_id: AgentId) -> Self {
        Self {
            agent_id,
            vote_count: 0,
            total_weight: 0.0,
            confidences: Vec::new(),
        }
    }

    fn mean_confidence(&self) -> f64 {
        if self.confidences.is_empty() {
            return 0.0;
        }
        self.confidences.iter().sum::<f64>() / self.confidences.len() as f64
    }

    fn score(&self, method: VotingMethod) -> f64 {
        match method {
            VotingMethod::Majority => self.vote_count as f64,
            VotingMethod::Weighted => self.total_weight,
            VotingMethod::ConfidenceWeighted => self.total_weight * self.mean_confidence(),
        }
    }
}

/// Fuses strategy candidates into one attribution
pub struct EnsembleAggregator {
    config: EnsembleConfig,
}

impl EnsembleAggregator {
    /// Create with default configuration
    pub fn new() -> Self {
        Self {
            config: EnsembleConfig::default(),
        }
    }

    /// Create with custom configuration
    pub fn with_config(config: EnsembleConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    /// Aggregate candidates for a signal
    ///
    /// `candidates` must be in strategy evaluation order.
    pub fn aggregate(&self, signal_id: &SignalId, candidates: &[Candidate]) -> AttributionResult {
        let mut result = AttributionResult::unknown(signal_id.clone());
        result.votes = candidates
            .iter()
            .map(|c| StrategyVote {
                strategy: c.strategy,
                agent_id: c.agent_id.clone(),
                confidence: c.confidence,
            })
            .collect();

        match candidates {
            [] => result,
            [only] => {
                result.attributed_agent_id = Some(only.agent_id.clone());
                result.confidence = only.confidence;
                result.evidence = only.evidence.clone();
                result.method = AttributionMethod::Strategy(only.strategy);
                result.ensemble_confidence = only.confidence.as_score();
                result.conflict_resolution = ConflictResolution::SingleStrategy;
                result.agreement_ratio = 1.0;
                result
            }
            _ => self.vote(result, candidates),
        }
    }

    fn vote(&self, mut result: AttributionResult, candidates: &[Candidate]) -> AttributionResult {
        let tallies = self.tally(candidates);
        let method = self.config.voting_method;

        // Strictly-greater keeps the earliest agent on ties
        let mut winner = &tallies[0];
        for tally in &tallies[1..] {
            if tally.score(method) > winner.score(method) {
                winner = tally;
            }
        }

        let total_votes = candidates.len() as f64;
        let agreement_ratio = winner.vote_count as f64 / total_votes;
        let ensemble_confidence = (winner.mean_confidence() * agreement_ratio).clamp(0.0, 1.0);

        let evidence: Vec<Evidence> = candidates
            .iter()
            .filter(|c| c.agent_id == winner.agent_id)
            .flat_map(|c| c.evidence.iter().cloned())
            .collect();

        debug!(
            signal_id = %result.signal_id,
            winner = %winner.agent_id,
            score = winner.score(method),
            agents = tallies.len(),
            agreement_ratio,
            "Ensemble vote complete"
        );

        result.attributed_agent_id = Some(winner.agent_id.clone());
        result.confidence = Confidence::from_score(ensemble_confidence, &self.config.thresholds);
        result.evidence = evidence;
        result.method = AttributionMethod::Ensemble;
        result.ensemble_confidence = ensemble_confidence;
        result.agreement_ratio = agreement_ratio;
        result.conflict_resolution = if agreement_ratio >= self.config.minimum_agreement {
            ConflictResolution::Consensus
        } else {
            ConflictResolution::Plurality
        };
        result
    }

    /// Group votes per agent in first-vote order
    fn tally(&self, candidates: &[Candidate]) -> Vec<AgentTally> {
        let mut tallies: Vec<AgentTally> = Vec::new();
        for candidate in candidates {
            let idx = match tallies.iter().position(|t| t.agent_id == candidate.agent_id) {
                Some(idx) => idx,
                None => {
                    tallies.push(AgentTally::new(candidate.agent_id.clone()));
                    tallies.len() - 1
                }
            };
            let tally = &mut tallies[idx];
            tally.vote_count += 1;
            tally.total_weight += self.config.weights.weight_for(candidate.strategy);
            tally.confidences.push(candidate.confidence.as_score());
        }
        tallies
    }
}

impl Default for EnsembleAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(strategy: StrategyKind, agent: &str, confidence: Confidence) -> Candidate {
        Candidate::new(strategy, agent, confidence, "test").with_evidence(format!("{strategy}"))
    }

    fn signal() -> SignalId {
        SignalId::from("s-1")
    }

    #[test]
    fn test_no_candidates_is_unknown() {
        let result = EnsembleAggregator::new().aggregate(&signal(), &[]);

        assert!(result.attributed_agent_id.is_none());
        assert_eq!(result.confidence, Confidence::Unknown);
        assert_eq!(result.conflict_resolution, ConflictResolution::NoResults);
        assert_eq!(result.ensemble_confidence, 0.0);
    }

    #[test]
    fn test_single_candidate_passes_through() {
        let only = candidate(StrategyKind::Temporal, "agentA", Confidence::Medium);
        let result = EnsembleAggregator::new().aggregate(&signal(), std::slice::from_ref(&only));

        assert_eq!(result.attributed_agent_id, Some(AgentId::from("agentA")));
        assert_eq!(result.confidence, Confidence::Medium);
        assert_eq!(result.method, AttributionMethod::Strategy(StrategyKind::Temporal));
        assert_eq!(result.conflict_resolution, ConflictResolution::SingleStrategy);
        assert_eq!(result.evidence, only.evidence);
        assert!((result.ensemble_confidence - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn test_confidence_weighted_majority_wins() {
        let candidates = vec![
            candidate(StrategyKind::Contextual, "agentX", Confidence::High),
            candidate(StrategyKind::Signature, "agentX", Confidence::High),
            candidate(StrategyKind::Temporal, "agentY", Confidence::Medium),
        ];

        let result = EnsembleAggregator::new().aggregate(&signal(), &candidates);

        assert_eq!(result.attributed_agent_id, Some(AgentId::from("agentX")));
        assert!((result.agreement_ratio - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(result.conflict_resolution, ConflictResolution::Consensus);
        assert_eq!(result.method, AttributionMethod::Ensemble);
        assert_eq!(result.votes.len(), 3);
        // Only the winner's evidence is kept
        assert_eq!(result.evidence.len(), 2);
    }

    #[test]
    fn test_unanimous_vote_is_full_consensus() {
        let candidates = vec![
            candidate(StrategyKind::Temporal, "agentA", Confidence::High),
            candidate(StrategyKind::Contextual, "agentA", Confidence::High),
            candidate(StrategyKind::PatternMatch, "agentA", Confidence::Medium),
        ];

        let result = EnsembleAggregator::new().aggregate(&signal(), &candidates);

        assert_eq!(result.conflict_resolution, ConflictResolution::Consensus);
        assert_eq!(result.agreement_ratio, 1.0);
        assert!(result.ensemble_confidence <= 1.0);
        assert_eq!(result.confidence, Confidence::High);
    }

    #[test]
    fn test_split_vote_is_plurality() {
        let candidates = vec![
            candidate(StrategyKind::Temporal, "agentA", Confidence::High),
            candidate(StrategyKind::Contextual, "agentB", Confidence::High),
            candidate(StrategyKind::Signature, "agentC", Confidence::High),
        ];

        let result = EnsembleAggregator::new().aggregate(&signal(), &candidates);

        // Contextual carries the heaviest weight
        assert_eq!(result.attributed_agent_id, Some(AgentId::from("agentB")));
        assert_eq!(result.conflict_resolution, ConflictResolution::Plurality);
        assert!(result.ensemble_confidence < 0.4);
        assert_eq!(result.confidence, Confidence::Unknown);
    }

    #[test]
    fn test_majority_tie_goes_to_first_voter() {
        let aggregator = EnsembleAggregator::with_config(EnsembleConfig {
            voting_method: VotingMethod::Majority,
            ..Default::default()
        });
        let candidates = vec![
            candidate(StrategyKind::Signature, "agentB", Confidence::Low),
            candidate(StrategyKind::Contextual, "agentA", Confidence::High),
        ];

        let result = aggregator.aggregate(&signal(), &candidates);

        assert_eq!(result.attributed_agent_id, Some(AgentId::from("agentB")));
        assert_eq!(result.conflict_resolution, ConflictResolution::Plurality);
    }

    #[test]
    fn test_weighted_ignores_confidence() {
        let aggregator = EnsembleAggregator::with_config(EnsembleConfig {
            voting_method: VotingMethod::Weighted,
            ..Default::default()
        });
        let candidates = vec![
            candidate(StrategyKind::Signature, "agentB", Confidence::High),
            candidate(StrategyKind::Contextual, "agentA", Confidence::Low),
        ];

        let result = aggregator.aggregate(&signal(), &candidates);

        assert_eq!(result.attributed_agent_id, Some(AgentId::from("agentA")));
    }

    #[test]
    fn test_same_input_same_output() {
        let candidates = vec![
            candidate(StrategyKind::Temporal, "agentA", Confidence::Medium),
            candidate(StrategyKind::PatternMatch, "agentB", Confidence::Medium),
            candidate(StrategyKind::Model, "agentA", Confidence::Low),
        ];
        let aggregator = EnsembleAggregator::new();

        let first = aggregator.aggregate(&signal(), &candidates);
        let second = aggregator.aggregate(&signal(), &candidates);

        assert_eq!(first.attributed_agent_id, second.attributed_agent_id);
        assert_eq!(first.ensemble_confidence, second.ensemble_confidence);
        assert_eq!(first.conflict_resolution, second.conflict_resolution);
    }

    #[test]
    fn test_ensemble_confidence_stays_in_unit_range() {
        let aggregator = EnsembleAggregator::new();
        let all = [Confidence::High, Confidence::Medium, Confidence::Low, Confidence::Unknown];
        for a in all {
            for b in all {
                let candidates = vec![
                    candidate(StrategyKind::Temporal, "agentA", a),
                    candidate(StrategyKind::Contextual, "agentA", b),
                ];
                let result = aggregator.aggregate(&signal(), &candidates);
                assert!((0.0..=1.0).contains(&result.ensemble_confidence));
            }
        }
    }
}
