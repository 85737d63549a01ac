//! Attribution engine
//!
//! The public entry point. Wires the strategies, ensemble, registry, bridge
//! and feedback loop together:
//!
//! 1. Validate the signal (the only failure that propagates)
//! 2. Serve the latest result if the signal's correlations are cached
//! 3. Fetch recent activity, degrading to none if the store fails
//! 4. Fold that activity into the bridge sessions
//! 5. Fan the strategies out and wait for all of them, each under a timeout
//! 6. Aggregate, then persist to the registry and cache the correlations
//!
//! Apart from session bookkeeping, nothing is written until aggregation
//! finishes, so dropping an in-flight call leaves no partial attribution
//! behind.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::bridge::{AgentBridge, AgentSession, BridgeCleanup};
use crate::collaborators::{ActivityStore, AgentDirectory};
use crate::config::AttributionConfig;
use crate::ensemble::EnsembleAggregator;
use crate::error::Result;
use crate::feedback::{FeedbackLoop, FeedbackOutcome, Verdict};
use crate::metrics::{AttemptRecord, AttributionMetrics, MetricsRecorder};
use crate::registry::{PatternSummary, RegistryCleanup, SignalRegistry};
use crate::strategy::{
    AttributionModel, CorrelationStrategy, StrategyInput, StrategyOutcome, StrategyRun,
    run_strategy,
};
use crate::types::{
    AgentActivity, AgentId, AttributionMetadata, AttributionResult, Candidate, Degradation,
    DetectionContext, Signal, SignalId,
};

/// Multi-strategy signal attribution service
pub struct AttributionEngine {
    config: AttributionConfig,
    registry: Arc<SignalRegistry>,
    bridge: Arc<AgentBridge>,
    activity_store: Arc<dyn ActivityStore>,
    directory: Arc<dyn AgentDirectory>,
    strategies: Vec<Arc<dyn CorrelationStrategy>>,
    aggregator: EnsembleAggregator,
    feedback: FeedbackLoop,
    metrics: MetricsRecorder,
}

impl AttributionEngine {
    /// Create an engine over shared registry and bridge instances
    ///
    /// Fails if the configuration does not validate.
    pub fn new(
        config: AttributionConfig,
        registry: Arc<SignalRegistry>,
        bridge: Arc<AgentBridge>,
        activity_store: Arc<dyn ActivityStore>,
        directory: Arc<dyn AgentDirectory>,
    ) -> Result<Self> {
        config.validate()?;
        let strategies = config
            .strategies
            .build(registry.clone(), None, &config.ensemble.thresholds)?;
        let aggregator = EnsembleAggregator::with_config(config.ensemble.clone());
        let feedback = FeedbackLoop::new(config.feedback.clone(), registry.clone());

        info!(
            strategies = strategies.len(),
            voting_method = ?config.ensemble.voting_method,
            "Attribution engine ready"
        );

        Ok(Self {
            config,
            registry,
            bridge,
            activity_store,
            directory,
            strategies,
            aggregator,
            feedback,
            metrics: MetricsRecorder::new(),
        })
    }

    /// Create an engine with its own registry and bridge
    pub fn standalone(
        config: AttributionConfig,
        activity_store: Arc<dyn ActivityStore>,
        directory: Arc<dyn AgentDirectory>,
    ) -> Result<Self> {
        let registry = Arc::new(SignalRegistry::new(config.registry.clone()));
        let bridge = Arc::new(AgentBridge::new(config.bridge.clone()));
        Self::new(config, registry, bridge, activity_store, directory)
    }

    /// Install a pluggable model for prediction and retraining
    ///
    /// Prediction only happens when `strategies.model.enabled` is set.
    pub fn with_model(mut self, model: Arc<dyn AttributionModel>) -> Result<Self> {
        self.strategies = self
            .config
            .strategies
            .build(
                self.registry.clone(),
                Some(model.clone()),
                &self.config.ensemble.thresholds,
            )?;
        self.feedback =
            FeedbackLoop::new(self.config.feedback.clone(), self.registry.clone()).with_model(model);
        Ok(self)
    }

    pub fn config(&self) -> &AttributionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SignalRegistry> {
        &self.registry
    }

    pub fn bridge(&self) -> &Arc<AgentBridge> {
        &self.bridge
    }

    /// Attribute a signal to the agent most likely responsible for it
    ///
    /// Only a malformed signal is an error. Every other problem degrades the
    /// result and is listed in `metadata.degradations`.
    pub async fn attribute_signal(
        &self,
        signal: Signal,
        context: DetectionContext,
    ) -> Result<AttributionResult> {
        signal.validate()?;
        let started = Instant::now();

        if self.bridge.has_cached(&signal.id).await
            && let Some(mut cached) = self.registry.latest_attribution(&signal.id).await
        {
            cached.metadata.cache_hit = true;
            self.metrics.record_cache_hit().await;
            debug!(signal_id = %signal.id, version = cached.version, "Served attribution from cache");
            return Ok(cached);
        }

        let mut metadata = AttributionMetadata::default();
        let activities = self.fetch_activities(&signal, &mut metadata).await;

        let sessions = self.bridge.absorb_activities(&activities).await;

        let input = Arc::new(
            StrategyInput::new(signal.clone(), context.clone(), activities).with_sessions(sessions),
        );
        let runs = self.run_strategies(input).await;

        let mut candidates: Vec<Candidate> = Vec::new();
        for run in &runs {
            match &run.outcome {
                StrategyOutcome::Proposed(candidate) => candidates.push(candidate.clone()),
                StrategyOutcome::Abstained => {}
                StrategyOutcome::Failed(_) => metadata.degrade(Degradation::StrategyFailed(run.kind)),
                StrategyOutcome::TimedOut => {
                    metadata.degrade(Degradation::StrategyTimedOut(run.kind))
                }
            }
        }
        if candidates.is_empty() {
            metadata.degrade(Degradation::NoCandidates);
        }

        let mut result = self.aggregator.aggregate(&signal.id, &candidates);
        if let Some(agent_id) = &result.attributed_agent_id {
            metadata.agent_type = Some(self.directory.get_agent_type(agent_id).await);
        }
        let latency = started.elapsed();
        metadata.latency_ms = latency.as_millis() as u64;
        result.metadata = metadata;

        let stored = self
            .registry
            .record_attribution(&signal, &context, &candidates, &result)
            .await;
        self.bridge
            .cache_correlations(&signal.id, &candidates, Utc::now())
            .await;
        self.metrics
            .record_attempt(AttemptRecord {
                runs: &runs,
                winner: stored.attributed_agent_id.as_ref(),
                degraded: stored.metadata.fallback_attribution,
                latency,
            })
            .await;

        info!(
            signal_id = %signal.id,
            agent_id = ?stored.attributed_agent_id.as_ref().map(|a| a.as_str()),
            confidence = %stored.confidence,
            method = %stored.method,
            conflict_resolution = stored.conflict_resolution.as_str(),
            ensemble_confidence = stored.ensemble_confidence,
            fallback = stored.metadata.fallback_attribution,
            "Signal attributed"
        );

        Ok(stored)
    }

    async fn fetch_activities(
        &self,
        signal: &Signal,
        metadata: &mut AttributionMetadata,
    ) -> Vec<AgentActivity> {
        let lookback = self.config.activity_lookback();
        let since = signal
            .detected_at
            .checked_sub_signed(lookback)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let window = lookback.checked_mul(2).unwrap_or(TimeDelta::MAX);
        match self
            .activity_store
            .get_recent_activities(since, window)
            .await
        {
            Ok(activities) => activities,
            Err(e) => {
                warn!(
                    signal_id = %signal.id,
                    error = %e,
                    "Activity store unavailable, attributing without activity"
                );
                metadata.degrade(Degradation::ActivityStoreUnavailable);
                Vec::new()
            }
        }
    }

    /// Run every strategy concurrently, returning runs in registration order
    async fn run_strategies(&self, input: Arc<StrategyInput>) -> Vec<StrategyRun> {
        let timeout = self.config.strategies.timeout();
        let mut set = JoinSet::new();

        for (idx, strategy) in self.strategies.iter().enumerate() {
            let strategy = Arc::clone(strategy);
            let input = Arc::clone(&input);
            set.spawn(async move { (idx, run_strategy(strategy.as_ref(), &input, timeout).await) });
        }

        let mut slots: Vec<Option<StrategyRun>> = vec![None; self.strategies.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, run)) => slots[idx] = Some(run),
                Err(e) => error!(error = %e, "Strategy task aborted"),
            }
        }

        slots
            .into_iter()
            .zip(&self.strategies)
            .map(|(slot, strategy)| {
                slot.unwrap_or_else(|| StrategyRun {
                    kind: strategy.kind(),
                    outcome: StrategyOutcome::Failed("strategy task aborted".into()),
                    elapsed: Duration::ZERO,
                })
            })
            .collect()
    }

    /// Apply an externally verified attribution
    pub async fn provide_attribution_feedback(
        &self,
        signal_id: &SignalId,
        correct_agent_id: &AgentId,
        verdict: Verdict,
    ) -> Result<FeedbackOutcome> {
        let outcome = self
            .feedback
            .provide_feedback(signal_id, correct_agent_id, verdict)
            .await?;
        if outcome.applied {
            self.metrics.record_feedback(verdict.is_correct()).await;
        }
        Ok(outcome)
    }

    pub async fn get_metrics(&self) -> AttributionMetrics {
        self.metrics.snapshot().await
    }

    pub async fn get_signal_patterns(&self, agent_id: &AgentId) -> Vec<PatternSummary> {
        self.registry.get_signal_patterns(agent_id).await
    }

    /// Feed an activity into the agent's session
    pub async fn observe_activity(&self, activity: &AgentActivity) -> AgentSession {
        self.bridge.observe_activity(activity).await
    }

    pub async fn active_sessions(&self) -> Vec<AgentSession> {
        self.bridge.active_sessions().await
    }

    pub async fn cleanup_bridge(&self, now: DateTime<Utc>) -> BridgeCleanup {
        self.bridge.cleanup(now).await
    }

    pub async fn cleanup_registry(&self, now: DateTime<Utc>) -> RegistryCleanup {
        self.registry.cleanup(now).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{MemoryActivityStore, StaticAgentDirectory};
    use crate::error::AttributionError;
    use crate::types::{ActivityType, Confidence, ConflictResolution};
    use async_trait::async_trait;
    use chrono::TimeDelta;

    struct BrokenStore;

    #[async_trait]
    impl ActivityStore for BrokenStore {
        async fn get_recent_activities(
            &self,
            _since: DateTime<Utc>,
            _window: TimeDelta,
        ) -> Result<Vec<AgentActivity>> {
            Err(AttributionError::ActivityStore("connection refused".into()))
        }
    }

    fn engine_with(store: Arc<dyn ActivityStore>) -> AttributionEngine {
        AttributionEngine::standalone(
            AttributionConfig::default(),
            store,
            Arc::new(StaticAgentDirectory::new().with_agent("agentA", "developer")),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_signal_is_rejected() {
        let engine = engine_with(Arc::new(MemoryActivityStore::new()));
        let result = engine
            .attribute_signal(Signal::new("", "gg", Utc::now(), ""), DetectionContext::default())
            .await;
        assert!(matches!(result, Err(AttributionError::InvalidSignal(_))));
        assert_eq!(engine.get_metrics().await.attempted, 0);
    }

    #[tokio::test]
    async fn test_temporal_attribution_end_to_end() {
        let store = Arc::new(MemoryActivityStore::new());
        let now = Utc::now();
        store
            .record(AgentActivity::new(
                "a-1",
                "agentA",
                ActivityType::FileEdit,
                now - TimeDelta::seconds(5),
            ))
            .await;
        let engine = engine_with(store);

        let result = engine
            .attribute_signal(Signal::new("s-1", "gg", now, "[gg]"), DetectionContext::default())
            .await
            .unwrap();

        assert_eq!(result.attributed_agent_id, Some(AgentId::from("agentA")));
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.conflict_resolution, ConflictResolution::SingleStrategy);
        assert_eq!(result.metadata.agent_type.as_deref(), Some("developer"));
        assert!(!result.metadata.fallback_attribution);
    }

    #[tokio::test]
    async fn test_store_failure_degrades() {
        let engine = engine_with(Arc::new(BrokenStore));

        let result = engine
            .attribute_signal(Signal::new("s-1", "gg", Utc::now(), "[gg]"), DetectionContext::default())
            .await
            .unwrap();

        assert!(!result.is_attributed());
        assert!(result.metadata.fallback_attribution);
        assert!(result
            .metadata
            .degradations
            .contains(&Degradation::ActivityStoreUnavailable));
        assert!(result.metadata.degradations.contains(&Degradation::NoCandidates));
    }

    #[tokio::test]
    async fn test_repeat_attribution_is_served_from_cache() {
        let store = Arc::new(MemoryActivityStore::new());
        let now = Utc::now();
        store
            .record(AgentActivity::new("a-1", "agentA", ActivityType::FileEdit, now))
            .await;
        let engine = engine_with(store);
        let signal = Signal::new("s-1", "gg", now, "[gg]");

        let first = engine
            .attribute_signal(signal.clone(), DetectionContext::default())
            .await
            .unwrap();
        let second = engine
            .attribute_signal(signal, DetectionContext::default())
            .await
            .unwrap();

        assert!(!first.metadata.cache_hit);
        assert!(second.metadata.cache_hit);
        assert_eq!(second.attributed_agent_id, first.attributed_agent_id);
        assert_eq!(second.version, 1);
        assert_eq!(engine.get_metrics().await.cache_hits, 1);
    }
}
