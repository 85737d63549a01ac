//! Attribution metrics
//!
//! Running counters for dashboards. Averages are kept as running sums so
//! they stay exact regardless of call count.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::strategy::{StrategyKind, StrategyOutcome, StrategyRun};
use crate::types::AgentId;

/// Per-strategy counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyStats {
    pub invocations: u64,
    pub proposals: u64,
    /// Proposals naming the finally attributed agent
    pub wins: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub average_latency_ms: f64,
}

/// Snapshot handed to callers of `get_metrics`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributionMetrics {
    pub attempted: u64,
    /// Attempts that named an agent
    pub successful: u64,
    /// Attempts with any degradation
    pub fallback: u64,
    pub cache_hits: u64,
    pub average_latency_ms: f64,
    pub feedback_received: u64,
    pub feedback_correct: u64,
    pub per_strategy: BTreeMap<StrategyKind, StrategyStats>,
}

impl AttributionMetrics {
    /// Share of verified attributions that were correct
    pub fn accuracy(&self) -> Option<f64> {
        (self.feedback_received > 0)
            .then(|| self.feedback_correct as f64 / self.feedback_received as f64)
    }
}

#[derive(Debug, Default)]
struct StrategyTotals {
    stats: StrategyStats,
    latency_total_ms: f64,
}

#[derive(Debug, Default)]
struct MetricsState {
    metrics: AttributionMetrics,
    latency_total_ms: f64,
    per_strategy: BTreeMap<StrategyKind, StrategyTotals>,
}

/// One completed attribution, as seen by the recorder
#[derive(Debug)]
pub struct AttemptRecord<'a> {
    pub runs: &'a [StrategyRun],
    pub winner: Option<&'a AgentId>,
    pub degraded: bool,
    pub latency: Duration,
}

/// Thread-safe metrics recorder
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    state: Mutex<MetricsState>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_attempt(&self, record: AttemptRecord<'_>) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let latency_ms = record.latency.as_secs_f64() * 1000.0;

        state.metrics.attempted += 1;
        if record.winner.is_some() {
            state.metrics.successful += 1;
        }
        if record.degraded {
            state.metrics.fallback += 1;
        }
        state.latency_total_ms += latency_ms;
        state.metrics.average_latency_ms = state.latency_total_ms / state.metrics.attempted as f64;

        for run in record.runs {
            let totals = state.per_strategy.entry(run.kind).or_default();
            totals.stats.invocations += 1;
            match &run.outcome {
                StrategyOutcome::Proposed(candidate) => {
                    totals.stats.proposals += 1;
                    if record.winner == Some(&candidate.agent_id) {
                        totals.stats.wins += 1;
                    }
                }
                StrategyOutcome::Abstained => {}
                StrategyOutcome::Failed(_) => totals.stats.failures += 1,
                StrategyOutcome::TimedOut => totals.stats.timeouts += 1,
            }
            totals.latency_total_ms += run.elapsed.as_secs_f64() * 1000.0;
            totals.stats.average_latency_ms =
                totals.latency_total_ms / totals.stats.invocations as f64;
        }
    }

    pub async fn record_cache_hit(&self) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.metrics.attempted += 1;
        state.metrics.successful += 1;
        state.metrics.cache_hits += 1;
        state.metrics.average_latency_ms = state.latency_total_ms / state.metrics.attempted as f64;
    }

    pub async fn record_feedback(&self, is_correct: bool) {
        let mut state = self.state.lock().await;
        state.metrics.feedback_received += 1;
        if is_correct {
            state.metrics.feedback_correct += 1;
        }
    }

    pub async fn snapshot(&self) -> AttributionMetrics {
        let state = self.state.lock().await;
        let mut metrics = state.metrics.clone();
        metrics.per_strategy = state
            .per_strategy
            .iter()
            .map(|(kind, totals)| (*kind, totals.stats.clone()))
            .collect();
        metrics
    }
}
