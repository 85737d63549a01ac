//! Agent bridge
//!
//! Owns short-lived per-agent sessions and the correlation cache. Cleanup
//! plans its changes under a read lock and applies them under a write lock,
//! so readers never observe a half-swept map.

mod cache;
mod session;

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::{check_secs, secs_to_delta};
use crate::error::{AttributionError, Result};
use crate::types::{AgentActivity, AgentId, Candidate, SignalId};

pub use cache::{CorrelationCache, CorrelationResult, correlation_key};
pub use session::{AgentSession, SessionSweep, SessionTracker};

/// Configuration for the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Idle time before a session expires (default: 300)
    pub session_timeout_secs: u64,
    pub max_correlation_cache: usize,
    pub cleanup_interval_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 300,
            max_correlation_cache: 10_000,
            cleanup_interval_secs: 60,
        }
    }
}

impl BridgeConfig {
    pub fn session_timeout(&self) -> TimeDelta {
        secs_to_delta(self.session_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_correlation_cache == 0 {
            return Err(AttributionError::InvalidConfig(
                "bridge.max_correlation_cache must be positive".into(),
            ));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(AttributionError::InvalidConfig(
                "bridge.cleanup_interval_secs must be positive".into(),
            ));
        }
        check_secs("bridge.session_timeout_secs", self.session_timeout_secs)?;
        check_secs("bridge.cleanup_interval_secs", self.cleanup_interval_secs)?;
        Ok(())
    }
}

/// What a bridge cleanup pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeCleanup {
    pub deactivated_sessions: usize,
    pub evicted_sessions: usize,
    pub trimmed_correlations: usize,
}

/// Session and correlation-cache owner
pub struct AgentBridge {
    config: BridgeConfig,
    sessions: RwLock<SessionTracker>,
    cache: RwLock<CorrelationCache>,
}

impl AgentBridge {
    pub fn new(config: BridgeConfig) -> Self {
        let cache = CorrelationCache::new(config.max_correlation_cache);
        Self {
            config,
            sessions: RwLock::new(SessionTracker::new()),
            cache: RwLock::new(cache),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Start or extend the session of the activity's agent
    pub async fn observe_activity(&self, activity: &AgentActivity) -> AgentSession {
        let mut sessions = self.sessions.write().await;
        sessions.observe(activity).clone()
    }

    /// Fold queried activities into sessions and return the active ones
    pub async fn absorb_activities(&self, activities: &[AgentActivity]) -> Vec<AgentSession> {
        let mut sessions = self.sessions.write().await;
        let applied = sessions.absorb(activities);
        if applied > 0 {
            debug!(applied, "Sessions updated from activity query");
        }
        sessions.active()
    }

    pub async fn session_for(&self, agent_id: &AgentId) -> Option<AgentSession> {
        self.sessions.read().await.get(agent_id).cloned()
    }

    pub async fn active_sessions(&self) -> Vec<AgentSession> {
        self.sessions.read().await.active()
    }

    /// Cache every candidate as a correlation of the signal
    pub async fn cache_correlations(
        &self,
        signal_id: &SignalId,
        candidates: &[Candidate],
        now: DateTime<Utc>,
    ) -> usize {
        if candidates.is_empty() {
            return 0;
        }
        let mut cache = self.cache.write().await;
        let mut evicted = 0;
        for candidate in candidates {
            evicted += cache.insert(CorrelationResult::from_candidate(signal_id, candidate, now));
        }
        if evicted > 0 {
            debug!(evicted, "Correlation cache full, evicted oldest entries");
        }
        candidates.len()
    }

    pub async fn cached_correlations(&self, signal_id: &SignalId) -> Vec<CorrelationResult> {
        self.cache.read().await.for_signal(signal_id)
    }

    pub async fn has_cached(&self, signal_id: &SignalId) -> bool {
        self.cache.read().await.contains_signal(signal_id)
    }

    pub async fn cache_len(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Expire idle sessions and trim the cache to its bound
    pub async fn cleanup(&self, now: DateTime<Utc>) -> BridgeCleanup {
        let timeout = self.config.session_timeout();

        let sweep = self.sessions.read().await.plan_sweep(now, timeout);
        let (deactivated_sessions, evicted_sessions) = if sweep.is_empty() {
            (0, 0)
        } else {
            self.sessions.write().await.apply_sweep(&sweep, now, timeout)
        };

        let trimmed_correlations = self
            .cache
            .write()
            .await
            .trim_to(self.config.max_correlation_cache);

        let report = BridgeCleanup {
            deactivated_sessions,
            evicted_sessions,
            trimmed_correlations,
        };
        debug!(
            deactivated = report.deactivated_sessions,
            evicted = report.evicted_sessions,
            trimmed = report.trimmed_correlations,
            "Bridge cleanup complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::StrategyKind;
    use crate::types::{ActivityId, ActivityType, Confidence};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cleanup_expires_idle_sessions() {
        let bridge = AgentBridge::new(BridgeConfig::default());
        let start = Utc::now();
        bridge
            .observe_activity(&AgentActivity::new("a-1", "agentA", ActivityType::FileEdit, start))
            .await;
        bridge
            .observe_activity(&AgentActivity::new(
                "a-2",
                "agentB",
                ActivityType::FileEdit,
                start + TimeDelta::seconds(200),
            ))
            .await;

        let now = start + TimeDelta::seconds(350);
        let report = bridge.cleanup(now).await;
        assert_eq!(report.deactivated_sessions, 1);

        let active = bridge.active_sessions().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].agent_id, AgentId::from("agentB"));

        let report = bridge.cleanup(now).await;
        assert_eq!(report.evicted_sessions, 1);
        assert!(bridge.session_for(&AgentId::from("agentA")).await.is_none());
    }

    #[tokio::test]
    async fn test_cache_correlations() {
        let bridge = AgentBridge::new(BridgeConfig {
            max_correlation_cache: 3,
            ..Default::default()
        });
        let candidates: Vec<Candidate> = (0..5)
            .map(|i| {
                Candidate::new(StrategyKind::Temporal, "agentA", Confidence::High, "")
                    .with_activity(ActivityId::new(format!("a-{i}")))
            })
            .collect();

        bridge
            .cache_correlations(&SignalId::from("s-1"), &candidates, Utc::now())
            .await;

        assert_eq!(bridge.cache_len().await, 3);
        let cached = bridge.cached_correlations(&SignalId::from("s-1")).await;
        assert_eq!(cached[0].activity_id, Some(ActivityId::from("a-2")));
    }

    #[tokio::test]
    async fn test_cleanup_tolerates_concurrent_readers() {
        let bridge = Arc::new(AgentBridge::new(BridgeConfig::default()));
        let start = Utc::now();
        for i in 0..50 {
            bridge
                .observe_activity(&AgentActivity::new(
                    format!("a-{i}"),
                    format!("agent-{i}"),
                    ActivityType::Command,
                    start,
                ))
                .await;
        }

        let reader = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    let _ = bridge.active_sessions().await;
                    tokio::task::yield_now().await;
                }
            })
        };
        let later = start + TimeDelta::seconds(600);
        bridge.cleanup(later).await;
        bridge.cleanup(later).await;
        reader.await.unwrap();

        assert!(bridge.active_sessions().await.is_empty());
    }
}
