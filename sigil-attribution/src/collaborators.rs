//! Collaborator seams
//!
//! The engine reads agent activity and agent metadata through these traits.
//! In-memory implementations are provided for hosts without their own.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::types::{AgentActivity, AgentId};

/// Agent type reported when the directory has no entry.
pub const UNKNOWN_AGENT_TYPE: &str = "unknown";

/// Default number of activities kept by [`MemoryActivityStore`].
const DEFAULT_ACTIVITY_CAPACITY: usize = 10_000;

/// Queryable log of agent activity
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Activities with `since <= timestamp <= since + window`, newest first
    async fn get_recent_activities(
        &self,
        since: DateTime<Utc>,
        window: TimeDelta,
    ) -> Result<Vec<AgentActivity>>;
}

/// Lookup of agent metadata
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn agent_type(&self, agent_id: &AgentId) -> Option<String>;

    /// Agent type, falling back to `unknown`
    async fn get_agent_type(&self, agent_id: &AgentId) -> String {
        self.agent_type(agent_id)
            .await
            .unwrap_or_else(|| UNKNOWN_AGENT_TYPE.to_string())
    }
}

/// Bounded in-memory activity log
///
/// Appends only; the oldest record is dropped once capacity is reached.
pub struct MemoryActivityStore {
    capacity: usize,
    activities: RwLock<VecDeque<AgentActivity>>,
}

impl MemoryActivityStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_ACTIVITY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            activities: RwLock::new(VecDeque::new()),
        }
    }

    pub async fn record(&self, activity: AgentActivity) {
        let mut activities = self.activities.write().await;
        activities.push_back(activity);
        while activities.len() > self.capacity {
            activities.pop_front();
        }
    }

    pub async fn len(&self) -> usize {
        self.activities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.activities.read().await.is_empty()
    }
}

impl Default for MemoryActivityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActivityStore for MemoryActivityStore {
    async fn get_recent_activities(
        &self,
        since: DateTime<Utc>,
        window: TimeDelta,
    ) -> Result<Vec<AgentActivity>> {
        let until = since
            .checked_add_signed(window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let activities = self.activities.read().await;
        let mut recent: Vec<AgentActivity> = activities
            .iter()
            .filter(|a| a.timestamp >= since && a.timestamp <= until)
            .cloned()
            .collect();
        // Stable sort keeps later-recorded activities first among equal timestamps
        recent.reverse();
        recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(recent)
    }
}

/// Fixed agent → type mapping
#[derive(Debug, Clone, Default)]
pub struct StaticAgentDirectory {
    types: HashMap<AgentId, String>,
}

impl StaticAgentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_agent(mut self, agent_id: impl Into<AgentId>, agent_type: impl Into<String>) -> Self {
        self.types.insert(agent_id.into(), agent_type.into());
        self
    }
}

#[async_trait]
impl AgentDirectory for StaticAgentDirectory {
    async fn agent_type(&self, agent_id: &AgentId) -> Option<String> {
        self.types.get(agent_id).cloned()
    }
}
