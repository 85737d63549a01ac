//! Per-agent sessions
//!
//! A session is created lazily on an agent's first activity and extended by
//! later ones. Idle sessions are first marked inactive and evicted on the
//! following sweep.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ActivityType, AgentActivity, AgentId, SessionId};

/// Recent-activity window for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSession {
    pub session_id: SessionId,
    pub agent_id: AgentId,
    pub agent_type: String,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub activity_count: u64,
    /// PRP contexts of tasks started and not yet completed
    pub current_tasks: Vec<String>,
    pub is_active: bool,
}

impl AgentSession {
    fn start(activity: &AgentActivity) -> Self {
        let session_id = activity
            .session_id
            .clone()
            .unwrap_or_else(|| SessionId::new(format!("sess-{}", Uuid::now_v7())));
        let mut session = Self {
            session_id,
            agent_id: activity.agent_id.clone(),
            agent_type: activity.agent_type.clone(),
            start_time: activity.timestamp,
            last_activity: activity.timestamp,
            activity_count: 1,
            current_tasks: Vec::new(),
            is_active: true,
        };
        session.track_task(activity);
        session
    }

    fn extend(&mut self, activity: &AgentActivity) {
        self.last_activity = self.last_activity.max(activity.timestamp);
        self.activity_count += 1;
        self.track_task(activity);
    }

    fn track_task(&mut self, activity: &AgentActivity) {
        let Some(task) = &activity.prp_context else {
            return;
        };
        match activity.activity_type {
            ActivityType::TaskStarted if !self.current_tasks.contains(task) => {
                self.current_tasks.push(task.clone());
            }
            ActivityType::TaskCompleted => self.current_tasks.retain(|t| t != task),
            _ => {}
        }
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.last_activity
    }
}

/// Sessions to change on the next sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSweep {
    /// Inactive sessions to remove
    pub evict: Vec<AgentId>,
    /// Idle active sessions to mark inactive
    pub deactivate: Vec<AgentId>,
}

impl SessionSweep {
    pub fn is_empty(&self) -> bool {
        self.evict.is_empty() && self.deactivate.is_empty()
    }
}

/// Sessions keyed by agent
#[derive(Debug, Default)]
pub struct SessionTracker {
    sessions: HashMap<AgentId, AgentSession>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start or extend the agent's session
    pub fn observe(&mut self, activity: &AgentActivity) -> &AgentSession {
        let session = self
            .sessions
            .entry(activity.agent_id.clone())
            .and_modify(|s| {
                if s.is_active {
                    s.extend(activity);
                } else {
                    *s = AgentSession::start(activity);
                }
            })
            .or_insert_with(|| AgentSession::start(activity));
        session
    }

    /// Fold in activities from an activity-store query
    ///
    /// Queries overlap, so an activity only counts when it is newer than the
    /// last one seen for its agent. Returns how many were applied.
    pub fn absorb(&mut self, activities: &[AgentActivity]) -> usize {
        let mut ordered: Vec<&AgentActivity> = activities.iter().collect();
        ordered.sort_by_key(|a| a.timestamp);

        let mut applied = 0;
        for activity in ordered {
            let fresh = self
                .sessions
                .get(&activity.agent_id)
                .is_none_or(|s| activity.timestamp > s.last_activity);
            if fresh {
                self.observe(activity);
                applied += 1;
            }
        }
        applied
    }

    pub fn get(&self, agent_id: &AgentId) -> Option<&AgentSession> {
        self.sessions.get(agent_id)
    }

    /// Work out what to change without mutating
    pub fn plan_sweep(&self, now: DateTime<Utc>, timeout: TimeDelta) -> SessionSweep {
        let mut sweep = SessionSweep::default();
        for (agent_id, session) in &self.sessions {
            if !session.is_active {
                sweep.evict.push(agent_id.clone());
            } else if session.idle_for(now) > timeout {
                sweep.deactivate.push(agent_id.clone());
            }
        }
        sweep.evict.sort();
        sweep.deactivate.sort();
        sweep
    }

    /// Apply a planned sweep, re-checking each session
    ///
    /// Returns `(deactivated, evicted)`.
    pub fn apply_sweep(
        &mut self,
        sweep: &SessionSweep,
        now: DateTime<Utc>,
        timeout: TimeDelta,
    ) -> (usize, usize) {
        let mut evicted = 0;
        for agent_id in &sweep.evict {
            if self.sessions.get(agent_id).is_some_and(|s| !s.is_active) {
                self.sessions.remove(agent_id);
                evicted += 1;
            }
        }

        let mut deactivated = 0;
        for agent_id in &sweep.deactivate {
            if let Some(session) = self.sessions.get_mut(agent_id)
                && session.is_active
                && session.idle_for(now) > timeout
            {
                session.is_active = false;
                deactivated += 1;
            }
        }
        (deactivated, evicted)
    }

    pub fn active(&self) -> Vec<AgentSession> {
        let mut active: Vec<AgentSession> =
            self.sessions.values().filter(|s| s.is_active).cloned().collect();
        active.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        active
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
