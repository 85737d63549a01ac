//! Contextual correlation
//!
//! Links a signal to an agent that touched the same file or worked in the
//! same PRP context the detector reported. Activities are checked first; an
//! active session whose open tasks include the PRP is the fallback.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{CorrelationStrategy, StrategyInput, StrategyKind};
use crate::bridge::AgentSession;
use crate::error::Result;
use crate::types::{AgentActivity, Candidate, Confidence, DetectionContext};

/// Configuration for contextual correlation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextualConfig {
    pub enabled: bool,
}

impl Default for ContextualConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Field on which a context match was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchedField {
    FilePath,
    PrpContext,
}

impl MatchedField {
    fn as_str(&self) -> &'static str {
        match self {
            Self::FilePath => "file_path",
            Self::PrpContext => "prp_context",
        }
    }
}

/// Shared-context strategy
#[derive(Debug, Default)]
pub struct ContextualStrategy;

impl ContextualStrategy {
    pub fn new() -> Self {
        Self
    }

    fn matched_field(
        context: &DetectionContext,
        activity: &AgentActivity,
    ) -> Option<(MatchedField, String)> {
        if let (Some(wanted), Some(seen)) = (&context.file_path, &activity.file_path)
            && wanted == seen
        {
            return Some((MatchedField::FilePath, wanted.clone()));
        }
        if let (Some(wanted), Some(seen)) = (&context.prp_context, &activity.prp_context)
            && wanted == seen
        {
            return Some((MatchedField::PrpContext, wanted.clone()));
        }
        None
    }

    fn session_with_task<'a>(
        context: &DetectionContext,
        sessions: &'a [AgentSession],
    ) -> Option<(&'a AgentSession, String)> {
        let wanted = context.prp_context.as_ref()?;
        sessions
            .iter()
            .find(|s| s.is_active && s.current_tasks.contains(wanted))
            .map(|s| (s, wanted.clone()))
    }
}

#[async_trait]
impl CorrelationStrategy for ContextualStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Contextual
    }

    async fn propose(&self, input: &StrategyInput) -> Result<Option<Candidate>> {
        if input.context.is_empty() {
            return Ok(None);
        }

        let found = input.activities.iter().find_map(|activity| {
            Self::matched_field(&input.context, activity).map(|m| (activity, m))
        });

        if let Some((activity, (field, value))) = found {
            return Ok(Some(
                Candidate::new(
                    StrategyKind::Contextual,
                    activity.agent_id.clone(),
                    Confidence::High,
                    format!("activity {} shares {} with the signal", activity.id, field.as_str()),
                )
                .with_evidence(format!("{}={value}", field.as_str()))
                .with_evidence(format!("activity_id={}", activity.id))
                .with_activity(activity.id.clone()),
            ));
        }

        Ok(Self::session_with_task(&input.context, &input.sessions).map(|(session, task)| {
            Candidate::new(
                StrategyKind::Contextual,
                session.agent_id.clone(),
                Confidence::High,
                format!("session {} has task {task} open", session.session_id),
            )
            .with_evidence(format!("current_task={task}"))
            .with_evidence(format!("session_id={}", session.session_id))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActivityType, AgentId, Signal};
    use chrono::Utc;

    fn input(context: DetectionContext, activities: Vec<AgentActivity>) -> StrategyInput {
        StrategyInput::new(
            Signal::new("s-1", "bb", Utc::now(), "[bb] blocked"),
            context,
            activities,
        )
    }

    #[tokio::test]
    async fn test_file_path_match() {
        let activities = vec![
            AgentActivity::new("a-1", "agentA", ActivityType::FileEdit, Utc::now())
                .with_file("src/other.rs"),
            AgentActivity::new("a-2", "agentB", ActivityType::FileEdit, Utc::now())
                .with_file("src/lib.rs"),
        ];

        let candidate = ContextualStrategy::new()
            .propose(&input(DetectionContext::for_file("src/lib.rs"), activities))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(candidate.agent_id, AgentId::from("agentB"));
        assert_eq!(candidate.confidence, Confidence::High);
        assert!(candidate.evidence.iter().any(|e| e.detail == "file_path=src/lib.rs"));
    }

    #[tokio::test]
    async fn test_prp_context_match() {
        let activities = vec![
            AgentActivity::new("a-1", "agentA", ActivityType::TaskStarted, Utc::now())
                .with_prp("PRP-007"),
        ];

        let candidate = ContextualStrategy::new()
            .propose(&input(DetectionContext::for_prp("PRP-007"), activities))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(candidate.agent_id, AgentId::from("agentA"));
        assert!(candidate.evidence.iter().any(|e| e.detail == "prp_context=PRP-007"));
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let activities = vec![
            AgentActivity::new("a-1", "first", ActivityType::FileEdit, Utc::now())
                .with_file("README.md"),
            AgentActivity::new("a-2", "second", ActivityType::FileEdit, Utc::now())
                .with_file("README.md"),
        ];

        let candidate = ContextualStrategy::new()
            .propose(&input(DetectionContext::for_file("README.md"), activities))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(candidate.agent_id, AgentId::from("first"));
    }

    #[tokio::test]
    async fn test_open_session_task_matches_prp() {
        let mut tracker = crate::bridge::SessionTracker::new();
        tracker.observe(
            &AgentActivity::new("a-1", "agentC", ActivityType::TaskStarted, Utc::now())
                .with_prp("PRP-009"),
        );
        // The task-start activity has aged out of the query window
        let input = input(DetectionContext::for_prp("PRP-009"), vec![])
            .with_sessions(tracker.active());

        let candidate = ContextualStrategy::new().propose(&input).await.unwrap().unwrap();

        assert_eq!(candidate.agent_id, AgentId::from("agentC"));
        assert!(candidate.evidence.iter().any(|e| e.detail == "current_task=PRP-009"));
        assert!(candidate.activity_id.is_none());
    }

    #[tokio::test]
    async fn test_activity_match_beats_session_task() {
        let mut tracker = crate::bridge::SessionTracker::new();
        tracker.observe(
            &AgentActivity::new("a-1", "agentC", ActivityType::TaskStarted, Utc::now())
                .with_prp("PRP-009"),
        );
        let activities = vec![
            AgentActivity::new("a-2", "agentA", ActivityType::FileEdit, Utc::now())
                .with_prp("PRP-009"),
        ];
        let input = input(DetectionContext::for_prp("PRP-009"), activities)
            .with_sessions(tracker.active());

        let candidate = ContextualStrategy::new().propose(&input).await.unwrap().unwrap();

        assert_eq!(candidate.agent_id, AgentId::from("agentA"));
    }

    #[tokio::test]
    async fn test_no_context_abstains() {
        let activities = vec![
            AgentActivity::new("a-1", "agentA", ActivityType::FileEdit, Utc::now())
                .with_file("README.md"),
        ];

        let result = ContextualStrategy::new()
            .propose(&input(DetectionContext::default(), activities))
            .await
            .unwrap();

        assert!(result.is_none());
    }
}
