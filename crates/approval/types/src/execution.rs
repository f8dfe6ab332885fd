//! Step executions: the decisions collected for one activation of one step
//!
//! An execution is open until its approval mode is satisfied (or a
//! reject/return closes it early). Once closed it is immutable; any
//! attempt to record a further decision fails with `TaskAlreadyResolved`.

use crate::{ApprovalError, ApprovalInstanceId, ApprovalMode, ApprovalResult, TaskToken, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a step execution
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepExecutionId(pub String);

impl StepExecutionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for StepExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-actor decision within a step execution
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorDecision {
    #[default]
    Pending,
    Approved,
    Rejected,
    /// The actor sent the instance back to an earlier step
    Returned,
}

/// One resolved actor and what they decided
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActorDecisionRecord {
    pub actor: UserId,
    pub decision: ActorDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

/// How a closed execution ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepOutcome {
    Approved,
    Rejected,
    Returned { target: usize },
}

/// Decisions for one activation of one step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub id: StepExecutionId,
    pub instance_id: ApprovalInstanceId,
    pub step_index: usize,
    pub approval_mode: ApprovalMode,
    pub actors: Vec<ActorDecisionRecord>,
    pub open: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<StepOutcome>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency version, maintained by the store
    #[serde(default)]
    pub version: u64,
}

impl StepExecution {
    /// Open an execution for the given resolved actors
    pub fn open(
        instance_id: ApprovalInstanceId,
        step_index: usize,
        approval_mode: ApprovalMode,
        actors: impl IntoIterator<Item = UserId>,
    ) -> Self {
        Self {
            id: StepExecutionId::generate(),
            instance_id,
            step_index,
            approval_mode,
            actors: actors
                .into_iter()
                .map(|actor| ActorDecisionRecord {
                    actor,
                    decision: ActorDecision::Pending,
                    comment: None,
                    decided_at: None,
                })
                .collect(),
            open: true,
            outcome: None,
            started_at: Utc::now(),
            closed_at: None,
            version: 0,
        }
    }

    /// The approver whose decision came last, if anyone approved
    pub fn last_approver(&self) -> Option<&UserId> {
        self.actors
            .iter()
            .filter(|a| a.decision == ActorDecision::Approved)
            .max_by_key(|a| a.decided_at)
            .map(|a| &a.actor)
    }

    pub fn decision_of(&self, actor: &UserId) -> Option<ActorDecision> {
        self.actors
            .iter()
            .find(|a| &a.actor == actor)
            .map(|a| a.decision)
    }

    /// Record an actor's decision. `token` is only used for error reporting.
    pub fn record(
        &mut self,
        actor: &UserId,
        decision: ActorDecision,
        comment: Option<String>,
        token: &TaskToken,
    ) -> ApprovalResult<()> {
        if !self.open {
            return Err(ApprovalError::TaskAlreadyResolved(token.clone()));
        }
        let entry = self
            .actors
            .iter_mut()
            .find(|a| &a.actor == actor)
            .ok_or_else(|| ApprovalError::ActorNotInStep {
                actor: actor.to_string(),
                step_index: self.step_index,
            })?;
        if entry.decision != ActorDecision::Pending {
            return Err(ApprovalError::TaskAlreadyResolved(token.clone()));
        }
        entry.decision = decision;
        entry.comment = comment;
        entry.decided_at = Some(Utc::now());
        Ok(())
    }

    /// Whether the approvals recorded so far satisfy the approval mode
    pub fn is_satisfied(&self) -> bool {
        match self.approval_mode {
            ApprovalMode::Any => self
                .actors
                .iter()
                .any(|a| a.decision == ActorDecision::Approved),
            ApprovalMode::All => {
                !self.actors.is_empty()
                    && self
                        .actors
                        .iter()
                        .all(|a| a.decision == ActorDecision::Approved)
            }
        }
    }

    pub fn pending_actors(&self) -> Vec<&UserId> {
        self.actors
            .iter()
            .filter(|a| a.decision == ActorDecision::Pending)
            .map(|a| &a.actor)
            .collect()
    }

    pub fn close(&mut self, outcome: StepOutcome) {
        self.open = false;
        self.outcome = Some(outcome);
        self.closed_at = Some(Utc::now());
    }
}
