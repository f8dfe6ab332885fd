//! Decisions submitted by actors against approval todos

use crate::{ActorDecision, TaskToken, UserId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Approve,
    Reject,
    /// Send the instance back to an earlier step
    Return,
}

impl DecisionAction {
    pub fn actor_decision(&self) -> ActorDecision {
        match self {
            Self::Approve => ActorDecision::Approved,
            Self::Reject => ActorDecision::Rejected,
            Self::Return => ActorDecision::Returned,
        }
    }
}

/// A decision as submitted by an actor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub task_token: TaskToken,
    pub actor_id: UserId,
    pub action: DecisionAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Only meaningful for `Return`; defaults to step 0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_target: Option<usize>,
}

impl DecisionRequest {
    pub fn new(task_token: TaskToken, actor_id: UserId, action: DecisionAction) -> Self {
        Self {
            task_token,
            actor_id,
            action,
            comment: None,
            return_target: None,
        }
    }

    pub fn approve(task_token: TaskToken, actor_id: UserId) -> Self {
        Self::new(task_token, actor_id, DecisionAction::Approve)
    }

    pub fn reject(task_token: TaskToken, actor_id: UserId) -> Self {
        Self::new(task_token, actor_id, DecisionAction::Reject)
    }

    pub fn return_to(task_token: TaskToken, actor_id: UserId, target: Option<usize>) -> Self {
        Self {
            return_target: target,
            ..Self::new(task_token, actor_id, DecisionAction::Return)
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}
