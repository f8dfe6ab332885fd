//! Append-only audit trail of an approval instance

use crate::{ApprovalInstanceId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Started,
    AutoApproved,
    StepActivated,
    Approved,
    Rejected,
    Returned,
    StepClosed,
    TodoCancelled,
    InstanceApproved,
    InstanceRejected,
    EscalationNeeded,
    Reassigned,
}

/// An entry to append; the store assigns the sequence number
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryAppend {
    pub instance_id: ApprovalInstanceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<UserId>,
    pub action: HistoryAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl HistoryAppend {
    /// An entry produced by the engine itself
    pub fn system(instance_id: &ApprovalInstanceId, action: HistoryAction) -> Self {
        Self {
            instance_id: instance_id.clone(),
            actor: None,
            action,
            step_index: None,
            comment: None,
            timestamp: Utc::now(),
        }
    }

    /// An entry caused by an actor
    pub fn by(instance_id: &ApprovalInstanceId, actor: &UserId, action: HistoryAction) -> Self {
        Self {
            actor: Some(actor.clone()),
            ..Self::system(instance_id, action)
        }
    }

    pub fn at_step(mut self, step_index: usize) -> Self {
        self.step_index = Some(step_index);
        self
    }

    pub fn with_comment(mut self, comment: Option<String>) -> Self {
        self.comment = comment;
        self
    }
}

/// A stored history entry; never overwritten
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Monotonically increasing per instance, starting at 0
    pub sequence: u64,
    pub instance_id: ApprovalInstanceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<UserId>,
    pub action: HistoryAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn from_append(sequence: u64, append: HistoryAppend) -> Self {
        Self {
            sequence,
            instance_id: append.instance_id,
            actor: append.actor,
            action: append.action,
            step_index: append.step_index,
            comment: append.comment,
            timestamp: append.timestamp,
        }
    }
}
