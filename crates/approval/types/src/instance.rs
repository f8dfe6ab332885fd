//! Approval instances: one execution of a workflow definition against one record
//!
//! An instance keeps a snapshot of the definition's steps taken when it
//! started, so later edits to the definition never alter an approval that
//! is already in flight.

use crate::{ModuleType, RecordRef, UserId, WorkflowDefinition, WorkflowDefinitionId, WorkflowStep};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Instance Identifier ──────────────────────────────────────────────

/// Unique identifier for an approval instance
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApprovalInstanceId(pub String);

impl ApprovalInstanceId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for ApprovalInstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Approval Instance ────────────────────────────────────────────────

/// A running or resolved approval for one record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalInstance {
    pub id: ApprovalInstanceId,
    /// `None` when no definition matched and the record was auto-approved
    pub workflow_definition_id: Option<WorkflowDefinitionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition_version: Option<u32>,
    /// Snapshot of the definition's steps at start time
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    pub module_type: ModuleType,
    pub module_id: u64,
    /// Amount the definition was selected with
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator: Option<UserId>,
    pub current_step_index: usize,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency version, maintained by the store
    #[serde(default)]
    pub version: u64,
}

impl ApprovalInstance {
    /// Create an instance that starts at step 0 of `definition`
    pub fn from_definition(
        definition: &WorkflowDefinition,
        record: RecordRef,
        amount: f64,
        initiator: Option<UserId>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ApprovalInstanceId::generate(),
            workflow_definition_id: Some(definition.id),
            definition_version: Some(definition.version),
            steps: definition.steps.clone(),
            module_type: record.module_type,
            module_id: record.module_id,
            amount,
            initiator,
            current_step_index: 0,
            status: InstanceStatus::Running,
            created_at: now,
            updated_at: now,
            resolved_at: None,
            version: 0,
        }
    }

    /// Create an instance that is approved immediately because no
    /// definition matched the record
    pub fn auto_approved(record: RecordRef, amount: f64, initiator: Option<UserId>) -> Self {
        let now = Utc::now();
        Self {
            id: ApprovalInstanceId::generate(),
            workflow_definition_id: None,
            definition_version: None,
            steps: Vec::new(),
            module_type: record.module_type,
            module_id: record.module_id,
            amount,
            initiator,
            current_step_index: 0,
            status: InstanceStatus::Approved,
            created_at: now,
            updated_at: now,
            resolved_at: Some(now),
            version: 0,
        }
    }

    pub fn record(&self) -> RecordRef {
        RecordRef::new(self.module_type, self.module_id)
    }

    pub fn is_last_step(&self, index: usize) -> bool {
        index + 1 >= self.steps.len()
    }

    pub fn is_auto_approved(&self) -> bool {
        self.workflow_definition_id.is_none()
    }

    /// Active instances count against the one-per-record invariant
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Terminal outcome, if the instance is resolved
    pub fn outcome(&self) -> Option<ApprovalOutcome> {
        match self.status {
            InstanceStatus::Approved => Some(ApprovalOutcome::Approved),
            InstanceStatus::Rejected => Some(ApprovalOutcome::Rejected),
            _ => None,
        }
    }

    /// Move to a step and mark the instance running
    pub fn enter_step(&mut self, index: usize) {
        self.current_step_index = index;
        self.status = InstanceStatus::Running;
        self.updated_at = Utc::now();
    }

    /// Mark the instance as returned to an earlier step; the engine
    /// re-enters `Running` once the target step has been re-issued
    pub fn return_to(&mut self, target: usize) {
        self.current_step_index = target;
        self.status = InstanceStatus::ReturnedPending;
        self.updated_at = Utc::now();
    }

    pub fn escalate(&mut self) {
        self.status = InstanceStatus::EscalationNeeded;
        self.updated_at = Utc::now();
    }

    pub fn resolve(&mut self, outcome: ApprovalOutcome) {
        let now = Utc::now();
        self.status = match outcome {
            ApprovalOutcome::Approved => InstanceStatus::Approved,
            ApprovalOutcome::Rejected => InstanceStatus::Rejected,
        };
        self.resolved_at = Some(now);
        self.updated_at = now;
    }
}

// ── Instance Status ──────────────────────────────────────────────────

/// Lifecycle state of an approval instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Waiting for decisions on `current_step_index`
    Running,
    /// Sent back to an earlier step, target not yet re-issued
    ReturnedPending,
    /// Step activation found no approver; needs an administrator
    EscalationNeeded,
    Approved,
    Rejected,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::ReturnedPending => "returned_pending",
            Self::EscalationNeeded => "escalation_needed",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Running | Self::ReturnedPending | Self::EscalationNeeded
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome reported back to the owning record store
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalOutcome {
    Approved,
    Rejected,
}

impl std::fmt::Display for ApprovalOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approved => f.write_str("approved"),
            Self::Rejected => f.write_str("rejected"),
        }
    }
}

/// A terminal outcome awaiting delivery to the record store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingOutcome {
    pub instance_id: ApprovalInstanceId,
    pub record: RecordRef,
    pub outcome: ApprovalOutcome,
    pub resolved_at: DateTime<Utc>,
}

impl PendingOutcome {
    /// Build the pending delivery for a resolved instance
    pub fn for_instance(instance: &ApprovalInstance) -> Option<Self> {
        Some(Self {
            instance_id: instance.id.clone(),
            record: instance.record(),
            outcome: instance.outcome()?,
            resolved_at: instance.resolved_at.unwrap_or(instance.updated_at),
        })
    }
}
