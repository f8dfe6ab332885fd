//! Error types for the approval layer

use crate::{ApprovalInstanceId, TaskToken, TodoId, TodoStatus, WorkflowDefinitionId};

/// Errors that can occur in approval operations
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("Invalid workflow definition: {0}")]
    InvalidDefinition(String),

    #[error("Workflow definition not found: {0}")]
    DefinitionNotFound(WorkflowDefinitionId),

    #[error("An approval is already active for this record: {existing}")]
    InstanceAlreadyActive { existing: ApprovalInstanceId },

    #[error("Approval instance not found: {0}")]
    InstanceNotFound(ApprovalInstanceId),

    #[error("No approver could be resolved: {0}")]
    UnresolvableApprovers(String),

    #[error("Task already handled: {0}")]
    TaskAlreadyResolved(TaskToken),

    #[error("Task token not found: {0}")]
    TaskTokenNotFound(TaskToken),

    #[error("Invalid todo transition: {from:?} -> {to:?}")]
    InvalidTodoTransition { from: TodoStatus, to: TodoStatus },

    #[error("Invalid todo: {0}")]
    InvalidTodo(String),

    #[error("Todo not found: {0}")]
    TodoNotFound(TodoId),

    #[error("Todo {todo} is not owned by {actor}")]
    NotTodoOwner { todo: TodoId, actor: String },

    #[error("{actor} is not an approver of step {step_index}")]
    ActorNotInStep { actor: String, step_index: usize },

    #[error("Todo {0} is an approval todo; decide it through its task token")]
    NotTaskTodo(TodoId),

    #[error("Todo {0} is not an approval todo")]
    NotApprovalTodo(TodoId),

    #[error("Invalid return target {target}: current step is {current}")]
    InvalidReturnTarget { target: usize, current: usize },

    #[error("Approval instance {0} is not awaiting escalation")]
    InstanceNotEscalated(ApprovalInstanceId),

    #[error("Unknown module type: {0}")]
    UnknownModuleType(String),

    #[error("Unknown todo status: {0}")]
    UnknownTodoStatus(String),

    #[error("Amount must be a finite number, got {0}")]
    InvalidAmount(f64),

    #[error("Concurrent modification not resolved after {attempts} attempts")]
    Conflict { attempts: u32 },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl ApprovalError {
    /// Errors caused by the caller's input or by a stale view of the
    /// instance, as opposed to configuration or integration faults
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::TaskAlreadyResolved(_)
                | Self::InstanceAlreadyActive { .. }
                | Self::NotTodoOwner { .. }
                | Self::NotTaskTodo(_)
                | Self::NotApprovalTodo(_)
                | Self::InvalidReturnTarget { .. }
                | Self::UnknownModuleType(_)
                | Self::UnknownTodoStatus(_)
                | Self::InvalidAmount(_)
        )
    }
}

/// Result type alias for approval operations
pub type ApprovalResult<T> = Result<T, ApprovalError>;
