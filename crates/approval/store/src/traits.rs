use crate::model::ChangeSet;
use crate::StorageResult;
use approval_types::{
    ApprovalInstance, ApprovalInstanceId, HistoryEntry, ModuleType, PendingOutcome, RecordRef,
    StepExecution, StepExecutionId, TaskToken, Todo, TodoId, TodoStatus, UserId,
    WorkflowDefinition, WorkflowDefinitionId,
};
use async_trait::async_trait;

/// Storage interface for workflow definitions.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Persist a new definition, assigning the next sequential id and version 1.
    async fn insert_definition(
        &self,
        definition: WorkflowDefinition,
    ) -> StorageResult<WorkflowDefinition>;

    /// Replace a definition if its stored version is `expected_version`;
    /// the stored copy gets `expected_version + 1`.
    async fn update_definition(
        &self,
        definition: WorkflowDefinition,
        expected_version: u32,
    ) -> StorageResult<WorkflowDefinition>;

    async fn get_definition(
        &self,
        id: WorkflowDefinitionId,
    ) -> StorageResult<Option<WorkflowDefinition>>;

    /// List definitions ordered by id, optionally for one module type.
    async fn list_definitions(
        &self,
        module_type: Option<ModuleType>,
    ) -> StorageResult<Vec<WorkflowDefinition>>;
}

/// Read interface for instances, their executions, history and outcomes.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn get_instance(&self, id: &ApprovalInstanceId)
        -> StorageResult<Option<ApprovalInstance>>;

    /// The running, returned or escalated instance for a record, if any.
    async fn active_instance_for(&self, record: RecordRef)
        -> StorageResult<Option<ApprovalInstance>>;

    /// All instances ever started for a record, newest first.
    async fn instances_for_record(&self, record: RecordRef) -> StorageResult<Vec<ApprovalInstance>>;

    /// Instances waiting on administrator intervention, oldest first.
    async fn escalated_instances(&self) -> StorageResult<Vec<ApprovalInstance>>;

    async fn get_execution(&self, id: &StepExecutionId) -> StorageResult<Option<StepExecution>>;

    /// Every execution of an instance in start order, closed ones included.
    async fn step_executions(
        &self,
        instance_id: &ApprovalInstanceId,
    ) -> StorageResult<Vec<StepExecution>>;

    /// History of an instance in sequence order.
    async fn history(&self, instance_id: &ApprovalInstanceId) -> StorageResult<Vec<HistoryEntry>>;

    /// Terminal outcomes not yet acknowledged by the record store.
    async fn pending_outcomes(&self) -> StorageResult<Vec<PendingOutcome>>;

    /// Drop a delivered outcome. Acknowledging twice is not an error.
    async fn acknowledge_outcome(&self, instance_id: &ApprovalInstanceId) -> StorageResult<()>;
}

/// Read interface for todos.
#[async_trait]
pub trait TodoStore: Send + Sync {
    async fn get_todo(&self, id: &TodoId) -> StorageResult<Option<Todo>>;

    async fn todo_by_token(&self, token: &TaskToken) -> StorageResult<Option<Todo>>;

    /// Todos owned by `owner` whose status is in `statuses`
    /// (every status when `statuses` is empty).
    async fn todos_for_owner(
        &self,
        owner: &UserId,
        statuses: &[TodoStatus],
    ) -> StorageResult<Vec<Todo>>;

    async fn todos_for_instance(&self, instance_id: &ApprovalInstanceId) -> StorageResult<Vec<Todo>>;
}

/// Atomic write path for state-machine transitions.
#[async_trait]
pub trait ChangeStore: Send + Sync {
    /// Apply every write in `changes` or none of them.
    ///
    /// Fails with `Conflict` when any expected version is stale and with
    /// `ActiveInstanceExists` when the write would leave two active
    /// instances for one record.
    async fn commit(&self, changes: ChangeSet) -> StorageResult<()>;
}

/// Unified storage bundle used by the approval engine.
pub trait ApprovalStore: DefinitionStore + InstanceStore + TodoStore + ChangeStore + Send + Sync {}

impl<T> ApprovalStore for T where
    T: DefinitionStore + InstanceStore + TodoStore + ChangeStore + Send + Sync
{
}
