//! In-memory reference implementation of the approval storage traits.
//!
//! All state sits behind one `RwLock`, so a commit validates every expected
//! version and uniqueness rule before it applies anything. Deterministic and
//! test-friendly; production deployments should use the PostgreSQL backend.

use crate::model::{ChangeSet, Versioned};
use crate::traits::{ChangeStore, DefinitionStore, InstanceStore, TodoStore};
use crate::{StorageError, StorageResult};
use approval_types::{
    ApprovalInstance, ApprovalInstanceId, HistoryEntry, InstanceStatus, ModuleType,
    PendingOutcome, RecordRef, StepExecution, StepExecutionId, TaskToken, Todo, TodoId,
    TodoStatus, UserId, WorkflowDefinition, WorkflowDefinitionId,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

#[derive(Default)]
struct State {
    definitions: BTreeMap<u64, WorkflowDefinition>,
    instances: HashMap<ApprovalInstanceId, ApprovalInstance>,
    active_by_record: HashMap<RecordRef, ApprovalInstanceId>,
    executions: HashMap<StepExecutionId, StepExecution>,
    todos: HashMap<TodoId, Todo>,
    tokens: HashMap<TaskToken, TodoId>,
    history: HashMap<ApprovalInstanceId, Vec<HistoryEntry>>,
    outcomes: HashMap<ApprovalInstanceId, PendingOutcome>,
}

/// In-memory approval storage adapter.
#[derive(Default)]
pub struct InMemoryApprovalStore {
    state: RwLock<State>,
}

impl InMemoryApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StorageResult<std::sync::RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StorageError::Backend("approval state lock poisoned".to_string()))
    }

    fn write(&self) -> StorageResult<std::sync::RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StorageError::Backend("approval state lock poisoned".to_string()))
    }
}

#[async_trait]
impl DefinitionStore for InMemoryApprovalStore {
    async fn insert_definition(
        &self,
        mut definition: WorkflowDefinition,
    ) -> StorageResult<WorkflowDefinition> {
        let mut guard = self.write()?;
        let next_id = guard.definitions.keys().next_back().map_or(1, |id| id + 1);
        definition.id = WorkflowDefinitionId::new(next_id);
        definition.version = 1;
        guard.definitions.insert(next_id, definition.clone());
        Ok(definition)
    }

    async fn update_definition(
        &self,
        mut definition: WorkflowDefinition,
        expected_version: u32,
    ) -> StorageResult<WorkflowDefinition> {
        let mut guard = self.write()?;
        let stored = guard.definitions.get_mut(&definition.id.0).ok_or_else(|| {
            StorageError::NotFound(format!("workflow definition {} not found", definition.id))
        })?;
        if stored.version != expected_version {
            return Err(StorageError::Conflict(format!(
                "workflow definition {}: expected version {}, found {}",
                definition.id, expected_version, stored.version
            )));
        }
        definition.version = expected_version + 1;
        definition.created_at = stored.created_at;
        *stored = definition.clone();
        Ok(definition)
    }

    async fn get_definition(
        &self,
        id: WorkflowDefinitionId,
    ) -> StorageResult<Option<WorkflowDefinition>> {
        let guard = self.read()?;
        Ok(guard.definitions.get(&id.0).cloned())
    }

    async fn list_definitions(
        &self,
        module_type: Option<ModuleType>,
    ) -> StorageResult<Vec<WorkflowDefinition>> {
        let guard = self.read()?;
        Ok(guard
            .definitions
            .values()
            .filter(|d| module_type.map_or(true, |mt| d.module_type == mt))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl InstanceStore for InMemoryApprovalStore {
    async fn get_instance(
        &self,
        id: &ApprovalInstanceId,
    ) -> StorageResult<Option<ApprovalInstance>> {
        let guard = self.read()?;
        Ok(guard.instances.get(id).cloned())
    }

    async fn active_instance_for(
        &self,
        record: RecordRef,
    ) -> StorageResult<Option<ApprovalInstance>> {
        let guard = self.read()?;
        Ok(guard
            .active_by_record
            .get(&record)
            .and_then(|id| guard.instances.get(id))
            .cloned())
    }

    async fn instances_for_record(
        &self,
        record: RecordRef,
    ) -> StorageResult<Vec<ApprovalInstance>> {
        let guard = self.read()?;
        let mut values = guard
            .instances
            .values()
            .filter(|i| i.record() == record)
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(values)
    }

    async fn escalated_instances(&self) -> StorageResult<Vec<ApprovalInstance>> {
        let guard = self.read()?;
        let mut values = guard
            .instances
            .values()
            .filter(|i| i.status == InstanceStatus::EscalationNeeded)
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        Ok(values)
    }

    async fn get_execution(&self, id: &StepExecutionId) -> StorageResult<Option<StepExecution>> {
        let guard = self.read()?;
        Ok(guard.executions.get(id).cloned())
    }

    async fn step_executions(
        &self,
        instance_id: &ApprovalInstanceId,
    ) -> StorageResult<Vec<StepExecution>> {
        let guard = self.read()?;
        let mut values = guard
            .executions
            .values()
            .filter(|e| &e.instance_id == instance_id)
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(values)
    }

    async fn history(&self, instance_id: &ApprovalInstanceId) -> StorageResult<Vec<HistoryEntry>> {
        let guard = self.read()?;
        Ok(guard.history.get(instance_id).cloned().unwrap_or_default())
    }

    async fn pending_outcomes(&self) -> StorageResult<Vec<PendingOutcome>> {
        let guard = self.read()?;
        let mut values = guard.outcomes.values().cloned().collect::<Vec<_>>();
        values.sort_by(|a, b| a.resolved_at.cmp(&b.resolved_at));
        Ok(values)
    }

    async fn acknowledge_outcome(&self, instance_id: &ApprovalInstanceId) -> StorageResult<()> {
        let mut guard = self.write()?;
        guard.outcomes.remove(instance_id);
        Ok(())
    }
}

#[async_trait]
impl TodoStore for InMemoryApprovalStore {
    async fn get_todo(&self, id: &TodoId) -> StorageResult<Option<Todo>> {
        let guard = self.read()?;
        Ok(guard.todos.get(id).cloned())
    }

    async fn todo_by_token(&self, token: &TaskToken) -> StorageResult<Option<Todo>> {
        let guard = self.read()?;
        Ok(guard
            .tokens
            .get(token)
            .and_then(|id| guard.todos.get(id))
            .cloned())
    }

    async fn todos_for_owner(
        &self,
        owner: &UserId,
        statuses: &[TodoStatus],
    ) -> StorageResult<Vec<Todo>> {
        let guard = self.read()?;
        let mut values = guard
            .todos
            .values()
            .filter(|t| &t.owner_id == owner)
            .filter(|t| statuses.is_empty() || statuses.contains(&t.status))
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(values)
    }

    async fn todos_for_instance(
        &self,
        instance_id: &ApprovalInstanceId,
    ) -> StorageResult<Vec<Todo>> {
        let guard = self.read()?;
        let mut values = guard
            .todos
            .values()
            .filter(|t| {
                t.approval
                    .as_ref()
                    .is_some_and(|link| &link.instance_id == instance_id)
            })
            .cloned()
            .collect::<Vec<_>>();
        values.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(values)
    }
}

#[async_trait]
impl ChangeStore for InMemoryApprovalStore {
    async fn commit(&self, changes: ChangeSet) -> StorageResult<()> {
        let mut guard = self.write()?;
        validate(&guard, &changes)?;
        apply(&mut guard, changes);
        Ok(())
    }
}

fn check_version(
    kind: &str,
    id: &dyn std::fmt::Display,
    stored: u64,
    expected: u64,
) -> StorageResult<()> {
    if stored != expected {
        return Err(StorageError::Conflict(format!(
            "{kind} {id}: expected version {expected}, found {stored}"
        )));
    }
    Ok(())
}

fn validate(state: &State, changes: &ChangeSet) -> StorageResult<()> {
    if let Some(write) = &changes.instance {
        let instance = write.value();
        match write {
            Versioned::Insert(_) => {
                if state.instances.contains_key(&instance.id) {
                    return Err(StorageError::Conflict(format!(
                        "approval instance {} already exists",
                        instance.id
                    )));
                }
            }
            Versioned::Update {
                expected_version, ..
            } => {
                let stored = state.instances.get(&instance.id).ok_or_else(|| {
                    StorageError::NotFound(format!("approval instance {} not found", instance.id))
                })?;
                check_version("approval instance", &instance.id, stored.version, *expected_version)?;
                if stored.is_terminal() {
                    return Err(StorageError::InvariantViolation(format!(
                        "approval instance {} is {} and immutable",
                        instance.id, stored.status
                    )));
                }
            }
        }
        if instance.is_active() {
            if let Some(existing) = state.active_by_record.get(&instance.record()) {
                if existing != &instance.id {
                    return Err(StorageError::ActiveInstanceExists(existing.clone()));
                }
            }
        }
    }

    for write in &changes.executions {
        let execution = write.value();
        match write {
            Versioned::Insert(_) => {
                if state.executions.contains_key(&execution.id) {
                    return Err(StorageError::Conflict(format!(
                        "step execution {} already exists",
                        execution.id
                    )));
                }
            }
            Versioned::Update {
                expected_version, ..
            } => {
                let stored = state.executions.get(&execution.id).ok_or_else(|| {
                    StorageError::NotFound(format!("step execution {} not found", execution.id))
                })?;
                check_version("step execution", &execution.id, stored.version, *expected_version)?;
                if !stored.open {
                    return Err(StorageError::InvariantViolation(format!(
                        "step execution {} is closed",
                        execution.id
                    )));
                }
            }
        }
    }

    for write in &changes.todos {
        let todo = write.value();
        match write {
            Versioned::Insert(_) => {
                if state.todos.contains_key(&todo.id) {
                    return Err(StorageError::Conflict(format!(
                        "todo {} already exists",
                        todo.id
                    )));
                }
                if let Some(token) = todo.task_token() {
                    if state.tokens.contains_key(token) {
                        return Err(StorageError::InvalidInput(format!(
                            "task token {} already issued",
                            token
                        )));
                    }
                }
            }
            Versioned::Update {
                expected_version, ..
            } => {
                let stored = state.todos.get(&todo.id).ok_or_else(|| {
                    StorageError::NotFound(format!("todo {} not found", todo.id))
                })?;
                check_version("todo", &todo.id, stored.version, *expected_version)?;
                if stored.status.is_terminal() {
                    return Err(StorageError::InvariantViolation(format!(
                        "todo {} is {} and cannot change",
                        todo.id, stored.status
                    )));
                }
            }
        }
    }

    for entry in &changes.history {
        let known = state.instances.contains_key(&entry.instance_id)
            || changes.instance_id() == Some(&entry.instance_id);
        if !known {
            return Err(StorageError::NotFound(format!(
                "approval instance {} not found for history append",
                entry.instance_id
            )));
        }
    }

    Ok(())
}

fn apply(state: &mut State, changes: ChangeSet) {
    if let Some(write) = changes.instance {
        let version = write.next_version();
        let mut instance = write.into_value();
        instance.version = version;
        let record = instance.record();
        if state.active_by_record.get(&record) == Some(&instance.id) && !instance.is_active() {
            state.active_by_record.remove(&record);
        }
        if instance.is_active() {
            state.active_by_record.insert(record, instance.id.clone());
        }
        state.instances.insert(instance.id.clone(), instance);
    }

    for write in changes.executions {
        let version = write.next_version();
        let mut execution = write.into_value();
        execution.version = version;
        state.executions.insert(execution.id.clone(), execution);
    }

    for write in changes.todos {
        let version = write.next_version();
        let mut todo = write.into_value();
        todo.version = version;
        if let Some(token) = todo.task_token() {
            state.tokens.insert(token.clone(), todo.id.clone());
        }
        state.todos.insert(todo.id.clone(), todo);
    }

    for append in changes.history {
        let entries = state.history.entry(append.instance_id.clone()).or_default();
        let sequence = entries.len() as u64;
        entries.push(HistoryEntry::from_append(sequence, append));
    }

    if let Some(outcome) = changes.outcome {
        state.outcomes.insert(outcome.instance_id.clone(), outcome);
    }
}
