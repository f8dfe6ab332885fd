#![allow(dead_code)]

use approval_engine::{
    ApprovalEngine, DirectoryUser, EngineConfig, InMemoryDirectory, LoggingDispatcher, RecordStore,
    RecordStoreError,
};
use approval_store::memory::InMemoryApprovalStore;
use approval_types::{
    ApprovalInstance, ApprovalMode, ApprovalOutcome, ApproverSpec, ModuleType, RecordRef,
    TaskToken, TodoStatus, UserId, WorkflowDefinition,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Record store that remembers every callback and can be told to fail
#[derive(Default)]
pub struct CollectingRecordStore {
    pub outcomes: Mutex<Vec<(RecordRef, ApprovalOutcome)>>,
    failures_left: AtomicUsize,
}

impl CollectingRecordStore {
    pub fn failing(times: usize) -> Self {
        Self {
            outcomes: Mutex::new(Vec::new()),
            failures_left: AtomicUsize::new(times),
        }
    }

    pub fn received(&self) -> Vec<(RecordRef, ApprovalOutcome)> {
        self.outcomes.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordStore for CollectingRecordStore {
    async fn on_approval_resolved(
        &self,
        record: RecordRef,
        outcome: ApprovalOutcome,
    ) -> Result<(), RecordStoreError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RecordStoreError::Unavailable("record store offline".into()));
        }
        self.outcomes.lock().unwrap().push((record, outcome));
        Ok(())
    }
}

pub struct Harness {
    pub engine: Arc<ApprovalEngine>,
    pub records: Arc<CollectingRecordStore>,
    pub directory: Arc<InMemoryDirectory>,
}

pub fn harness() -> Harness {
    harness_with(CollectingRecordStore::default())
}

/// Users `a` and `b` are sales managers, `c` is in finance, `d` is a
/// deactivated finance user and `e` holds no role.
pub fn harness_with(records: CollectingRecordStore) -> Harness {
    let directory = Arc::new(InMemoryDirectory::from_users([
        DirectoryUser::new("a").with_role("sales_manager"),
        DirectoryUser::new("b").with_role("sales_manager"),
        DirectoryUser::new("c").with_role("finance"),
        DirectoryUser::new("d").with_role("finance").inactive(),
        DirectoryUser::new("e"),
    ]));
    let records = Arc::new(records);
    let engine = ApprovalEngine::new(
        Arc::new(InMemoryApprovalStore::new()),
        directory.clone(),
        records.clone(),
        Arc::new(LoggingDispatcher),
        EngineConfig::default(),
    );
    Harness {
        engine: Arc::new(engine),
        records,
        directory,
    }
}

pub fn user(id: &str) -> UserId {
    UserId::new(id)
}

/// Step 0: {a, b} any. Step 1: {c} all.
pub fn two_step_contract_review() -> WorkflowDefinition {
    WorkflowDefinition::new("Contract review", ModuleType::Contract)
        .with_step("Sales", ApproverSpec::users(["a", "b"]), ApprovalMode::Any)
        .with_step("Finance", ApproverSpec::users(["c"]), ApprovalMode::All)
}

/// The open approval token `owner` holds for `instance`
pub async fn token_for(
    engine: &ApprovalEngine,
    owner: &str,
    instance: &ApprovalInstance,
) -> TaskToken {
    try_token_for(engine, owner, instance)
        .await
        .unwrap_or_else(|| panic!("{owner} has no open todo for {}", instance.id))
}

pub async fn try_token_for(
    engine: &ApprovalEngine,
    owner: &str,
    instance: &ApprovalInstance,
) -> Option<TaskToken> {
    engine
        .get_todos(&user(owner), &[TodoStatus::Pending, TodoStatus::InProgress])
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.approval.as_ref().map(|l| &l.instance_id) == Some(&instance.id))
        .find_map(|t| t.task_token().cloned())
}

/// Every open todo attached to `instance`, across all owners
pub async fn open_todos(engine: &ApprovalEngine, instance: &ApprovalInstance) -> usize {
    let mut count = 0;
    for owner in ["a", "b", "c", "d", "e"] {
        if try_token_for(engine, owner, instance).await.is_some() {
            count += 1;
        }
    }
    count
}

/// `(owner, step)` of every open todo attached to `instance`
pub async fn open_todo_steps(
    engine: &ApprovalEngine,
    instance: &ApprovalInstance,
) -> Vec<(String, usize)> {
    let mut steps = Vec::new();
    for owner in ["a", "b", "c", "d", "e"] {
        let todos = engine
            .get_todos(&user(owner), &[TodoStatus::Pending, TodoStatus::InProgress])
            .await
            .unwrap();
        steps.extend(todos.into_iter().filter_map(|t| {
            t.approval
                .filter(|l| l.instance_id == instance.id)
                .map(|l| (owner.to_string(), l.step_index))
        }));
    }
    steps
}
