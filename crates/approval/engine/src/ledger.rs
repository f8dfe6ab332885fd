//! Todo ledger: per-actor work items and their lifecycle
//!
//! Approval todos are created and closed by the state machine as part of
//! a transition. The ledger owns everything else: free-standing tasks,
//! the `in_progress` hand-off, inbox reads and per-owner counters.

use crate::notify::NotificationOutbox;
use approval_store::{ApprovalStore, ChangeSet};
use approval_types::{
    ApprovalError, ApprovalResult, RecordRef, Todo, TodoId, TodoKind, TodoPriority, TodoStats,
    TodoStatus, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::sync::Arc;

/// Input for a free-standing task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub owner_id: UserId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: TodoPriority,
    #[serde(default)]
    pub record: Option<RecordRef>,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
}

impl NewTask {
    pub fn new(owner_id: UserId, title: impl Into<String>) -> Self {
        Self {
            owner_id,
            title: title.into(),
            description: String::new(),
            priority: TodoPriority::default(),
            record: None,
            due_at: None,
        }
    }

    pub fn with_priority(mut self, priority: TodoPriority) -> Self {
        self.priority = priority;
        self
    }
}

/// Persistent store of todos
#[derive(Clone)]
pub struct TodoLedger {
    store: Arc<dyn ApprovalStore>,
    outbox: NotificationOutbox,
}

impl TodoLedger {
    pub fn new(store: Arc<dyn ApprovalStore>, outbox: NotificationOutbox) -> Self {
        Self { store, outbox }
    }

    /// Persist a new todo
    pub async fn create(&self, mut todo: Todo) -> ApprovalResult<TodoId> {
        if todo.title.trim().is_empty() {
            return Err(ApprovalError::InvalidTodo("title must not be empty".into()));
        }
        if todo.status != TodoStatus::Pending {
            return Err(ApprovalError::InvalidTodo(format!(
                "new todos start pending, not {}",
                todo.status
            )));
        }
        todo.version = 0;

        let mut changes = ChangeSet::new();
        changes.insert_todo(todo.clone());
        self.store.commit(changes).await?;

        tracing::info!(
            todo_id = %todo.id,
            owner = %todo.owner_id,
            priority = ?todo.priority,
            "Todo created"
        );
        self.outbox.enqueue(todo.snapshot());
        Ok(todo.id)
    }

    /// Create a free-standing task todo
    pub async fn create_task(&self, task: NewTask) -> ApprovalResult<Todo> {
        let mut todo =
            Todo::task(task.owner_id, task.title, task.priority).with_description(task.description);
        todo.record = task.record;
        todo.due_at = task.due_at;
        let id = self.create(todo).await?;
        self.get(&id).await
    }

    pub async fn get(&self, id: &TodoId) -> ApprovalResult<Todo> {
        self.store
            .get_todo(id)
            .await?
            .ok_or_else(|| ApprovalError::TodoNotFound(id.clone()))
    }

    /// Single-todo read on behalf of its owner.
    ///
    /// Other actors get `NotTodoOwner`; cancelled todos read as missing,
    /// as they do in the inbox.
    pub async fn get_for_owner(&self, id: &TodoId, owner: &UserId) -> ApprovalResult<Todo> {
        let todo = self.owned_by(id, owner).await?;
        if todo.status == TodoStatus::Cancelled {
            return Err(ApprovalError::TodoNotFound(id.clone()));
        }
        Ok(todo)
    }

    /// Move a todo along its status order.
    ///
    /// Approval todos may only be taken into `in_progress` here; they are
    /// closed by decisions.
    pub async fn transition(&self, id: &TodoId, next: TodoStatus) -> ApprovalResult<Todo> {
        let todo = self.get(id).await?;
        if todo.kind == TodoKind::Approval && next.is_terminal() {
            return Err(ApprovalError::NotTaskTodo(id.clone()));
        }
        self.apply(todo, next, None).await
    }

    /// `pending → in_progress`, by the todo's owner
    pub async fn start(&self, id: &TodoId, actor: &UserId) -> ApprovalResult<Todo> {
        let todo = self.owned_by(id, actor).await?;
        self.apply(todo, TodoStatus::InProgress, None).await
    }

    /// Complete a free-standing task, bypassing the step machine
    pub async fn complete_task(
        &self,
        id: &TodoId,
        actor: &UserId,
        comment: Option<String>,
    ) -> ApprovalResult<Todo> {
        let todo = self.owned_task(id, actor).await?;
        self.apply(todo, TodoStatus::Completed, comment).await
    }

    pub async fn cancel_task(&self, id: &TodoId, actor: &UserId) -> ApprovalResult<Todo> {
        let todo = self.owned_task(id, actor).await?;
        self.apply(todo, TodoStatus::Cancelled, None).await
    }

    /// Counters for one owner; `urgent` counts pending urgent todos only
    pub async fn stats(&self, owner: &UserId) -> ApprovalResult<TodoStats> {
        let todos = self.store.todos_for_owner(owner, &[]).await?;
        Ok(TodoStats::tally(todos.iter().filter(|t| &t.owner_id == owner)))
    }

    /// Inbox read for one owner.
    ///
    /// An empty filter means every visible status. Cancelled todos are
    /// never returned, even when asked for. Urgent first, then oldest first.
    pub async fn list_for_owner(
        &self,
        owner: &UserId,
        statuses: &[TodoStatus],
    ) -> ApprovalResult<Vec<Todo>> {
        let wanted = if statuses.is_empty() {
            vec![
                TodoStatus::Pending,
                TodoStatus::InProgress,
                TodoStatus::Completed,
            ]
        } else {
            statuses
                .iter()
                .copied()
                .filter(|s| *s != TodoStatus::Cancelled)
                .collect()
        };
        if wanted.is_empty() {
            return Ok(Vec::new());
        }

        let mut todos = self
            .store
            .todos_for_owner(owner, &wanted)
            .await?
            .into_iter()
            .filter(|t| &t.owner_id == owner && t.status != TodoStatus::Cancelled)
            .collect::<Vec<_>>();
        todos.sort_by_key(|t| (Reverse(t.priority), t.created_at));
        Ok(todos)
    }

    async fn owned_by(&self, id: &TodoId, actor: &UserId) -> ApprovalResult<Todo> {
        let todo = self.get(id).await?;
        if &todo.owner_id != actor {
            return Err(ApprovalError::NotTodoOwner {
                todo: id.clone(),
                actor: actor.to_string(),
            });
        }
        Ok(todo)
    }

    async fn owned_task(&self, id: &TodoId, actor: &UserId) -> ApprovalResult<Todo> {
        let todo = self.owned_by(id, actor).await?;
        if todo.kind != TodoKind::Task {
            return Err(ApprovalError::NotTaskTodo(id.clone()));
        }
        Ok(todo)
    }

    async fn apply(
        &self,
        mut todo: Todo,
        next: TodoStatus,
        comment: Option<String>,
    ) -> ApprovalResult<Todo> {
        if let Err(err) = todo.transition(next) {
            tracing::error!(todo_id = %todo.id, error = %err, "Rejected todo transition");
            return Err(err);
        }
        if comment.is_some() {
            todo.comment = comment;
        }

        let mut changes = ChangeSet::new();
        changes.update_todo(todo.clone());
        self.store.commit(changes).await?;
        todo.version += 1;

        tracing::info!(todo_id = %todo.id, status = %todo.status, "Todo transitioned");
        self.outbox.enqueue(todo.snapshot());
        Ok(todo)
    }
}
