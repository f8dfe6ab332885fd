//! Todos: trackable units of work owned by one actor
//!
//! Status only moves forward: `pending → in_progress → {completed, cancelled}`
//! (skipping `in_progress` is allowed). Terminal todos never re-open.

use crate::{
    ApprovalError, ApprovalInstanceId, ApprovalResult, RecordRef, StepExecutionId,
    UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Identifiers ──────────────────────────────────────────────────────

/// Unique identifier for a todo
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TodoId(pub String);

impl TodoId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for TodoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Single-use token an actor presents to decide an approval todo
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskToken(pub String);

impl TaskToken {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl std::fmt::Display for TaskToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Enumerations ─────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoKind {
    Approval,
    Task,
}

/// Todo priority; ordered from `Low` to `Urgent`
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TodoPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TodoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 1,
            Self::Completed | Self::Cancelled => 2,
        }
    }

    /// Open todos still expect action from their owner
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Only strictly forward moves out of an open status are permitted
    pub fn can_transition_to(&self, next: TodoStatus) -> bool {
        self.is_open() && next.rank() > self.rank()
    }
}

impl std::fmt::Display for TodoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TodoStatus {
    type Err = ApprovalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ApprovalError::UnknownTodoStatus(other.to_string())),
        }
    }
}

// ── Approval Link ────────────────────────────────────────────────────

/// Binds an approval todo to the step execution it decides
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalLink {
    pub instance_id: ApprovalInstanceId,
    pub step_index: usize,
    pub execution_id: StepExecutionId,
    pub task_token: TaskToken,
}

// ── Todo ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Todo {
    pub id: TodoId,
    pub kind: TodoKind,
    pub owner_id: UserId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub priority: TodoPriority,
    pub status: TodoStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<RecordRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalLink>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Optimistic-concurrency version, maintained by the store
    #[serde(default)]
    pub version: u64,
}

impl Todo {
    /// Create an approval todo for one resolved actor of a step
    pub fn approval(
        owner_id: UserId,
        title: impl Into<String>,
        record: RecordRef,
        priority: TodoPriority,
        link: ApprovalLink,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TodoId::generate(),
            kind: TodoKind::Approval,
            owner_id,
            title: title.into(),
            description: String::new(),
            priority,
            status: TodoStatus::Pending,
            record: Some(record),
            approval: Some(link),
            comment: None,
            due_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            version: 0,
        }
    }

    /// Create a free-standing task
    pub fn task(owner_id: UserId, title: impl Into<String>, priority: TodoPriority) -> Self {
        let now = Utc::now();
        Self {
            id: TodoId::generate(),
            kind: TodoKind::Task,
            owner_id,
            title: title.into(),
            description: String::new(),
            priority,
            status: TodoStatus::Pending,
            record: None,
            approval: None,
            comment: None,
            due_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            version: 0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn task_token(&self) -> Option<&TaskToken> {
        self.approval.as_ref().map(|l| &l.task_token)
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    /// Move to `next`, enforcing the forward-only status order
    pub fn transition(&mut self, next: TodoStatus) -> ApprovalResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(ApprovalError::InvalidTodoTransition {
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        self.status = next;
        self.updated_at = now;
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Snapshot handed to the notification channel
    pub fn snapshot(&self) -> TodoSnapshot {
        TodoSnapshot {
            todo_id: self.id.clone(),
            kind: self.kind,
            owner_id: self.owner_id.clone(),
            title: self.title.clone(),
            status: self.status,
            priority: self.priority,
            record: self.record,
            instance_id: self.approval.as_ref().map(|l| l.instance_id.clone()),
            step_index: self.approval.as_ref().map(|l| l.step_index),
            at: self.updated_at,
        }
    }
}

// ── Stats & Snapshots ────────────────────────────────────────────────

/// Per-owner todo counters; cancelled todos are never counted
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoStats {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    /// Urgent todos that are still `pending`
    pub urgent: usize,
}

impl TodoStats {
    pub fn tally<'a>(todos: impl IntoIterator<Item = &'a Todo>) -> Self {
        let mut stats = Self::default();
        for todo in todos {
            match todo.status {
                TodoStatus::Pending => {
                    stats.pending += 1;
                    if todo.priority == TodoPriority::Urgent {
                        stats.urgent += 1;
                    }
                }
                TodoStatus::InProgress => stats.in_progress += 1,
                TodoStatus::Completed => stats.completed += 1,
                TodoStatus::Cancelled => {}
            }
        }
        stats
    }
}

/// What the notification channel sees of a todo
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TodoSnapshot {
    pub todo_id: TodoId,
    pub kind: TodoKind,
    pub owner_id: UserId,
    pub title: String,
    pub status: TodoStatus,
    pub priority: TodoPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<RecordRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<ApprovalInstanceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_task(priority: TodoPriority) -> Todo {
        Todo::task(UserId::new("owner"), "Call customer", priority)
    }

    #[test]
    fn test_forward_transitions() {
        let mut todo = make_task(TodoPriority::High);
        todo.transition(TodoStatus::InProgress).unwrap();
        todo.transition(TodoStatus::Completed).unwrap();
        assert!(todo.completed_at.is_some());

        let mut todo = make_task(TodoPriority::High);
        todo.transition(TodoStatus::Cancelled).unwrap();
        assert_eq!(todo.status, TodoStatus::Cancelled);
    }

    #[test]
    fn test_terminal_todos_never_reopen() {
        let mut todo = make_task(TodoPriority::Low);
        todo.transition(TodoStatus::Completed).unwrap();

        for next in [
            TodoStatus::Pending,
            TodoStatus::InProgress,
            TodoStatus::Completed,
            TodoStatus::Cancelled,
        ] {
            let result = todo.transition(next);
            assert!(matches!(
                result,
                Err(ApprovalError::InvalidTodoTransition { .. })
            ));
        }
        assert_eq!(todo.status, TodoStatus::Completed);
    }

    #[test]
    fn test_no_backward_or_self_transitions() {
        let mut todo = make_task(TodoPriority::Low);
        assert!(todo.transition(TodoStatus::Pending).is_err());
        todo.transition(TodoStatus::InProgress).unwrap();
        assert!(todo.transition(TodoStatus::Pending).is_err());
        assert!(todo.transition(TodoStatus::InProgress).is_err());
    }

    #[test]
    fn test_stats_tally() {
        let mut todos = vec![
            make_task(TodoPriority::Urgent),
            make_task(TodoPriority::Low),
            make_task(TodoPriority::Medium),
        ];
        let mut started = make_task(TodoPriority::Urgent);
        started.transition(TodoStatus::InProgress).unwrap();
        todos.push(started);
        for _ in 0..2 {
            let mut done = make_task(TodoPriority::Urgent);
            done.transition(TodoStatus::Completed).unwrap();
            todos.push(done);
        }
        let mut cancelled = make_task(TodoPriority::Urgent);
        cancelled.transition(TodoStatus::Cancelled).unwrap();
        todos.push(cancelled);

        let stats = TodoStats::tally(&todos);
        assert_eq!(
            stats,
            TodoStats {
                pending: 3,
                in_progress: 1,
                completed: 2,
                urgent: 1,
            }
        );
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("in_progress".parse::<TodoStatus>().unwrap(), TodoStatus::InProgress);
        assert!(matches!(
            "done".parse::<TodoStatus>(),
            Err(ApprovalError::UnknownTodoStatus(s)) if s == "done"
        ));
    }

    #[test]
    fn test_stats_serialize_camel_case() {
        let json = serde_json::to_value(TodoStats::default()).unwrap();
        assert!(json.get("inProgress").is_some());
    }

    #[test]
    fn test_priority_order() {
        assert!(TodoPriority::Urgent > TodoPriority::High);
        assert!(TodoPriority::High > TodoPriority::Medium);
        assert!(TodoPriority::Medium > TodoPriority::Low);
    }
}
