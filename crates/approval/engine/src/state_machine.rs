//! Step state machine
//!
//! Pure transition logic over an in-memory working copy. Nothing here
//! touches the store: the engine loads state, lets the state machine
//! decide, then commits the resulting [`ChangeSet`] in one go.
//!
//! ```text
//! running(n) --approve, last step--> approved
//! running(n) --approve----------------> running(n+1)
//! running(n) --reject----------------> rejected
//! running(n) --return(t)-------------> returned_pending(t) --> running(t)
//! any activation without approvers --> escalation_needed(n)
//! ```

use approval_store::{ChangeSet, Versioned};
use approval_types::{
    ApprovalError, ApprovalInstance, ApprovalInstanceId, ApprovalLink, ApprovalOutcome,
    ApprovalResult, DecisionAction, HistoryAction, HistoryAppend, PendingOutcome, RecordRef,
    StepExecution, StepExecutionId, StepOutcome, TaskToken, Todo, TodoPriority, TodoStatus, UserId,
};
use std::collections::BTreeSet;

/// Priority given to approval todos
pub const APPROVAL_TODO_PRIORITY: TodoPriority = TodoPriority::High;

/// Working copy of everything one transition touches
#[derive(Debug, Clone)]
pub struct Transition {
    instance: ApprovalInstance,
    instance_is_new: bool,
    instance_touched: bool,
    executions: Vec<Versioned<StepExecution>>,
    todos: Vec<Versioned<Todo>>,
    history: Vec<HistoryAppend>,
    outcome: Option<PendingOutcome>,
}

impl Transition {
    /// Transition that inserts a freshly created instance
    pub fn new_instance(instance: ApprovalInstance) -> Self {
        Self {
            instance,
            instance_is_new: true,
            instance_touched: true,
            executions: Vec::new(),
            todos: Vec::new(),
            history: Vec::new(),
            outcome: None,
        }
    }

    /// Transition over an instance read from the store
    pub fn existing(instance: ApprovalInstance) -> Self {
        Self {
            instance_is_new: false,
            instance_touched: false,
            ..Self::new_instance(instance)
        }
    }

    pub fn instance(&self) -> &ApprovalInstance {
        &self.instance
    }

    fn instance_mut(&mut self) -> &mut ApprovalInstance {
        self.instance_touched = true;
        &mut self.instance
    }

    pub fn append(&mut self, entry: HistoryAppend) {
        self.history.push(entry);
    }

    pub fn outcome(&self) -> Option<&PendingOutcome> {
        self.outcome.as_ref()
    }

    /// Todos written by this transition, as they will look once committed
    pub fn written_todos(&self) -> Vec<Todo> {
        self.todos
            .iter()
            .map(|write| {
                let mut todo = write.value().clone();
                todo.version = write.next_version();
                todo
            })
            .collect()
    }

    /// The instance as it will look once committed
    pub fn committed_instance(&self) -> ApprovalInstance {
        let mut instance = self.instance.clone();
        if self.instance_is_new {
            instance.version = 1;
        } else if self.instance_touched {
            instance.version += 1;
        }
        instance
    }

    pub fn into_changes(self) -> ChangeSet {
        let instance = if self.instance_is_new {
            Some(Versioned::Insert(self.instance))
        } else if self.instance_touched {
            Some(Versioned::update(self.instance))
        } else {
            None
        };
        ChangeSet {
            instance,
            executions: self.executions,
            todos: self.todos,
            history: self.history,
            outcome: self.outcome,
        }
    }
}

/// Result of activating a step
#[derive(Debug, Clone, PartialEq)]
pub enum Activation {
    Activated {
        execution_id: StepExecutionId,
        actors: BTreeSet<UserId>,
    },
    /// No approver could be resolved; the instance awaits an administrator
    Escalated { reason: String },
}

/// What a recorded decision did to the instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionEffect {
    /// `all` mode with approvals still outstanding
    AwaitingOthers,
    /// Step approved; the next step must be activated
    Advance { next: usize },
    /// Sent back; the target step must be re-activated
    Return { target: usize },
    Resolved(ApprovalOutcome),
}

/// State loaded for one decision
#[derive(Debug, Clone)]
pub struct DecisionContext {
    pub execution: StepExecution,
    pub todo: Todo,
    /// Every other open todo of the instance
    pub other_open_todos: Vec<Todo>,
}

/// Transition logic for approval instances
#[derive(Clone, Copy, Debug, Default)]
pub struct StateMachine;

impl StateMachine {
    pub fn new() -> Self {
        Self
    }

    /// Transition for a record no active definition applies to
    pub fn auto_approve(
        &self,
        record: RecordRef,
        amount: f64,
        initiator: Option<UserId>,
    ) -> Transition {
        let instance = ApprovalInstance::auto_approved(record, amount, initiator.clone());
        let id = instance.id.clone();
        let outcome = PendingOutcome::for_instance(&instance);
        let mut transition = Transition::new_instance(instance);
        transition.append(started_entry(&id, initiator.as_ref()));
        transition.append(HistoryAppend::system(&id, HistoryAction::AutoApproved));
        transition.outcome = outcome;
        transition
    }

    /// Activate step `index` with the resolver's answer.
    ///
    /// `UnresolvableApprovers` moves the instance to `escalation_needed`;
    /// any other resolver failure aborts the transition.
    pub fn activate_step(
        &self,
        transition: &mut Transition,
        index: usize,
        resolution: ApprovalResult<BTreeSet<UserId>>,
    ) -> ApprovalResult<Activation> {
        let step = transition.instance.steps.get(index).cloned().ok_or_else(|| {
            ApprovalError::InvalidDefinition(format!(
                "instance {} has no step {}",
                transition.instance.id, index
            ))
        })?;

        let actors = match resolution {
            Ok(actors) => actors,
            Err(ApprovalError::UnresolvableApprovers(reason)) => {
                let instance = transition.instance_mut();
                instance.current_step_index = index;
                instance.escalate();
                let id = instance.id.clone();
                transition.append(
                    HistoryAppend::system(&id, HistoryAction::EscalationNeeded)
                        .at_step(index)
                        .with_comment(Some(reason.clone())),
                );
                return Ok(Activation::Escalated { reason });
            }
            Err(err) => return Err(err),
        };

        let instance = transition.instance_mut();
        instance.enter_step(index);
        let instance_id = instance.id.clone();
        let record = instance.record();

        let execution = StepExecution::open(
            instance_id.clone(),
            index,
            step.approval_mode,
            actors.iter().cloned(),
        );
        let execution_id = execution.id.clone();

        for actor in &actors {
            let link = ApprovalLink {
                instance_id: instance_id.clone(),
                step_index: index,
                execution_id: execution_id.clone(),
                task_token: TaskToken::generate(),
            };
            let todo = Todo::approval(
                actor.clone(),
                format!("Approval required for {}: {}", record, step.name),
                record,
                APPROVAL_TODO_PRIORITY,
                link,
            );
            transition.todos.push(Versioned::Insert(todo));
        }
        transition.executions.push(Versioned::Insert(execution));
        transition.append(
            HistoryAppend::system(&instance_id, HistoryAction::StepActivated)
                .at_step(index)
                .with_comment(Some(format!(
                    "{} ({} approver(s), {:?})",
                    step.name,
                    actors.len(),
                    step.approval_mode
                ))),
        );

        Ok(Activation::Activated {
            execution_id,
            actors,
        })
    }

    /// Record one actor's decision against the current step.
    ///
    /// The caller has already checked that the todo is open, owned by the
    /// actor and bound to the instance's current, open execution.
    pub fn apply_decision(
        &self,
        transition: &mut Transition,
        context: DecisionContext,
        action: DecisionAction,
        comment: Option<String>,
        return_target: Option<usize>,
    ) -> ApprovalResult<DecisionEffect> {
        let DecisionContext {
            mut execution,
            mut todo,
            other_open_todos,
        } = context;
        let step_index = execution.step_index;
        let instance_id = transition.instance.id.clone();
        let actor = todo.owner_id.clone();
        let token = todo
            .task_token()
            .cloned()
            .ok_or_else(|| ApprovalError::NotApprovalTodo(todo.id.clone()))?;

        let target = match action {
            DecisionAction::Return => {
                let target = return_target.unwrap_or(0);
                if target > transition.instance.current_step_index {
                    return Err(ApprovalError::InvalidReturnTarget {
                        target,
                        current: transition.instance.current_step_index,
                    });
                }
                Some(target)
            }
            _ => None,
        };

        execution.record(&actor, action.actor_decision(), comment.clone(), &token)?;
        let expected = todo.version;
        todo.comment = comment.clone();
        todo.transition(TodoStatus::Completed)?;
        transition.todos.push(Versioned::Update {
            expected_version: expected,
            value: todo,
        });

        let history_action = match action {
            DecisionAction::Approve => HistoryAction::Approved,
            DecisionAction::Reject => HistoryAction::Rejected,
            DecisionAction::Return => HistoryAction::Returned,
        };
        transition.append(
            HistoryAppend::by(&instance_id, &actor, history_action)
                .at_step(step_index)
                .with_comment(comment),
        );

        let effect = match action {
            DecisionAction::Approve if !execution.is_satisfied() => {
                transition.executions.push(Versioned::update(execution));
                return Ok(DecisionEffect::AwaitingOthers);
            }
            DecisionAction::Approve => {
                execution.close(StepOutcome::Approved);
                // Only this step's siblings remain open at this point.
                self.cancel_todos(transition, other_open_todos, step_index);
                if transition.instance.is_last_step(step_index) {
                    self.resolve(transition, ApprovalOutcome::Approved);
                    DecisionEffect::Resolved(ApprovalOutcome::Approved)
                } else {
                    DecisionEffect::Advance {
                        next: step_index + 1,
                    }
                }
            }
            DecisionAction::Reject => {
                execution.close(StepOutcome::Rejected);
                self.cancel_todos(transition, other_open_todos, step_index);
                self.resolve(transition, ApprovalOutcome::Rejected);
                DecisionEffect::Resolved(ApprovalOutcome::Rejected)
            }
            DecisionAction::Return => {
                let target = target.unwrap_or(0);
                execution.close(StepOutcome::Returned { target });
                self.cancel_todos(transition, other_open_todos, step_index);
                transition.instance_mut().return_to(target);
                DecisionEffect::Return { target }
            }
        };

        transition.append(
            HistoryAppend::system(&instance_id, HistoryAction::StepClosed).at_step(step_index),
        );
        transition.executions.push(Versioned::update(execution));
        Ok(effect)
    }

    fn cancel_todos(&self, transition: &mut Transition, todos: Vec<Todo>, step_index: usize) {
        let instance_id = transition.instance.id.clone();
        for mut todo in todos {
            let expected = todo.version;
            if todo.transition(TodoStatus::Cancelled).is_err() {
                continue;
            }
            transition.append(
                HistoryAppend::system(&instance_id, HistoryAction::TodoCancelled)
                    .at_step(step_index)
                    .with_comment(Some(format!("todo {} of {}", todo.id, todo.owner_id))),
            );
            transition.todos.push(Versioned::Update {
                expected_version: expected,
                value: todo,
            });
        }
    }

    fn resolve(&self, transition: &mut Transition, outcome: ApprovalOutcome) {
        let instance = transition.instance_mut();
        instance.resolve(outcome);
        let id = instance.id.clone();
        let pending = PendingOutcome::for_instance(instance);
        let action = match outcome {
            ApprovalOutcome::Approved => HistoryAction::InstanceApproved,
            ApprovalOutcome::Rejected => HistoryAction::InstanceRejected,
        };
        transition.append(HistoryAppend::system(&id, action));
        transition.outcome = pending;
    }
}

/// The opening history entry of an instance
pub fn started_entry(id: &ApprovalInstanceId, initiator: Option<&UserId>) -> HistoryAppend {
    match initiator {
        Some(user) => HistoryAppend::by(id, user, HistoryAction::Started),
        None => HistoryAppend::system(id, HistoryAction::Started),
    }
}
