//! Approval engine: the entry point for record stores and administrators
//!
//! The engine:
//! 1. Selects a definition for a record, or auto-approves it
//! 2. Activates steps and issues approval todos
//! 3. Applies decisions with optimistic concurrency, retrying lost races
//! 4. Parks instances whose approvers cannot be resolved
//! 5. Reports terminal outcomes to the owning record store
//!
//! Every transition is committed as one change set. Notifications and
//! record-store callbacks only happen after the commit succeeded.

use crate::config::EngineConfig;
use crate::definition_registry::DefinitionRegistry;
use crate::directory::IdentityDirectory;
use crate::ledger::{NewTask, TodoLedger};
use crate::notify::{NotificationDispatcher, NotificationOutbox};
use crate::record_store::RecordStore;
use crate::resolver::ApproverResolver;
use crate::state_machine::{
    started_entry, Activation, DecisionContext, DecisionEffect, StateMachine, Transition,
};
use approval_store::ApprovalStore;
use approval_types::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Request to route a record through approval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRequest {
    pub module_type: ModuleType,
    pub module_id: u64,
    /// Amount used to evaluate definition conditions
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub initiator: Option<UserId>,
}

impl StartRequest {
    pub fn new(module_type: ModuleType, module_id: u64, amount: f64) -> Self {
        Self {
            module_type,
            module_id,
            amount,
            initiator: None,
        }
    }

    pub fn with_initiator(mut self, initiator: impl Into<String>) -> Self {
        self.initiator = Some(UserId::new(initiator));
        self
    }

    pub fn record(&self) -> RecordRef {
        RecordRef::new(self.module_type, self.module_id)
    }
}

/// How a start request was satisfied
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", content = "instance", rename_all = "snake_case")]
pub enum StartOutcome {
    /// No active definition matched; the record is approved already
    AutoApproved(ApprovalInstance),
    /// A new instance was created. It may be `escalation_needed` when the
    /// first step had no resolvable approver.
    Started(ApprovalInstance),
    /// The record already had an active instance
    Existing(ApprovalInstance),
}

impl StartOutcome {
    pub fn instance(&self) -> &ApprovalInstance {
        match self {
            Self::AutoApproved(i) | Self::Started(i) | Self::Existing(i) => i,
        }
    }

    pub fn into_instance(self) -> ApprovalInstance {
        match self {
            Self::AutoApproved(i) | Self::Started(i) | Self::Existing(i) => i,
        }
    }

    pub fn is_new(&self) -> bool {
        !matches!(self, Self::Existing(_))
    }

    /// Treat an already active instance as an error
    pub fn require_new(self) -> ApprovalResult<ApprovalInstance> {
        match self {
            Self::Existing(existing) => Err(ApprovalError::InstanceAlreadyActive {
                existing: existing.id,
            }),
            other => Ok(other.into_instance()),
        }
    }
}

/// The approval engine
pub struct ApprovalEngine {
    store: Arc<dyn ApprovalStore>,
    definitions: DefinitionRegistry,
    resolver: ApproverResolver,
    ledger: TodoLedger,
    outbox: NotificationOutbox,
    record_store: Arc<dyn RecordStore>,
    machine: StateMachine,
    config: EngineConfig,
}

impl ApprovalEngine {
    pub fn new(
        store: Arc<dyn ApprovalStore>,
        directory: Arc<dyn IdentityDirectory>,
        record_store: Arc<dyn RecordStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        config: EngineConfig,
    ) -> Self {
        let outbox = NotificationOutbox::new(dispatcher, config.notification.clone());
        Self {
            definitions: DefinitionRegistry::new(store.clone()),
            resolver: ApproverResolver::new(directory),
            ledger: TodoLedger::new(store.clone(), outbox.clone()),
            store,
            outbox,
            record_store,
            machine: StateMachine::new(),
            config,
        }
    }

    pub fn definitions(&self) -> &DefinitionRegistry {
        &self.definitions
    }

    pub fn ledger(&self) -> &TodoLedger {
        &self.ledger
    }

    pub fn outbox(&self) -> &NotificationOutbox {
        &self.outbox
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Definition Management ────────────────────────────────────────

    pub async fn define_workflow(
        &self,
        definition: WorkflowDefinition,
    ) -> ApprovalResult<WorkflowDefinition> {
        self.definitions.define(definition).await
    }

    pub async fn update_workflow(
        &self,
        id: WorkflowDefinitionId,
        definition: WorkflowDefinition,
    ) -> ApprovalResult<WorkflowDefinition> {
        self.definitions.update(id, definition).await
    }

    pub async fn deactivate_workflow(
        &self,
        id: WorkflowDefinitionId,
    ) -> ApprovalResult<WorkflowDefinition> {
        self.definitions.deactivate(id).await
    }

    pub async fn activate_workflow(
        &self,
        id: WorkflowDefinitionId,
    ) -> ApprovalResult<WorkflowDefinition> {
        self.definitions.activate(id).await
    }

    pub async fn get_workflow(&self, id: WorkflowDefinitionId) -> ApprovalResult<WorkflowDefinition> {
        self.definitions.get(id).await
    }

    pub async fn list_workflows(
        &self,
        module_type: Option<ModuleType>,
    ) -> ApprovalResult<Vec<WorkflowDefinition>> {
        self.definitions.list(module_type).await
    }

    // ── Instance Lifecycle ───────────────────────────────────────────

    /// Route a record through approval.
    ///
    /// A record that already has an active instance gets that instance
    /// back as [`StartOutcome::Existing`], including when a concurrent
    /// start won the race. Non-finite amounts fail with `InvalidAmount`.
    pub async fn start_approval(&self, request: StartRequest) -> ApprovalResult<StartOutcome> {
        // NaN matches no bounded definition and would slip through as auto-approved.
        if !request.amount.is_finite() {
            return Err(ApprovalError::InvalidAmount(request.amount));
        }
        let record = request.record();
        if let Some(existing) = self.store.active_instance_for(record).await? {
            tracing::debug!(
                record = %record,
                instance_id = %existing.id,
                "Approval already active for record"
            );
            return Ok(StartOutcome::Existing(existing));
        }

        let Some(definition) = self
            .definitions
            .select_matching(record.module_type, request.amount)
            .await?
        else {
            let transition =
                self.machine
                    .auto_approve(record, request.amount, request.initiator.clone());
            let instance = self.commit(transition).await?;
            tracing::info!(
                record = %record,
                instance_id = %instance.id,
                amount = request.amount,
                "No workflow matched, record auto-approved"
            );
            return Ok(StartOutcome::AutoApproved(instance));
        };

        let instance = ApprovalInstance::from_definition(
            &definition,
            record,
            request.amount,
            request.initiator.clone(),
        );
        let mut transition = Transition::new_instance(instance);
        transition.append(
            started_entry(&transition.instance().id, request.initiator.as_ref()).with_comment(
                Some(format!("{} v{}", definition.name, definition.version)),
            ),
        );
        let resolution = self.resolve_step(transition.instance(), 0).await;
        let activation = self.machine.activate_step(&mut transition, 0, resolution)?;

        match self.commit(transition).await {
            Ok(instance) => {
                tracing::info!(
                    record = %record,
                    instance_id = %instance.id,
                    definition_id = %definition.id,
                    status = %instance.status,
                    "Approval instance started"
                );
                self.log_activation(&instance, &activation);
                Ok(StartOutcome::Started(instance))
            }
            Err(ApprovalError::InstanceAlreadyActive { existing }) => {
                tracing::debug!(
                    record = %record,
                    instance_id = %existing,
                    "Concurrent start lost, returning existing instance"
                );
                let existing = self.get_instance(&existing).await?;
                Ok(StartOutcome::Existing(existing))
            }
            Err(err) => Err(err),
        }
    }

    /// Apply an actor's decision to the step behind a task token.
    ///
    /// Lost optimistic-concurrency races are re-read and re-applied up to
    /// `max_decision_retries` times; a re-read that finds the todo closed
    /// reports `TaskAlreadyResolved`.
    pub async fn submit_decision(&self, request: DecisionRequest) -> ApprovalResult<ApprovalInstance> {
        let attempts_allowed = self.config.max_decision_retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            match self.try_decision(&request).await {
                Err(ApprovalError::Conflict { .. }) if attempt < attempts_allowed => {
                    tracing::warn!(
                        task_token = %request.task_token,
                        attempt,
                        "Decision lost a concurrent update, retrying"
                    );
                    attempt += 1;
                }
                Err(ApprovalError::Conflict { .. }) => {
                    return Err(ApprovalError::Conflict { attempts: attempt });
                }
                Err(err) => {
                    if err.is_user_error() {
                        tracing::debug!(task_token = %request.task_token, error = %err, "Decision refused");
                    }
                    return Err(err);
                }
                Ok(instance) => return Ok(instance),
            }
        }
    }

    async fn try_decision(&self, request: &DecisionRequest) -> ApprovalResult<ApprovalInstance> {
        let token = &request.task_token;
        let todo = self
            .store
            .todo_by_token(token)
            .await?
            .ok_or_else(|| ApprovalError::TaskTokenNotFound(token.clone()))?;
        let link = todo
            .approval
            .clone()
            .ok_or_else(|| ApprovalError::NotApprovalTodo(todo.id.clone()))?;
        if !todo.is_open() {
            return Err(ApprovalError::TaskAlreadyResolved(token.clone()));
        }
        if todo.owner_id != request.actor_id {
            return Err(ApprovalError::NotTodoOwner {
                todo: todo.id.clone(),
                actor: request.actor_id.to_string(),
            });
        }

        let instance = self.get_instance(&link.instance_id).await?;
        if instance.status != InstanceStatus::Running
            || instance.current_step_index != link.step_index
        {
            return Err(ApprovalError::TaskAlreadyResolved(token.clone()));
        }
        let execution = self
            .store
            .get_execution(&link.execution_id)
            .await?
            .ok_or_else(|| {
                ApprovalError::Storage(format!("step execution {} missing", link.execution_id))
            })?;
        if !execution.open {
            return Err(ApprovalError::TaskAlreadyResolved(token.clone()));
        }
        let other_open_todos = self
            .store
            .todos_for_instance(&instance.id)
            .await?
            .into_iter()
            .filter(|t| t.is_open() && t.id != todo.id)
            .collect();

        let mut transition = Transition::existing(instance);
        let effect = self.machine.apply_decision(
            &mut transition,
            DecisionContext {
                execution,
                todo,
                other_open_todos,
            },
            request.action,
            request.comment.clone(),
            request.return_target,
        )?;

        let activation = match effect {
            DecisionEffect::Advance { next: index } => {
                let resolution = self.resolve_step(transition.instance(), index).await;
                Some(self.machine.activate_step(&mut transition, index, resolution)?)
            }
            DecisionEffect::Return { target } => {
                let resolution = match self.return_owner(transition.instance(), target).await? {
                    Some(owner) => Ok(BTreeSet::from([owner])),
                    None => self.resolve_step(transition.instance(), target).await,
                };
                Some(self.machine.activate_step(&mut transition, target, resolution)?)
            }
            DecisionEffect::AwaitingOthers | DecisionEffect::Resolved(_) => None,
        };

        let instance = self.commit(transition).await?;
        tracing::debug!(
            instance_id = %instance.id,
            actor = %request.actor_id,
            action = ?request.action,
            effect = ?effect,
            "Decision applied"
        );
        if let Some(activation) = &activation {
            self.log_activation(&instance, activation);
        }
        Ok(instance)
    }

    /// Re-run approver resolution for an escalated step
    pub async fn retry_activation(
        &self,
        instance_id: &ApprovalInstanceId,
    ) -> ApprovalResult<ApprovalInstance> {
        let instance = self.escalated(instance_id).await?;
        let index = instance.current_step_index;
        let actors = self.resolve_step(&instance, index).await?;

        let mut transition = Transition::existing(instance);
        let activation = self.machine.activate_step(&mut transition, index, Ok(actors))?;
        let instance = self.commit(transition).await?;
        self.log_activation(&instance, &activation);
        Ok(instance)
    }

    /// Activate an escalated step with an explicit list of approvers
    pub async fn reassign_step(
        &self,
        instance_id: &ApprovalInstanceId,
        users: &[UserId],
        admin: &UserId,
    ) -> ApprovalResult<ApprovalInstance> {
        let instance = self.escalated(instance_id).await?;
        let index = instance.current_step_index;
        let actors = self.resolver.resolve_users(users).await?;

        let mut transition = Transition::existing(instance);
        transition.append(
            HistoryAppend::by(instance_id, admin, HistoryAction::Reassigned)
                .at_step(index)
                .with_comment(Some(
                    actors
                        .iter()
                        .map(UserId::as_str)
                        .collect::<Vec<_>>()
                        .join(", "),
                )),
        );
        let activation = self.machine.activate_step(&mut transition, index, Ok(actors))?;
        let instance = self.commit(transition).await?;
        tracing::info!(instance_id = %instance.id, admin = %admin, step = index, "Escalated step reassigned");
        self.log_activation(&instance, &activation);
        Ok(instance)
    }

    /// Retry every terminal outcome the record stores have not yet accepted
    pub async fn redeliver_outcomes(&self) -> ApprovalResult<usize> {
        let pending = self.store.pending_outcomes().await?;
        let mut delivered = 0;
        for outcome in pending {
            if self.deliver(outcome).await {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub async fn get_instance(&self, id: &ApprovalInstanceId) -> ApprovalResult<ApprovalInstance> {
        self.store
            .get_instance(id)
            .await?
            .ok_or_else(|| ApprovalError::InstanceNotFound(id.clone()))
    }

    pub async fn active_instance_for(
        &self,
        record: RecordRef,
    ) -> ApprovalResult<Option<ApprovalInstance>> {
        Ok(self.store.active_instance_for(record).await?)
    }

    pub async fn instances_for_record(
        &self,
        record: RecordRef,
    ) -> ApprovalResult<Vec<ApprovalInstance>> {
        Ok(self.store.instances_for_record(record).await?)
    }

    pub async fn history(&self, id: &ApprovalInstanceId) -> ApprovalResult<Vec<HistoryEntry>> {
        self.get_instance(id).await?;
        Ok(self.store.history(id).await?)
    }

    pub async fn step_executions(
        &self,
        id: &ApprovalInstanceId,
    ) -> ApprovalResult<Vec<StepExecution>> {
        self.get_instance(id).await?;
        Ok(self.store.step_executions(id).await?)
    }

    pub async fn escalated_instances(&self) -> ApprovalResult<Vec<ApprovalInstance>> {
        Ok(self.store.escalated_instances().await?)
    }

    // ── Todos ────────────────────────────────────────────────────────

    pub async fn get_todos(
        &self,
        owner: &UserId,
        statuses: &[TodoStatus],
    ) -> ApprovalResult<Vec<Todo>> {
        self.ledger.list_for_owner(owner, statuses).await
    }

    pub async fn get_todo_stats(&self, owner: &UserId) -> ApprovalResult<TodoStats> {
        self.ledger.stats(owner).await
    }

    pub async fn get_todo(&self, id: &TodoId, owner: &UserId) -> ApprovalResult<Todo> {
        self.ledger.get_for_owner(id, owner).await
    }

    pub async fn create_task(&self, task: NewTask) -> ApprovalResult<Todo> {
        self.ledger.create_task(task).await
    }

    pub async fn start_todo(&self, id: &TodoId, actor: &UserId) -> ApprovalResult<Todo> {
        self.ledger.start(id, actor).await
    }

    pub async fn complete_task(
        &self,
        id: &TodoId,
        actor: &UserId,
        comment: Option<String>,
    ) -> ApprovalResult<Todo> {
        self.ledger.complete_task(id, actor, comment).await
    }

    pub async fn cancel_task(&self, id: &TodoId, actor: &UserId) -> ApprovalResult<Todo> {
        self.ledger.cancel_task(id, actor).await
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn resolve_step(
        &self,
        instance: &ApprovalInstance,
        index: usize,
    ) -> ApprovalResult<BTreeSet<UserId>> {
        match instance.steps.get(index) {
            Some(step) => self.resolver.resolve(&step.approver_spec).await,
            None => Err(ApprovalError::InvalidDefinition(format!(
                "instance {} has no step {}",
                instance.id, index
            ))),
        }
    }

    /// The one actor a returned step goes back to.
    ///
    /// Step 0 goes back to the initiator when the record has one. Otherwise
    /// the step goes back to whoever last approved it. Inactive candidates
    /// are skipped; `None` means the step is re-resolved in full.
    async fn return_owner(
        &self,
        instance: &ApprovalInstance,
        target: usize,
    ) -> ApprovalResult<Option<UserId>> {
        let mut candidates = Vec::new();
        if target == 0 {
            candidates.extend(instance.initiator.clone());
        }
        let executions = self.store.step_executions(&instance.id).await?;
        candidates.extend(
            executions
                .iter()
                .rev()
                .filter(|e| e.step_index == target && e.outcome == Some(StepOutcome::Approved))
                .find_map(StepExecution::last_approver)
                .cloned(),
        );

        for candidate in candidates {
            match self
                .resolver
                .resolve_users(std::slice::from_ref(&candidate))
                .await
            {
                Ok(_) => return Ok(Some(candidate)),
                Err(ApprovalError::UnresolvableApprovers(_)) => {
                    tracing::debug!(
                        instance_id = %instance.id,
                        candidate = %candidate,
                        "Return owner inactive, trying next candidate"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    async fn escalated(&self, id: &ApprovalInstanceId) -> ApprovalResult<ApprovalInstance> {
        let instance = self.get_instance(id).await?;
        if instance.status != InstanceStatus::EscalationNeeded {
            return Err(ApprovalError::InstanceNotEscalated(id.clone()));
        }
        Ok(instance)
    }

    /// Commit a transition, then notify and report its outcome
    async fn commit(&self, transition: Transition) -> ApprovalResult<ApprovalInstance> {
        let instance = transition.committed_instance();
        let todos = transition.written_todos();
        let outcome = transition.outcome().cloned();

        self.store.commit(transition.into_changes()).await?;

        self.outbox.enqueue_all(todos.iter().map(Todo::snapshot));
        if let Some(outcome) = outcome {
            tracing::info!(
                instance_id = %instance.id,
                record = %outcome.record,
                outcome = %outcome.outcome,
                "Approval instance resolved"
            );
            self.deliver(outcome).await;
        }
        Ok(instance)
    }

    async fn deliver(&self, outcome: PendingOutcome) -> bool {
        match self
            .record_store
            .on_approval_resolved(outcome.record, outcome.outcome)
            .await
        {
            Ok(()) => {
                if let Err(err) = self.store.acknowledge_outcome(&outcome.instance_id).await {
                    tracing::error!(
                        instance_id = %outcome.instance_id,
                        error = %err,
                        "Delivered outcome could not be acknowledged"
                    );
                }
                true
            }
            Err(err) => {
                tracing::error!(
                    instance_id = %outcome.instance_id,
                    record = %outcome.record,
                    error = %err,
                    "Record store callback failed, outcome left pending"
                );
                false
            }
        }
    }

    fn log_activation(&self, instance: &ApprovalInstance, activation: &Activation) {
        match activation {
            Activation::Activated { actors, .. } => tracing::info!(
                instance_id = %instance.id,
                step = instance.current_step_index,
                approvers = actors.len(),
                "Step activated"
            ),
            Activation::Escalated { reason } => tracing::warn!(
                instance_id = %instance.id,
                step = instance.current_step_index,
                reason = %reason,
                "Step needs escalation"
            ),
        }
    }
}
