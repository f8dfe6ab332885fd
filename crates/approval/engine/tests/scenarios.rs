//! End-to-end approval scenarios against the in-memory store

mod common;

use approval_engine::{NewTask, StartOutcome, StartRequest};
use approval_types::{
    AmountConditions, ApprovalError, ApprovalMode, ApprovalOutcome, ApproverSpec, DecisionRequest,
    HistoryAction, InstanceStatus, ModuleType, RecordRef, StepOutcome, TodoPriority, TodoStats,
    TodoStatus, WorkflowDefinition,
};
use common::*;
use futures::future::join_all;

// ── Core Flows ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_inactive_definition_auto_approves() {
    let h = harness();
    // An inactive expense definition does not count.
    h.engine
        .define_workflow(
            WorkflowDefinition::new("Expenses", ModuleType::Expense)
                .with_step("Manager", ApproverSpec::roles(["sales_manager"]), ApprovalMode::Any)
                .inactive(),
        )
        .await
        .unwrap();

    let outcome = h
        .engine
        .start_approval(StartRequest::new(ModuleType::Expense, 501, 120.0))
        .await
        .unwrap();

    assert!(matches!(outcome, StartOutcome::AutoApproved(_)));
    let instance = outcome.into_instance();
    assert_eq!(instance.status, InstanceStatus::Approved);
    assert!(instance.is_auto_approved());
    assert_eq!(open_todos(&h.engine, &instance).await, 0);
    assert_eq!(
        h.records.received(),
        vec![(RecordRef::new(ModuleType::Expense, 501), ApprovalOutcome::Approved)]
    );

    let history = h.engine.history(&instance.id).await.unwrap();
    let actions = history.iter().map(|e| e.action).collect::<Vec<_>>();
    assert_eq!(actions, vec![HistoryAction::Started, HistoryAction::AutoApproved]);
}

#[tokio::test]
async fn test_non_finite_amount_is_refused() {
    let h = harness();
    h.engine
        .define_workflow(
            WorkflowDefinition::new("Expenses", ModuleType::Expense)
                .with_step("Manager", ApproverSpec::roles(["sales_manager"]), ApprovalMode::Any)
                .with_conditions(AmountConditions::at_least(0.0)),
        )
        .await
        .unwrap();

    for amount in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        let result = h
            .engine
            .start_approval(StartRequest::new(ModuleType::Expense, 1, amount))
            .await;
        assert!(matches!(result, Err(ApprovalError::InvalidAmount(_))));
    }
    assert!(h.records.received().is_empty());
    let record = RecordRef::new(ModuleType::Expense, 1);
    assert!(h.engine.instances_for_record(record).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_any_step_then_all_step_approves() {
    let h = harness();
    h.engine
        .define_workflow(two_step_contract_review())
        .await
        .unwrap();

    let instance = h
        .engine
        .start_approval(StartRequest::new(ModuleType::Contract, 7, 10_000.0))
        .await
        .unwrap()
        .require_new()
        .unwrap();
    assert_eq!(instance.status, InstanceStatus::Running);
    assert_eq!(instance.current_step_index, 0);

    let token_a = token_for(&h.engine, "a", &instance).await;
    let token_b = token_for(&h.engine, "b", &instance).await;

    let after_a = h
        .engine
        .submit_decision(DecisionRequest::approve(token_a, user("a")))
        .await
        .unwrap();
    assert_eq!(after_a.status, InstanceStatus::Running);
    assert_eq!(after_a.current_step_index, 1);

    let b_todo = h
        .engine
        .get_todos(&user("b"), &[TodoStatus::Completed, TodoStatus::Pending])
        .await
        .unwrap();
    assert!(b_todo.is_empty(), "b's todo must be cancelled and hidden");
    assert!(try_token_for(&h.engine, "b", &after_a).await.is_none());

    let token_c = token_for(&h.engine, "c", &after_a).await;
    assert_ne!(token_c, token_b);
    let done = h
        .engine
        .submit_decision(DecisionRequest::approve(token_c, user("c")))
        .await
        .unwrap();
    assert_eq!(done.status, InstanceStatus::Approved);
    assert!(done.resolved_at.is_some());
    assert_eq!(
        h.records.received(),
        vec![(RecordRef::new(ModuleType::Contract, 7), ApprovalOutcome::Approved)]
    );
    assert!(h
        .engine
        .active_instance_for(RecordRef::new(ModuleType::Contract, 7))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_final_step_reject_is_terminal() {
    let h = harness();
    h.engine
        .define_workflow(two_step_contract_review())
        .await
        .unwrap();
    let instance = h
        .engine
        .start_approval(StartRequest::new(ModuleType::Contract, 8, 500.0))
        .await
        .unwrap()
        .into_instance();

    let token_a = token_for(&h.engine, "a", &instance).await;
    let instance = h
        .engine
        .submit_decision(DecisionRequest::approve(token_a, user("a")))
        .await
        .unwrap();
    let token_c = token_for(&h.engine, "c", &instance).await;

    let rejected = h
        .engine
        .submit_decision(
            DecisionRequest::reject(token_c, user("c")).with_comment("insufficient budget"),
        )
        .await
        .unwrap();
    assert_eq!(rejected.status, InstanceStatus::Rejected);
    assert_eq!(
        h.records.received(),
        vec![(RecordRef::new(ModuleType::Contract, 8), ApprovalOutcome::Rejected)]
    );
    assert_eq!(open_todos(&h.engine, &rejected).await, 0);

    let history = h.engine.history(&rejected.id).await.unwrap();
    let rejection = history
        .iter()
        .find(|e| e.action == HistoryAction::Rejected)
        .unwrap();
    assert_eq!(rejection.actor, Some(user("c")));
    assert_eq!(rejection.comment.as_deref(), Some("insufficient budget"));
    assert_eq!(
        history.last().map(|e| e.action),
        Some(HistoryAction::InstanceRejected)
    );
    let sequences = history.iter().map(|e| e.sequence).collect::<Vec<_>>();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_sibling_after_any_resolution_is_refused() {
    let h = harness();
    h.engine
        .define_workflow(two_step_contract_review())
        .await
        .unwrap();
    let instance = h
        .engine
        .start_approval(StartRequest::new(ModuleType::Contract, 9, 1.0))
        .await
        .unwrap()
        .into_instance();
    let token_a = token_for(&h.engine, "a", &instance).await;
    let token_b = token_for(&h.engine, "b", &instance).await;

    h.engine
        .submit_decision(DecisionRequest::approve(token_a.clone(), user("a")))
        .await
        .unwrap();

    let late = h
        .engine
        .submit_decision(DecisionRequest::approve(token_b, user("b")))
        .await;
    assert!(matches!(late, Err(ApprovalError::TaskAlreadyResolved(_))));

    // Replaying the winning token is refused the same way.
    let replay = h
        .engine
        .submit_decision(DecisionRequest::approve(token_a, user("a")))
        .await;
    assert!(matches!(replay, Err(ApprovalError::TaskAlreadyResolved(_))));
}

// ── Decisions ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_return_reissues_target_step() {
    let h = harness();
    h.engine
        .define_workflow(two_step_contract_review())
        .await
        .unwrap();
    let instance = h
        .engine
        .start_approval(StartRequest::new(ModuleType::Contract, 10, 1.0))
        .await
        .unwrap()
        .into_instance();
    let first_token_a = token_for(&h.engine, "a", &instance).await;
    let instance = h
        .engine
        .submit_decision(DecisionRequest::approve(first_token_a.clone(), user("a")))
        .await
        .unwrap();

    let token_c = token_for(&h.engine, "c", &instance).await;
    let returned = h
        .engine
        .submit_decision(
            DecisionRequest::return_to(token_c, user("c"), Some(0)).with_comment("missing terms"),
        )
        .await
        .unwrap();
    assert_eq!(returned.status, InstanceStatus::Running);
    assert_eq!(returned.current_step_index, 0);

    // Step 0 goes back to its last approver alone, with a new token.
    assert_eq!(
        open_todo_steps(&h.engine, &returned).await,
        vec![("a".to_string(), 0)]
    );
    let second_token_a = token_for(&h.engine, "a", &returned).await;
    assert_ne!(second_token_a, first_token_a);
    assert!(try_token_for(&h.engine, "b", &returned).await.is_none());

    let executions = h.engine.step_executions(&returned.id).await.unwrap();
    assert_eq!(executions.len(), 3);
    assert!(matches!(
        executions[1].outcome,
        Some(StepOutcome::Returned { target: 0 })
    ));
    assert!(executions[2].open);
    assert_eq!(executions[2].step_index, 0);

    let history = h.engine.history(&returned.id).await.unwrap();
    assert!(history.iter().any(|e| e.action == HistoryAction::Returned));
    assert!(h.records.received().is_empty());
}

#[tokio::test]
async fn test_return_to_first_step_goes_back_to_initiator() {
    let h = harness();
    h.engine
        .define_workflow(two_step_contract_review())
        .await
        .unwrap();
    let instance = h
        .engine
        .start_approval(StartRequest::new(ModuleType::Contract, 12, 1.0).with_initiator("e"))
        .await
        .unwrap()
        .into_instance();
    let token_b = token_for(&h.engine, "b", &instance).await;
    let instance = h
        .engine
        .submit_decision(DecisionRequest::approve(token_b, user("b")))
        .await
        .unwrap();

    let token_c = token_for(&h.engine, "c", &instance).await;
    let returned = h
        .engine
        .submit_decision(DecisionRequest::return_to(token_c, user("c"), None))
        .await
        .unwrap();
    assert_eq!(returned.current_step_index, 0);
    assert_eq!(
        open_todo_steps(&h.engine, &returned).await,
        vec![("e".to_string(), 0)]
    );

    // The initiator resubmits and the record moves on to finance again.
    let token_e = token_for(&h.engine, "e", &returned).await;
    let resubmitted = h
        .engine
        .submit_decision(DecisionRequest::approve(token_e, user("e")))
        .await
        .unwrap();
    assert_eq!(resubmitted.current_step_index, 1);
    assert_eq!(
        open_todo_steps(&h.engine, &resubmitted).await,
        vec![("c".to_string(), 1)]
    );
}

#[tokio::test]
async fn test_return_skips_inactive_owner() {
    let h = harness();
    h.engine
        .define_workflow(two_step_contract_review())
        .await
        .unwrap();
    let instance = h
        .engine
        .start_approval(StartRequest::new(ModuleType::Contract, 13, 1.0).with_initiator("d"))
        .await
        .unwrap()
        .into_instance();
    let token_a = token_for(&h.engine, "a", &instance).await;
    let instance = h
        .engine
        .submit_decision(DecisionRequest::approve(token_a, user("a")))
        .await
        .unwrap();

    // `d` is deactivated, so the step goes back to `a` instead.
    let token_c = token_for(&h.engine, "c", &instance).await;
    let returned = h
        .engine
        .submit_decision(DecisionRequest::return_to(token_c, user("c"), Some(0)))
        .await
        .unwrap();
    assert_eq!(
        open_todo_steps(&h.engine, &returned).await,
        vec![("a".to_string(), 0)]
    );
}

#[tokio::test]
async fn test_return_target_must_not_be_ahead() {
    let h = harness();
    h.engine
        .define_workflow(two_step_contract_review())
        .await
        .unwrap();
    let instance = h
        .engine
        .start_approval(StartRequest::new(ModuleType::Contract, 11, 1.0))
        .await
        .unwrap()
        .into_instance();
    let token_a = token_for(&h.engine, "a", &instance).await;

    let result = h
        .engine
        .submit_decision(DecisionRequest::return_to(token_a.clone(), user("a"), Some(1)))
        .await;
    assert!(matches!(
        result,
        Err(ApprovalError::InvalidReturnTarget {
            target: 1,
            current: 0
        })
    ));

    // The refused decision left the token usable.
    h.engine
        .submit_decision(DecisionRequest::approve(token_a, user("a")))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_only_the_token_owner_may_decide() {
    let h = harness();
    h.engine
        .define_workflow(two_step_contract_review())
        .await
        .unwrap();
    let instance = h
        .engine
        .start_approval(StartRequest::new(ModuleType::Contract, 12, 1.0))
        .await
        .unwrap()
        .into_instance();
    let token_a = token_for(&h.engine, "a", &instance).await;

    let result = h
        .engine
        .submit_decision(DecisionRequest::approve(token_a, user("b")))
        .await;
    assert!(matches!(result, Err(ApprovalError::NotTodoOwner { .. })));

    let unknown = h
        .engine
        .submit_decision(DecisionRequest::approve(
            approval_types::TaskToken::new("nope"),
            user("a"),
        ))
        .await;
    assert!(matches!(unknown, Err(ApprovalError::TaskTokenNotFound(_))));
}

#[tokio::test]
async fn test_all_mode_waits_for_every_actor() {
    let h = harness();
    h.engine
        .define_workflow(
            WorkflowDefinition::new("Payments", ModuleType::Payment).with_step(
                "Managers",
                ApproverSpec::roles(["sales_manager"]),
                ApprovalMode::All,
            ),
        )
        .await
        .unwrap();
    let instance = h
        .engine
        .start_approval(StartRequest::new(ModuleType::Payment, 1, 1.0))
        .await
        .unwrap()
        .into_instance();
    let token_a = token_for(&h.engine, "a", &instance).await;
    let token_b = token_for(&h.engine, "b", &instance).await;

    let waiting = h
        .engine
        .submit_decision(DecisionRequest::approve(token_a, user("a")))
        .await
        .unwrap();
    assert_eq!(waiting.status, InstanceStatus::Running);
    assert!(h.records.received().is_empty());

    let done = h
        .engine
        .submit_decision(DecisionRequest::approve(token_b, user("b")))
        .await
        .unwrap();
    assert_eq!(done.status, InstanceStatus::Approved);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_all_mode_approvals_both_count() {
    let h = harness();
    h.engine
        .define_workflow(
            WorkflowDefinition::new("Payments", ModuleType::Payment).with_step(
                "Managers",
                ApproverSpec::roles(["sales_manager"]),
                ApprovalMode::All,
            ),
        )
        .await
        .unwrap();
    let instance = h
        .engine
        .start_approval(StartRequest::new(ModuleType::Payment, 2, 1.0))
        .await
        .unwrap()
        .into_instance();

    let mut handles = Vec::new();
    for owner in ["a", "b"] {
        let token = token_for(&h.engine, owner, &instance).await;
        let engine = h.engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .submit_decision(DecisionRequest::approve(token, user(owner)))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let instance = h.engine.get_instance(&instance.id).await.unwrap();
    assert_eq!(instance.status, InstanceStatus::Approved);
    assert_eq!(h.records.received().len(), 1);
}

// ── Starting ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_second_start_returns_existing_instance() {
    let h = harness();
    h.engine
        .define_workflow(two_step_contract_review())
        .await
        .unwrap();
    let request = StartRequest::new(ModuleType::Contract, 20, 1.0).with_initiator("a");
    let first = h.engine.start_approval(request.clone()).await.unwrap();
    assert!(first.is_new());

    let second = h.engine.start_approval(request).await.unwrap();
    assert!(!second.is_new());
    assert_eq!(second.instance().id, first.instance().id);
    assert!(matches!(
        second.require_new(),
        Err(ApprovalError::InstanceAlreadyActive { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_create_one_instance() {
    let h = harness();
    h.engine
        .define_workflow(two_step_contract_review())
        .await
        .unwrap();

    let starts = (0..8).map(|_| {
        let engine = h.engine.clone();
        tokio::spawn(async move {
            engine
                .start_approval(StartRequest::new(ModuleType::Contract, 21, 1.0))
                .await
        })
    });
    let outcomes = join_all(starts)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect::<Vec<_>>();

    let created = outcomes.iter().filter(|o| o.is_new()).count();
    assert_eq!(created, 1);
    let id = &outcomes[0].instance().id;
    assert!(outcomes.iter().all(|o| &o.instance().id == id));
    assert_eq!(
        h.engine
            .instances_for_record(RecordRef::new(ModuleType::Contract, 21))
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_restart_after_terminal_creates_new_instance() {
    let h = harness();
    h.engine
        .define_workflow(
            WorkflowDefinition::new("Quotes", ModuleType::Quotation).with_step(
                "Finance",
                ApproverSpec::roles(["finance"]),
                ApprovalMode::Any,
            ),
        )
        .await
        .unwrap();
    let record = RecordRef::new(ModuleType::Quotation, 30);
    let first = h
        .engine
        .start_approval(StartRequest::new(ModuleType::Quotation, 30, 1.0))
        .await
        .unwrap()
        .into_instance();
    let token = token_for(&h.engine, "c", &first).await;
    h.engine
        .submit_decision(DecisionRequest::reject(token, user("c")))
        .await
        .unwrap();

    let second = h
        .engine
        .start_approval(StartRequest::new(ModuleType::Quotation, 30, 1.0))
        .await
        .unwrap();
    assert!(matches!(second, StartOutcome::Started(_)));

    let all = h.engine.instances_for_record(record).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, second.instance().id);
    let first = h.engine.get_instance(&first.id).await.unwrap();
    assert_eq!(first.status, InstanceStatus::Rejected);
}

#[tokio::test]
async fn test_selection_prefers_priority_then_lowest_id() {
    let h = harness();
    let small = h
        .engine
        .define_workflow(
            WorkflowDefinition::new("Small", ModuleType::Expense)
                .with_conditions(AmountConditions::at_most(1000.0))
                .with_step("Manager", ApproverSpec::users(["a"]), ApprovalMode::Any),
        )
        .await
        .unwrap();
    let large = h
        .engine
        .define_workflow(
            WorkflowDefinition::new("Large", ModuleType::Expense)
                .with_conditions(AmountConditions::at_least(1000.0))
                .with_priority(10)
                .with_step("Finance", ApproverSpec::users(["c"]), ApprovalMode::Any),
        )
        .await
        .unwrap();

    let at_bound = h
        .engine
        .start_approval(StartRequest::new(ModuleType::Expense, 1, 1000.0))
        .await
        .unwrap()
        .into_instance();
    assert_eq!(at_bound.workflow_definition_id, Some(large.id));

    let below = h
        .engine
        .start_approval(StartRequest::new(ModuleType::Expense, 2, 10.0))
        .await
        .unwrap()
        .into_instance();
    assert_eq!(below.workflow_definition_id, Some(small.id));
}

#[tokio::test]
async fn test_definition_edits_do_not_touch_running_instances() {
    let h = harness();
    let def = h
        .engine
        .define_workflow(two_step_contract_review())
        .await
        .unwrap();
    let instance = h
        .engine
        .start_approval(StartRequest::new(ModuleType::Contract, 40, 1.0))
        .await
        .unwrap()
        .into_instance();

    let edited = h
        .engine
        .update_workflow(
            def.id,
            WorkflowDefinition::new("Contract review", ModuleType::Contract).with_step(
                "Finance only",
                ApproverSpec::users(["c"]),
                ApprovalMode::Any,
            ),
        )
        .await
        .unwrap();
    assert_eq!(edited.version, 2);

    let token_a = token_for(&h.engine, "a", &instance).await;
    let after = h
        .engine
        .submit_decision(DecisionRequest::approve(token_a, user("a")))
        .await
        .unwrap();
    assert_eq!(after.status, InstanceStatus::Running);
    assert_eq!(after.current_step_index, 1);
    assert_eq!(after.steps.len(), 2);
    assert_eq!(after.definition_version, Some(1));
}

// ── Escalation ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_unresolvable_step_escalates_and_reassign_recovers() {
    let h = harness();
    h.engine
        .define_workflow(
            WorkflowDefinition::new("Projects", ModuleType::Project).with_step(
                "Directors",
                ApproverSpec::roles(["director"]),
                ApprovalMode::Any,
            ),
        )
        .await
        .unwrap();
    let started = h
        .engine
        .start_approval(StartRequest::new(ModuleType::Project, 3, 1.0))
        .await
        .unwrap();
    let instance = started.into_instance();
    assert_eq!(instance.status, InstanceStatus::EscalationNeeded);
    assert_eq!(
        h.engine.escalated_instances().await.unwrap().len(),
        1
    );

    // Still the active instance for the record.
    let again = h
        .engine
        .start_approval(StartRequest::new(ModuleType::Project, 3, 1.0))
        .await
        .unwrap();
    assert!(!again.is_new());

    let retry = h.engine.retry_activation(&instance.id).await;
    assert!(matches!(retry, Err(ApprovalError::UnresolvableApprovers(_))));

    let only_inactive = h
        .engine
        .reassign_step(&instance.id, &[user("d")], &user("admin"))
        .await;
    assert!(matches!(
        only_inactive,
        Err(ApprovalError::UnresolvableApprovers(_))
    ));

    let running = h
        .engine
        .reassign_step(&instance.id, &[user("c"), user("d")], &user("admin"))
        .await
        .unwrap();
    assert_eq!(running.status, InstanceStatus::Running);
    assert!(try_token_for(&h.engine, "d", &running).await.is_none());
    let token = token_for(&h.engine, "c", &running).await;

    let history = h.engine.history(&running.id).await.unwrap();
    let reassigned = history
        .iter()
        .find(|e| e.action == HistoryAction::Reassigned)
        .unwrap();
    assert_eq!(reassigned.actor, Some(user("admin")));

    let done = h
        .engine
        .submit_decision(DecisionRequest::approve(token, user("c")))
        .await
        .unwrap();
    assert_eq!(done.status, InstanceStatus::Approved);

    let not_escalated = h.engine.retry_activation(&done.id).await;
    assert!(matches!(
        not_escalated,
        Err(ApprovalError::InstanceNotEscalated(_))
    ));
}

#[tokio::test]
async fn test_retry_activation_after_directory_change() {
    let h = harness();
    h.engine
        .define_workflow(
            WorkflowDefinition::new("Inventory", ModuleType::Inventory).with_step(
                "Warehouse",
                ApproverSpec::roles(["warehouse"]),
                ApprovalMode::Any,
            ),
        )
        .await
        .unwrap();
    let instance = h
        .engine
        .start_approval(StartRequest::new(ModuleType::Inventory, 4, 1.0))
        .await
        .unwrap()
        .into_instance();
    assert_eq!(instance.status, InstanceStatus::EscalationNeeded);

    h.directory.grant_role(&user("b"), "warehouse").unwrap();
    let running = h.engine.retry_activation(&instance.id).await.unwrap();
    assert_eq!(running.status, InstanceStatus::Running);
    assert!(try_token_for(&h.engine, "b", &running).await.is_some());
}

#[tokio::test]
async fn test_advance_into_unresolvable_step_escalates() {
    let h = harness();
    h.engine
        .define_workflow(
            WorkflowDefinition::new("Orders", ModuleType::PurchaseOrder)
                .with_step("Sales", ApproverSpec::users(["a"]), ApprovalMode::Any)
                .with_step("Legal", ApproverSpec::roles(["legal"]), ApprovalMode::Any),
        )
        .await
        .unwrap();
    let instance = h
        .engine
        .start_approval(StartRequest::new(ModuleType::PurchaseOrder, 5, 1.0))
        .await
        .unwrap()
        .into_instance();
    let token = token_for(&h.engine, "a", &instance).await;

    let escalated = h
        .engine
        .submit_decision(DecisionRequest::approve(token, user("a")))
        .await
        .unwrap();
    assert_eq!(escalated.status, InstanceStatus::EscalationNeeded);
    assert_eq!(escalated.current_step_index, 1);
    let history = h.engine.history(&escalated.id).await.unwrap();
    assert!(history
        .iter()
        .any(|e| e.action == HistoryAction::EscalationNeeded && e.step_index == Some(1)));
}

// ── Record Store Delivery ────────────────────────────────────────────

#[tokio::test]
async fn test_failed_callback_is_redelivered() {
    let h = harness_with(CollectingRecordStore::failing(1));
    let instance = h
        .engine
        .start_approval(StartRequest::new(ModuleType::Opportunity, 6, 1.0))
        .await
        .unwrap()
        .into_instance();
    assert_eq!(instance.status, InstanceStatus::Approved);
    assert!(h.records.received().is_empty());

    assert_eq!(h.engine.redeliver_outcomes().await.unwrap(), 1);
    assert_eq!(
        h.records.received(),
        vec![(RecordRef::new(ModuleType::Opportunity, 6), ApprovalOutcome::Approved)]
    );

    // Acknowledged outcomes are not delivered twice.
    assert_eq!(h.engine.redeliver_outcomes().await.unwrap(), 0);
    assert_eq!(h.records.received().len(), 1);
}

// ── Todos ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stats_across_approval_and_task_todos() {
    let h = harness();
    h.engine
        .define_workflow(two_step_contract_review())
        .await
        .unwrap();
    h.engine
        .start_approval(StartRequest::new(ModuleType::Contract, 50, 1.0))
        .await
        .unwrap();

    let urgent = h
        .engine
        .create_task(NewTask::new(user("a"), "Renew license").with_priority(TodoPriority::Urgent))
        .await
        .unwrap();
    let started = h
        .engine
        .create_task(NewTask::new(user("a"), "Prepare demo"))
        .await
        .unwrap();
    let finished = h
        .engine
        .create_task(NewTask::new(user("a"), "Send invoice"))
        .await
        .unwrap();
    h.engine.start_todo(&started.id, &user("a")).await.unwrap();
    h.engine
        .complete_task(&finished.id, &user("a"), Some("sent".into()))
        .await
        .unwrap();

    let stats = h.engine.get_todo_stats(&user("a")).await.unwrap();
    assert_eq!(
        stats,
        TodoStats {
            pending: 2,
            in_progress: 1,
            completed: 1,
            urgent: 1,
        }
    );

    let inbox = h.engine.get_todos(&user("a"), &[]).await.unwrap();
    assert_eq!(inbox.first().map(|t| &t.id), Some(&urgent.id));
    assert_eq!(inbox.len(), 4);
}

#[tokio::test]
async fn test_approval_todos_only_close_through_decisions() {
    let h = harness();
    h.engine
        .define_workflow(two_step_contract_review())
        .await
        .unwrap();
    let instance = h
        .engine
        .start_approval(StartRequest::new(ModuleType::Contract, 51, 1.0))
        .await
        .unwrap()
        .into_instance();

    let todo = h
        .engine
        .get_todos(&user("a"), &[TodoStatus::Pending])
        .await
        .unwrap()
        .remove(0);
    let complete = h.engine.complete_task(&todo.id, &user("a"), None).await;
    assert!(matches!(complete, Err(ApprovalError::NotTaskTodo(_))));

    // An in-progress approval todo still accepts its decision.
    let in_progress = h.engine.start_todo(&todo.id, &user("a")).await.unwrap();
    assert_eq!(in_progress.status, TodoStatus::InProgress);
    let token = token_for(&h.engine, "a", &instance).await;
    h.engine
        .submit_decision(DecisionRequest::approve(token, user("a")))
        .await
        .unwrap();

    let closed = h.engine.get_todo(&todo.id, &user("a")).await.unwrap();
    assert_eq!(closed.status, TodoStatus::Completed);
    assert!(closed.completed_at.is_some());
}

#[tokio::test]
async fn test_terminal_todos_never_reopen() {
    let h = harness();
    let task = h
        .engine
        .create_task(NewTask::new(user("b"), "Follow up"))
        .await
        .unwrap();
    h.engine.cancel_task(&task.id, &user("b")).await.unwrap();

    for attempt in [
        h.engine.start_todo(&task.id, &user("b")).await,
        h.engine.complete_task(&task.id, &user("b"), None).await,
        h.engine.cancel_task(&task.id, &user("b")).await,
    ] {
        assert!(matches!(
            attempt,
            Err(ApprovalError::InvalidTodoTransition {
                from: TodoStatus::Cancelled,
                ..
            })
        ));
    }
}

#[tokio::test]
async fn test_decisions_enqueue_notifications() {
    let h = harness();
    h.engine
        .define_workflow(two_step_contract_review())
        .await
        .unwrap();
    let instance = h
        .engine
        .start_approval(StartRequest::new(ModuleType::Contract, 52, 1.0))
        .await
        .unwrap()
        .into_instance();
    // Two approval todos issued.
    assert_eq!(h.engine.outbox().len(), 2);

    let token = token_for(&h.engine, "a", &instance).await;
    h.engine
        .submit_decision(DecisionRequest::approve(token, user("a")))
        .await
        .unwrap();
    // a completed, b cancelled, c issued.
    assert_eq!(h.engine.outbox().len(), 5);

    let report = h.engine.outbox().flush().await;
    assert_eq!(report.delivered, 5);
    assert!(h.engine.outbox().is_empty());
}
