//! Workflow definition handlers

use crate::api::state::AppState;
use crate::error::ApiResult;
use approval_types::{
    AmountConditions, ApprovalMode, ApproverSpec, ModuleType, WorkflowDefinition,
    WorkflowDefinitionId,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

/// One step of a workflow request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRequest {
    pub name: String,
    pub approver_spec: ApproverSpec,
    #[serde(default)]
    pub approval_mode: ApprovalMode,
}

/// Body of create and update requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub module_type: ModuleType,
    pub steps: Vec<StepRequest>,
    #[serde(default)]
    pub conditions: AmountConditions,
    #[serde(default)]
    pub priority: i32,
    /// Only honoured on create
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl WorkflowRequest {
    fn into_definition(self) -> WorkflowDefinition {
        let mut definition = WorkflowDefinition::new(self.name, self.module_type)
            .with_description(self.description)
            .with_conditions(self.conditions)
            .with_priority(self.priority);
        if !self.active {
            definition = definition.inactive();
        }
        self.steps.into_iter().fold(definition, |def, step| {
            def.with_step(step.name, step.approver_spec, step.approval_mode)
        })
    }
}

/// Filter for listing workflows
#[derive(Debug, Deserialize)]
pub struct WorkflowQuery {
    pub module_type: Option<ModuleType>,
}

/// List workflows, optionally for one module type
pub async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<WorkflowQuery>,
) -> ApiResult<Json<Vec<WorkflowDefinition>>> {
    let workflows = state.engine.list_workflows(query.module_type).await?;
    Ok(Json(workflows))
}

/// Register a new workflow definition
pub async fn define_workflow(
    State(state): State<AppState>,
    Json(request): Json<WorkflowRequest>,
) -> ApiResult<(StatusCode, Json<WorkflowDefinition>)> {
    let definition = state
        .engine
        .define_workflow(request.into_definition())
        .await?;
    Ok((StatusCode::CREATED, Json(definition)))
}

/// Get a specific workflow
pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<WorkflowDefinition>> {
    let definition = state
        .engine
        .get_workflow(WorkflowDefinitionId::new(id))
        .await?;
    Ok(Json(definition))
}

/// Replace a workflow's steps, conditions and priority
pub async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(request): Json<WorkflowRequest>,
) -> ApiResult<Json<WorkflowDefinition>> {
    let definition = state
        .engine
        .update_workflow(WorkflowDefinitionId::new(id), request.into_definition())
        .await?;
    Ok(Json(definition))
}

pub async fn activate_workflow(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<WorkflowDefinition>> {
    let definition = state
        .engine
        .activate_workflow(WorkflowDefinitionId::new(id))
        .await?;
    Ok(Json(definition))
}

pub async fn deactivate_workflow(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<Json<WorkflowDefinition>> {
    let definition = state
        .engine
        .deactivate_workflow(WorkflowDefinitionId::new(id))
        .await?;
    Ok(Json(definition))
}
