//! Approval instance handlers

use crate::api::state::AppState;
use crate::error::ApiResult;
use approval_engine::{StartOutcome, StartRequest};
use approval_types::{
    ApprovalInstance, ApprovalInstanceId, HistoryEntry, StepExecution, UserId,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

/// Start an approval for a record.
///
/// `201` when an instance was created (auto-approved or running),
/// `200` with the existing instance when one was already active.
pub async fn start_approval(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> ApiResult<(StatusCode, Json<StartOutcome>)> {
    let outcome = state.engine.start_approval(request).await?;
    let status = if outcome.is_new() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

pub async fn get_approval(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApprovalInstance>> {
    let instance = state
        .engine
        .get_instance(&ApprovalInstanceId::new(id))
        .await?;
    Ok(Json(instance))
}

pub async fn approval_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<HistoryEntry>>> {
    let history = state.engine.history(&ApprovalInstanceId::new(id)).await?;
    Ok(Json(history))
}

pub async fn approval_steps(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<StepExecution>>> {
    let executions = state
        .engine
        .step_executions(&ApprovalInstanceId::new(id))
        .await?;
    Ok(Json(executions))
}

/// Instances waiting on an administrator
pub async fn escalated_approvals(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ApprovalInstance>>> {
    let instances = state.engine.escalated_instances().await?;
    Ok(Json(instances))
}

pub async fn retry_activation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApprovalInstance>> {
    let instance = state
        .engine
        .retry_activation(&ApprovalInstanceId::new(id))
        .await?;
    Ok(Json(instance))
}

/// Reassign request
#[derive(Debug, Deserialize)]
pub struct ReassignRequest {
    pub user_ids: Vec<UserId>,
    pub admin_id: UserId,
}

pub async fn reassign_step(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ReassignRequest>,
) -> ApiResult<Json<ApprovalInstance>> {
    let instance = state
        .engine
        .reassign_step(
            &ApprovalInstanceId::new(id),
            &request.user_ids,
            &request.admin_id,
        )
        .await?;
    Ok(Json(instance))
}
