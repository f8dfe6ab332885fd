//! Decision handler

use crate::api::state::AppState;
use crate::error::ApiResult;
use approval_types::{ApprovalInstance, DecisionRequest};
use axum::{extract::State, Json};

/// Apply an approve, reject or return decision and return the instance
/// as it stands afterwards
pub async fn submit_decision(
    State(state): State<AppState>,
    Json(request): Json<DecisionRequest>,
) -> ApiResult<Json<ApprovalInstance>> {
    let instance = state.engine.submit_decision(request).await?;
    Ok(Json(instance))
}
