//! Todo handlers

use crate::api::state::AppState;
use crate::error::{ApiError, ApiResult};
use approval_engine::NewTask;
use approval_types::{Todo, TodoId, TodoStats, TodoStatus, UserId};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

/// Inbox query: `?owner_id=amy&status=pending,in_progress`
#[derive(Debug, Deserialize)]
pub struct TodoQuery {
    pub owner_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

fn parse_statuses(raw: Option<&str>) -> ApiResult<Vec<TodoStatus>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<TodoStatus>().map_err(ApiError::from))
        .collect()
}

pub async fn list_todos(
    State(state): State<AppState>,
    Query(query): Query<TodoQuery>,
) -> ApiResult<Json<Vec<Todo>>> {
    let statuses = parse_statuses(query.status.as_deref())?;
    let todos = state
        .engine
        .get_todos(&UserId::new(query.owner_id), &statuses)
        .await?;
    Ok(Json(todos))
}

/// Owner query
#[derive(Debug, Deserialize)]
pub struct OwnerQuery {
    pub owner_id: String,
}

pub async fn todo_stats(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> ApiResult<Json<TodoStats>> {
    let stats = state
        .engine
        .get_todo_stats(&UserId::new(query.owner_id))
        .await?;
    Ok(Json(stats))
}

/// One todo, read by its owner: `?owner_id=amy`
pub async fn get_todo(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> ApiResult<Json<Todo>> {
    let todo = state
        .engine
        .get_todo(&TodoId::new(id), &UserId::new(query.owner_id))
        .await?;
    Ok(Json(todo))
}

/// Create a free-standing task
pub async fn create_task(
    State(state): State<AppState>,
    Json(task): Json<NewTask>,
) -> ApiResult<(StatusCode, Json<Todo>)> {
    let todo = state.engine.create_task(task).await?;
    Ok((StatusCode::CREATED, Json(todo)))
}

/// The acting user
#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub actor_id: UserId,
    #[serde(default)]
    pub comment: Option<String>,
}

pub async fn start_todo(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ActorRequest>,
) -> ApiResult<Json<Todo>> {
    let todo = state
        .engine
        .start_todo(&TodoId::new(id), &request.actor_id)
        .await?;
    Ok(Json(todo))
}

pub async fn complete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ActorRequest>,
) -> ApiResult<Json<Todo>> {
    let todo = state
        .engine
        .complete_task(&TodoId::new(id), &request.actor_id, request.comment)
        .await?;
    Ok(Json(todo))
}

pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ActorRequest>,
) -> ApiResult<Json<Todo>> {
    let todo = state
        .engine
        .cancel_task(&TodoId::new(id), &request.actor_id)
        .await?;
    Ok(Json(todo))
}
