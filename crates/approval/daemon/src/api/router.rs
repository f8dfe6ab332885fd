//! API Router configuration

use super::handlers;
use super::state::AppState;
use crate::config::ServerConfig;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the main API router
pub fn create_router(state: AppState, server: &ServerConfig) -> Router {
    let api_routes = Router::new()
        // Health
        .route("/health", get(handlers::health_check))
        // Workflow definitions
        .route(
            "/workflows",
            get(handlers::list_workflows).post(handlers::define_workflow),
        )
        .route(
            "/workflows/:id",
            get(handlers::get_workflow).put(handlers::update_workflow),
        )
        .route("/workflows/:id/activate", post(handlers::activate_workflow))
        .route(
            "/workflows/:id/deactivate",
            post(handlers::deactivate_workflow),
        )
        // Approval instances
        .route("/approvals", post(handlers::start_approval))
        .route("/approvals/escalated", get(handlers::escalated_approvals))
        .route("/approvals/:id", get(handlers::get_approval))
        .route("/approvals/:id/history", get(handlers::approval_history))
        .route("/approvals/:id/steps", get(handlers::approval_steps))
        .route("/approvals/:id/retry", post(handlers::retry_activation))
        .route("/approvals/:id/reassign", post(handlers::reassign_step))
        // Decisions
        .route("/decisions", post(handlers::submit_decision))
        // Todos
        .route("/todos", get(handlers::list_todos).post(handlers::create_task))
        .route("/todos/stats", get(handlers::todo_stats))
        .route("/todos/:id", get(handlers::get_todo))
        .route("/todos/:id/start", post(handlers::start_todo))
        .route("/todos/:id/complete", post(handlers::complete_task))
        .route("/todos/:id/cancel", post(handlers::cancel_task));

    let router = Router::new()
        .nest("/api/v1", api_routes)
        .layer(DefaultBodyLimit::max(server.max_body_size))
        .layer(TraceLayer::new_for_http());

    let router = if server.enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}
