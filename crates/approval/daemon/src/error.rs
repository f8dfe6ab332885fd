//! Error types for approvald

use approval_types::ApprovalError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] approval_store::StorageError),

    /// Engine error outside a request
    #[error("Engine error: {0}")]
    Engine(#[from] ApprovalError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Engine error, mapped by kind
    #[error(transparent)]
    Approval(#[from] ApprovalError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Approval(err) => approval_status(err),
        }
    }
}

fn approval_status(err: &ApprovalError) -> (StatusCode, &'static str) {
    use ApprovalError::*;
    match err {
        InvalidDefinition(_) => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_DEFINITION"),
        InvalidTodo(_) => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_TODO"),
        InvalidReturnTarget { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_RETURN_TARGET"),
        UnknownModuleType(_) => (StatusCode::BAD_REQUEST, "UNKNOWN_MODULE_TYPE"),
        UnknownTodoStatus(_) => (StatusCode::BAD_REQUEST, "UNKNOWN_TODO_STATUS"),
        InvalidAmount(_) => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
        InstanceAlreadyActive { .. } => (StatusCode::CONFLICT, "INSTANCE_ALREADY_ACTIVE"),
        TaskAlreadyResolved(_) => (StatusCode::CONFLICT, "TASK_ALREADY_RESOLVED"),
        UnresolvableApprovers(_) => (StatusCode::CONFLICT, "UNRESOLVABLE_APPROVERS"),
        InstanceNotEscalated(_) => (StatusCode::CONFLICT, "INSTANCE_NOT_ESCALATED"),
        NotTaskTodo(_) => (StatusCode::CONFLICT, "NOT_TASK_TODO"),
        NotApprovalTodo(_) => (StatusCode::CONFLICT, "NOT_APPROVAL_TODO"),
        Conflict { .. } => (StatusCode::CONFLICT, "CONCURRENT_MODIFICATION"),
        DefinitionNotFound(_) | InstanceNotFound(_) | TodoNotFound(_) | TaskTokenNotFound(_) => {
            (StatusCode::NOT_FOUND, "NOT_FOUND")
        }
        NotTodoOwner { .. } | ActorNotInStep { .. } => (StatusCode::FORBIDDEN, "FORBIDDEN"),
        InvalidTodoTransition { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "INVALID_TODO_TRANSITION")
        }
        Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code, "Request failed");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;
    use approval_types::{ApprovalInstanceId, TaskToken, TodoId, TodoStatus};

    fn status_of(err: ApprovalError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_bad_input_maps_to_bad_request() {
        assert_eq!(
            status_of(ApprovalError::InvalidAmount(f64::NAN)),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ApprovalError::UnknownTodoStatus("done".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ApprovalError::UnknownModuleType("lead".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_approval_taxonomy_mapping() {
        assert_eq!(
            status_of(ApprovalError::InvalidDefinition("no steps".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(ApprovalError::InstanceAlreadyActive {
                existing: ApprovalInstanceId::new("i-1")
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ApprovalError::TaskAlreadyResolved(TaskToken::new("t"))),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ApprovalError::UnresolvableApprovers("finance".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ApprovalError::TodoNotFound(TodoId::new("x"))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ApprovalError::NotTodoOwner {
                todo: TodoId::new("x"),
                actor: "bob".into()
            }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(ApprovalError::InvalidTodoTransition {
                from: TodoStatus::Completed,
                to: TodoStatus::Pending
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
