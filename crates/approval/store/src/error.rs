use approval_types::{ApprovalError, ApprovalInstanceId};
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage-layer errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    /// A compare-and-set write found a different version than expected.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Another instance is already active for the same record.
    #[error("record already has active approval instance {0}")]
    ActiveInstanceExists(ApprovalInstanceId),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

impl From<StorageError> for ApprovalError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ActiveInstanceExists(existing) => {
                ApprovalError::InstanceAlreadyActive { existing }
            }
            StorageError::Conflict(_) => ApprovalError::Conflict { attempts: 1 },
            other => ApprovalError::Storage(other.to_string()),
        }
    }
}
