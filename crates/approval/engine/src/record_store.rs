//! Callback contract for the business-record stores

use approval_types::{ApprovalOutcome, RecordRef};
use async_trait::async_trait;

/// Failures a record store may report from its callback
#[derive(Debug, thiserror::Error)]
pub enum RecordStoreError {
    #[error("record {0} not found")]
    RecordNotFound(RecordRef),

    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

/// Implemented by each record store (contracts, expenses, ...). The store
/// maps the outcome onto its own status vocabulary.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn on_approval_resolved(
        &self,
        record: RecordRef,
        outcome: ApprovalOutcome,
    ) -> Result<(), RecordStoreError>;
}
