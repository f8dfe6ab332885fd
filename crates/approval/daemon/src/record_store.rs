//! Record-store callback used when no business store is wired in

use approval_engine::{RecordStore, RecordStoreError};
use approval_types::{ApprovalOutcome, RecordRef};
use async_trait::async_trait;

/// Logs every resolved approval instead of updating a record
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingRecordStore;

#[async_trait]
impl RecordStore for LoggingRecordStore {
    async fn on_approval_resolved(
        &self,
        record: RecordRef,
        outcome: ApprovalOutcome,
    ) -> Result<(), RecordStoreError> {
        tracing::info!(
            module_type = %record.module_type,
            module_id = record.module_id,
            outcome = %outcome,
            "Record approval resolved"
        );
        Ok(())
    }
}
