pub mod db;
pub mod models;

pub use db::{Database, DatabaseStats};
pub use models::{
    BatchItem, BatchItemStatus, BatchJob, BatchStatus, ItemOutcome, NewSuppression, ScheduleRun,
    ScheduledBatch, SuppressionEntry, SuppressionStatus,
};

use crate::{compliance::verdict::ComplianceVerdict, error::Result};

/// Append-only audit trail for verdicts and batch progress.
///
/// Terminal batch jobs are immutable: once `finish_job` succeeds, later
/// progress and item writes for that job are refused.
pub trait AuditStore: Send + Sync {
    fn record_verdict(&self, verdict: &ComplianceVerdict, batch_id: Option<&str>) -> Result<()>;

    fn verdicts_for(&self, identifier: &str) -> Result<Vec<ComplianceVerdict>>;

    /// Persist a new job together with its (deduplicated) members
    fn create_job(&self, job: &BatchJob, members: &[String]) -> Result<()>;

    fn job(&self, id: &str) -> Result<Option<BatchJob>>;

    /// `pending -> processing`; false when the job was not pending
    fn mark_processing(&self, id: &str) -> Result<bool>;

    /// Write one member's result; false when it had already been recorded
    fn record_item(&self, batch_id: &str, position: u32, outcome: &ItemOutcome) -> Result<bool>;

    fn update_progress(&self, id: &str, processed: u32, successful: u32, failed: u32) -> Result<()>;

    /// Move a job to a terminal state; false when it was already terminal
    fn finish_job(&self, id: &str, status: BatchStatus) -> Result<bool>;

    /// Every member of a batch, in submission order
    fn items(&self, batch_id: &str) -> Result<Vec<BatchItem>>;

    /// Members not yet processed, as `(position, raw input)`
    fn pending_items(&self, batch_id: &str) -> Result<Vec<(u32, String)>>;
}
