use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use crate::{
    error::{ComplianceError, Result},
    notify::{Notifiers, NotifyEvent},
    storage::{AuditStore, BatchItemStatus, BatchJob, BatchStatus},
};

/// Point-in-time view of a running batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchProgress {
    pub job_id: String,
    pub status: BatchStatus,
    pub total: u32,
    pub processed: u32,
    pub successful: u32,
    pub failed: u32,
}

impl BatchProgress {
    pub fn from_job(job: &BatchJob) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            total: job.total_items,
            processed: job.processed_items,
            successful: job.successful_items,
            failed: job.failed_items,
        }
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.processed as f64 * 100.0 / self.total as f64
        }
    }

    pub fn is_done(&self) -> bool {
        self.processed >= self.total
    }

    /// `failed` only when nothing succeeded
    pub fn terminal_status(&self) -> BatchStatus {
        if self.total > 0 && self.failed == self.total {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        }
    }

    /// Recount from the persisted items, which are the source of truth
    /// after an interruption
    pub fn recount(job: &BatchJob, store: &dyn AuditStore) -> Result<Self> {
        let mut progress = Self::from_job(job);
        let items = store.items(&job.id)?;

        progress.total = items.len() as u32;
        progress.successful = items.iter().filter(|i| i.status == BatchItemStatus::Succeeded).count() as u32;
        progress.failed = items.iter().filter(|i| i.status == BatchItemStatus::Failed).count() as u32;
        progress.processed = progress.successful + progress.failed;
        Ok(progress)
    }
}

/// Sole owner of a job's counters.
///
/// Workers send one message per recorded item; the actor folds them into
/// the counters, persists, publishes a snapshot and, once every item is
/// accounted for, performs the terminal transition. Nothing else writes
/// the counters, so no update can be lost.
pub(crate) struct ProgressActor {
    store: Arc<dyn AuditStore>,
    state: BatchProgress,
    publisher: watch::Sender<BatchProgress>,
    notifiers: Notifiers,
}

impl ProgressActor {
    pub(crate) fn new(
        store: Arc<dyn AuditStore>,
        initial: BatchProgress,
        notifiers: Notifiers,
    ) -> (Self, watch::Receiver<BatchProgress>) {
        let (publisher, receiver) = watch::channel(initial.clone());
        let actor = Self {
            store,
            state: initial,
            publisher,
            notifiers,
        };
        (actor, receiver)
    }

    /// Move the job to `processing` as its run starts dispatching. A resumed
    /// job that is already processing keeps its original start time.
    pub(crate) fn begin(&mut self) -> Result<()> {
        if self.store.mark_processing(&self.state.job_id)? {
            debug!("Batch {} is now processing", self.state.job_id);
        }
        self.state.status = BatchStatus::Processing;
        self.publisher.send_replace(self.state.clone());
        Ok(())
    }

    /// Consume outcomes (true = item reached a verdict) until every sender
    /// is gone, then settle the job
    pub(crate) async fn run(mut self, mut outcomes: mpsc::Receiver<bool>) -> Result<BatchJob> {
        while let Some(success) = outcomes.recv().await {
            self.state.processed += 1;
            if success {
                self.state.successful += 1;
            } else {
                self.state.failed += 1;
            }

            if let Err(e) = self.store.update_progress(
                &self.state.job_id,
                self.state.processed,
                self.state.successful,
                self.state.failed,
            ) {
                error!("Failed to persist progress for job {}: {}", self.state.job_id, e);
            }

            debug!(
                job_id = %self.state.job_id,
                processed = self.state.processed,
                total = self.state.total,
                "batch progress"
            );
            self.publisher.send_replace(self.state.clone());
        }

        self.settle()
    }

    fn settle(mut self) -> Result<BatchJob> {
        let job_id = self.state.job_id.clone();

        if self.state.is_done() {
            let status = self.state.terminal_status();
            if self.store.finish_job(&job_id, status)? {
                info!(
                    "Batch {} {}: {} checked, {} failed of {}",
                    job_id, status, self.state.successful, self.state.failed, self.state.total
                );
                self.state.status = status;
                self.publisher.send_replace(self.state.clone());

                if let Some(job) = self.store.job(&job_id)? {
                    self.notifiers.dispatch(NotifyEvent::BatchCompleted(job));
                }
            } else {
                debug!("Batch {} was already terminal", job_id);
            }
        } else {
            warn!(
                "Batch {} stopped with {} of {} items pending",
                job_id,
                self.state.total - self.state.processed,
                self.state.total
            );
        }

        self.store
            .job(&job_id)?
            .ok_or(ComplianceError::JobNotFound(job_id))
    }
}
