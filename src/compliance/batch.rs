use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use crate::{
    compliance::{
        engine::{CheckContext, ComplianceEngine},
        progress::{BatchProgress, ProgressActor},
    },
    error::{ComplianceError, Result},
    identifier::Identifier,
    notify::Notifiers,
    storage::{AuditStore, BatchJob, ItemOutcome},
};

/// Runs many identifiers through the engine with bounded concurrency,
/// checkpointing every item so an interrupted job can be resumed.
#[derive(Clone)]
pub struct BatchProcessor {
    engine: Arc<ComplianceEngine>,
    store: Arc<dyn AuditStore>,
    concurrency: usize,
    max_items: usize,
    notifiers: Notifiers,
    running: Arc<Mutex<HashSet<String>>>,
}

/// Exclusive ownership of a job by one run of this processor; released on drop
struct RunClaim {
    job_id: String,
    running: Arc<Mutex<HashSet<String>>>,
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.job_id);
    }
}

/// Cloneable switch that stops a running batch from dispatching more items
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Live view of a submitted job
#[derive(Debug)]
pub struct BatchHandle {
    job_id: String,
    progress: watch::Receiver<BatchProgress>,
    cancelled: Arc<AtomicBool>,
    task: JoinHandle<Result<BatchJob>>,
}

impl BatchHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn progress(&self) -> watch::Receiver<BatchProgress> {
        self.progress.clone()
    }

    /// Stop dispatching new items. In-flight items still finish and are
    /// recorded; the rest stay pending for `resume`.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancelled.clone())
    }

    /// Wait for the run to stop and return the job as persisted
    pub async fn wait(self) -> Result<BatchJob> {
        self.task
            .await
            .map_err(|e| ComplianceError::Other(anyhow::anyhow!("batch task for {} aborted: {}", self.job_id, e)))?
    }
}

impl BatchProcessor {
    pub fn new(engine: Arc<ComplianceEngine>, store: Arc<dyn AuditStore>, concurrency: usize, max_items: usize) -> Self {
        Self {
            engine,
            store,
            concurrency: concurrency.max(1),
            max_items,
            notifiers: Notifiers::new(),
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_notifiers(mut self, notifiers: Notifiers) -> Self {
        self.notifiers = notifiers;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Claim a job for one run. Clones of this processor share the claims,
    /// so a second run of the same job is refused while the first is live.
    fn claim(&self, job_id: &str) -> Result<RunClaim> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if !running.insert(job_id.to_string()) {
            return Err(ComplianceError::JobRunning(job_id.to_string()));
        }
        Ok(RunClaim {
            job_id: job_id.to_string(),
            running: self.running.clone(),
        })
    }

    /// Drop repeats, comparing parsed identifiers by normalized value and
    /// unparseable entries by their trimmed text. First occurrence wins.
    pub fn dedup(identifiers: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        identifiers
            .iter()
            .filter(|raw| {
                let key = match Identifier::parse(raw) {
                    Ok(id) => format!("{}:{}", id.kind(), id.value()),
                    Err(_) => format!("raw:{}", raw.trim()),
                };
                seen.insert(key)
            })
            .map(|raw| raw.trim().to_string())
            .collect()
    }

    /// Persist a new job and start processing it in the background
    pub async fn submit(&self, identifiers: Vec<String>, label: Option<String>) -> Result<BatchHandle> {
        if identifiers.is_empty() {
            return Err(ComplianceError::Validation("batch has no identifiers".to_string()));
        }
        if identifiers.len() > self.max_items {
            return Err(ComplianceError::Validation(format!(
                "batch of {} identifiers exceeds the limit of {}",
                identifiers.len(),
                self.max_items
            )));
        }

        let members = Self::dedup(&identifiers);
        let job = BatchJob::new(label, members.len() as u32);
        let claim = self.claim(&job.id)?;
        self.store.create_job(&job, &members)?;

        info!(
            "Submitted batch {} with {} identifiers ({} duplicates dropped)",
            job.id,
            members.len(),
            identifiers.len() - members.len()
        );

        let pending = members
            .into_iter()
            .enumerate()
            .map(|(i, raw)| (i as u32, raw))
            .collect();
        Ok(self.spawn(claim, BatchProgress::from_job(&job), pending))
    }

    /// Continue a non-terminal job from its last checkpoint. Fails with
    /// `JobRunning` while another run of this processor owns the job.
    pub async fn resume(&self, job_id: &str) -> Result<BatchHandle> {
        let claim = self.claim(job_id)?;
        let job = self
            .store
            .job(job_id)?
            .ok_or_else(|| ComplianceError::JobNotFound(job_id.to_string()))?;
        if job.status.is_terminal() {
            return Err(ComplianceError::JobTerminal(job_id.to_string()));
        }

        let pending = self.store.pending_items(job_id)?;
        let progress = BatchProgress::recount(&job, self.store.as_ref())?;

        info!("Resuming batch {}: {} of {} items pending", job_id, pending.len(), progress.total);
        Ok(self.spawn(claim, progress, pending))
    }

    fn spawn(&self, claim: RunClaim, initial: BatchProgress, pending: Vec<(u32, String)>) -> BatchHandle {
        let job_id = initial.job_id.clone();
        let cancelled = Arc::new(AtomicBool::new(false));
        let (mut actor, progress) = ProgressActor::new(self.store.clone(), initial, self.notifiers.clone());
        let (outcome_tx, outcome_rx) = mpsc::channel(self.concurrency * 2);

        let workers = dispatch(
            self.engine.clone(),
            self.store.clone(),
            job_id.clone(),
            pending,
            self.concurrency,
            cancelled.clone(),
            outcome_tx,
        );

        let task = tokio::spawn(async move {
            let _claim = claim;
            actor.begin()?;
            let (_, settled) = tokio::join!(workers, actor.run(outcome_rx));
            settled
        });

        BatchHandle {
            job_id,
            progress,
            cancelled,
            task,
        }
    }
}

/// Feed pending items through the engine; the outcome sender is dropped
/// when this returns, which lets the progress actor settle
async fn dispatch(
    engine: Arc<ComplianceEngine>,
    store: Arc<dyn AuditStore>,
    job_id: String,
    pending: Vec<(u32, String)>,
    concurrency: usize,
    cancelled: Arc<AtomicBool>,
    outcomes: mpsc::Sender<bool>,
) {
    let ctx = CheckContext::new().with_batch_id(job_id.clone());
    let (engine, store, id, ctx, outcomes) = (engine.as_ref(), store.as_ref(), job_id.as_str(), &ctx, &outcomes);

    stream::iter(pending)
        .take_while(|_| futures::future::ready(!cancelled.load(Ordering::SeqCst)))
        .map(move |(position, raw)| process_item(engine, store, id, ctx, position, raw))
        .buffer_unordered(concurrency)
        .for_each(move |recorded| async move {
            if let Some(success) = recorded {
                if outcomes.send(success).await.is_err() {
                    error!("Progress actor for batch {} went away", id);
                }
            }
        })
        .await;

    if cancelled.load(Ordering::SeqCst) {
        info!("Batch {} cancelled, remaining items left pending", job_id);
    }
}

/// Check one member and checkpoint it. Returns whether it reached a
/// verdict, or `None` when nothing new was recorded.
async fn process_item(
    engine: &ComplianceEngine,
    store: &dyn AuditStore,
    job_id: &str,
    ctx: &CheckContext,
    position: u32,
    raw: String,
) -> Option<bool> {
    let outcome = match Identifier::parse(&raw) {
        Ok(identifier) => ItemOutcome::Verdict(engine.check_identifier(&identifier, ctx).await),
        Err(e) => {
            debug!("Batch {} item {} is malformed: {}", job_id, position, e);
            ItemOutcome::Error(e.to_string())
        }
    };

    match store.record_item(job_id, position, &outcome) {
        Ok(true) => Some(outcome.is_success()),
        Ok(false) => {
            debug!("Batch {} item {} was already recorded", job_id, position);
            None
        }
        Err(e) => {
            error!("Failed to record batch {} item {}: {}", job_id, position, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkers::{Capabilities, CheckResult, CheckerRegistry, MockChecker};
    use crate::storage::{BatchStatus, Database};
    use serde_json::json;
    use std::time::Duration;

    fn processor(store: Arc<Database>, max_items: usize) -> BatchProcessor {
        let mut checker = MockChecker::new();
        checker.expect_source().return_const("internal-dnc");
        checker
            .expect_check()
            .returning(|_| CheckResult::compliant("internal-dnc", json!({})));

        let mut registry = CheckerRegistry::new();
        registry.register(Arc::new(checker), Capabilities::all_kinds()).unwrap();
        let engine = Arc::new(ComplianceEngine::new(registry, Duration::from_millis(200)));
        BatchProcessor::new(engine, store, 2, max_items)
    }

    #[test]
    fn test_dedup_by_normalized_form() {
        let input = vec![
            "(650) 776-9592".to_string(),
            "+1 650 776 9592".to_string(),
            "garbage".to_string(),
            " garbage ".to_string(),
            "9317167522".to_string(),
        ];
        assert_eq!(
            BatchProcessor::dedup(&input),
            vec!["(650) 776-9592", "garbage", "9317167522"]
        );
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_and_oversized() {
        let store = Arc::new(Database::in_memory().unwrap());
        let processor = processor(store, 2);

        assert!(processor.submit(vec![], None).await.unwrap_err().is_validation());

        let too_many = vec!["6507769592".into(), "9317167522".into(), "2125550100".into()];
        assert!(processor.submit(too_many, None).await.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_mixed_batch_completes() {
        let store = Arc::new(Database::in_memory().unwrap());
        let processor = processor(store.clone(), 100);

        let handle = processor
            .submit(vec!["6507769592".into(), "bogus!".into(), "lead@example.com".into()], Some("mixed".into()))
            .await
            .unwrap();
        let job = handle.wait().await.unwrap();

        assert_eq!(job.status, BatchStatus::Completed);
        assert_eq!(job.total_items, 3);
        assert_eq!(job.processed_items, 3);
        assert_eq!(job.successful_items, 2);
        assert_eq!(job.failed_items, 1);
        assert_eq!(store.items(&job.id).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_all_malformed_batch_fails() {
        let store = Arc::new(Database::in_memory().unwrap());
        let processor = processor(store, 100);

        let job = processor
            .submit(vec!["???".into(), "!!".into()], None)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(job.status, BatchStatus::Failed);
        assert_eq!(job.failed_items, 2);
    }

    #[tokio::test]
    async fn test_job_stays_pending_until_its_run_starts() {
        let store = Arc::new(Database::in_memory().unwrap());
        let processor = processor(store.clone(), 100);

        let handle = processor.submit(vec!["6507769592".into()], None).await.unwrap();
        // The run task has not been polled yet on this single-threaded runtime
        assert_eq!(store.job(handle.job_id()).unwrap().unwrap().status, BatchStatus::Pending);
        assert!(store.job(handle.job_id()).unwrap().unwrap().started_at.is_none());

        let job = handle.wait().await.unwrap();
        assert_eq!(job.status, BatchStatus::Completed);
        assert!(job.started_at.is_some());
        assert!(job.started_at <= job.completed_at);
    }

    #[tokio::test]
    async fn test_live_job_cannot_be_resumed() {
        let store = Arc::new(Database::in_memory().unwrap());
        let processor = processor(store, 100);

        let handle = processor.submit(vec!["6507769592".into()], None).await.unwrap();
        let err = processor.clone().with_concurrency(4).resume(handle.job_id()).await.unwrap_err();
        assert!(matches!(err, ComplianceError::JobRunning(_)));

        let job = handle.wait().await.unwrap();
        assert_eq!(job.status, BatchStatus::Completed);
        // The claim is released with the run
        assert!(matches!(processor.resume(&job.id).await, Err(ComplianceError::JobTerminal(_))));
    }

    #[tokio::test]
    async fn test_resume_terminal_job_is_rejected() {
        let store = Arc::new(Database::in_memory().unwrap());
        let processor = processor(store, 100);

        let job = processor.submit(vec!["6507769592".into()], None).await.unwrap().wait().await.unwrap();
        assert!(matches!(processor.resume(&job.id).await, Err(ComplianceError::JobTerminal(_))));
        assert!(matches!(processor.resume("missing").await, Err(ComplianceError::JobNotFound(_))));
    }
}
