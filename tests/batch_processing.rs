mod common;

use common::{CountingChecker, StubChecker};
use lead_compliance::{
    checkers::{Capabilities, Checker, CheckerRegistry},
    storage::{AuditStore, BatchItemStatus, BatchStatus, Database},
    BatchProcessor, ComplianceEngine, ComplianceError,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn processor_with(db: Arc<Database>, checker: impl Checker + 'static, concurrency: usize) -> BatchProcessor {
    let mut registry = CheckerRegistry::new();
    registry.register(Arc::new(checker), Capabilities::all_kinds()).unwrap();
    let engine = Arc::new(ComplianceEngine::new(registry, Duration::from_secs(2)));
    BatchProcessor::new(engine, db, concurrency, 100)
}

fn on_disk_db(dir: &tempfile::TempDir) -> Arc<Database> {
    let path = dir.path().join("audit.db");
    Arc::new(Database::new(path.to_str().unwrap()).unwrap())
}

#[tokio::test]
async fn test_malformed_member_fails_alone() {
    let dir = tempfile::tempdir().unwrap();
    let db = on_disk_db(&dir);
    let processor = processor_with(db.clone(), StubChecker::blocking("internal-dnc", &["9317167522"]), 2);

    let inputs = vec!["6507769592".to_string(), "???".to_string(), "9317167522".to_string()];
    let job = processor.submit(inputs, Some("march".into())).await.unwrap().wait().await.unwrap();

    assert_eq!(job.status, BatchStatus::Completed);
    assert_eq!(job.total_items, 3);
    assert_eq!(job.processed_items, 3);
    assert_eq!(job.successful_items, 2);
    assert_eq!(job.failed_items, 1);
    assert!(job.completed_at.is_some());

    let items = db.items(&job.id).unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[1].status, BatchItemStatus::Failed);
    assert!(items[1].error.as_deref().unwrap().contains("???"));
    // A non-compliant verdict is still a successful item
    let blocked = items[2].verdict.as_ref().unwrap();
    assert!(!blocked.is_compliant);
    assert_eq!(items[2].status, BatchItemStatus::Succeeded);
}

#[tokio::test]
async fn test_duplicates_are_checked_once() {
    let db = Arc::new(Database::in_memory().unwrap());
    let processor = processor_with(db.clone(), StubChecker::clean("internal-dnc"), 4);

    let inputs = vec![
        "6507769592".to_string(),
        "6507769592".to_string(),
        "lead@example.com".to_string(),
    ];
    let job = processor.submit(inputs, None).await.unwrap().wait().await.unwrap();

    assert_eq!(job.total_items, 2);
    assert_eq!(job.successful_items, 2);
    assert_eq!(db.items(&job.id).unwrap().len(), 2);
}

#[tokio::test]
async fn test_all_members_malformed_fails_the_job() {
    let db = Arc::new(Database::in_memory().unwrap());
    let processor = processor_with(db.clone(), StubChecker::clean("internal-dnc"), 2);

    let job = processor
        .submit(vec!["!!".to_string(), "???".to_string()], None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(job.status, BatchStatus::Failed);
    assert_eq!(job.failed_items, 2);
}

#[tokio::test]
async fn test_empty_and_oversized_batches_are_rejected() {
    let db = Arc::new(Database::in_memory().unwrap());
    let mut registry = CheckerRegistry::new();
    registry
        .register(Arc::new(StubChecker::clean("internal-dnc")), Capabilities::all_kinds())
        .unwrap();
    let engine = Arc::new(ComplianceEngine::new(registry, Duration::from_secs(1)));
    let processor = BatchProcessor::new(engine, db.clone(), 2, 2);

    let err = processor.submit(Vec::new(), None).await.unwrap_err();
    assert!(matches!(err, ComplianceError::Validation(_)));

    let inputs = (0..3).map(|i| format!("650776959{}", i)).collect();
    let err = processor.submit(inputs, None).await.unwrap_err();
    assert!(matches!(err, ComplianceError::Validation(_)));
    assert!(db.list_jobs(10).unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_batch_resumes_from_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let db = on_disk_db(&dir);
    let slow = StubChecker::clean("internal-dnc").with_delay(Duration::from_millis(100));
    let processor = processor_with(db.clone(), slow, 1);

    let inputs: Vec<String> = (0..5).map(|i| format!("650776959{}", i)).collect();
    let handle = processor.submit(inputs, None).await.unwrap();
    handle.cancel();
    let interrupted = handle.wait().await.unwrap();

    assert_eq!(interrupted.status, BatchStatus::Processing);
    assert!(interrupted.processed_items < 5);
    let checkpoint = interrupted.processed_items;

    // A fresh processor over the same database picks up where it stopped
    let reopened = on_disk_db(&dir);
    let processor = processor_with(reopened.clone(), StubChecker::clean("internal-dnc"), 2);
    let resumed = processor.resume(&interrupted.id).await.unwrap();
    assert_eq!(resumed.progress().borrow().processed, checkpoint);

    let job = resumed.wait().await.unwrap();
    assert_eq!(job.status, BatchStatus::Completed);
    assert_eq!(job.processed_items, 5);
    assert_eq!(job.successful_items, 5);
    assert!(reopened.pending_items(&job.id).unwrap().is_empty());
}

#[tokio::test]
async fn test_terminal_job_cannot_be_resumed_or_changed() {
    let db = Arc::new(Database::in_memory().unwrap());
    let processor = processor_with(db.clone(), StubChecker::clean("internal-dnc"), 2);

    let job = processor
        .submit(vec!["6507769592".to_string()], None)
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(job.status, BatchStatus::Completed);

    let err = processor.resume(&job.id).await.unwrap_err();
    assert!(matches!(err, ComplianceError::JobTerminal(_)));

    assert!(db.update_progress(&job.id, 0, 0, 0).is_err());
    assert!(!db.finish_job(&job.id, BatchStatus::Failed).unwrap());
    assert_eq!(db.job(&job.id).unwrap().unwrap(), job);

    let err = processor.resume("no-such-job").await.unwrap_err();
    assert!(matches!(err, ComplianceError::JobNotFound(_)));
}

#[tokio::test]
async fn test_progress_snapshots_are_monotonic() {
    let db = Arc::new(Database::in_memory().unwrap());
    let slow = StubChecker::clean("internal-dnc").with_delay(Duration::from_millis(10));
    let processor = processor_with(db, slow, 2);

    let inputs: Vec<String> = (0..6).map(|i| format!("650776959{}", i)).collect();
    let handle = processor.submit(inputs, None).await.unwrap();
    let mut progress = handle.progress();

    let watcher = tokio::spawn(async move {
        let mut seen = vec![progress.borrow().processed];
        while progress.changed().await.is_ok() {
            seen.push(progress.borrow_and_update().processed);
        }
        seen
    });

    let job = handle.wait().await.unwrap();
    let seen = watcher.await.unwrap();

    assert_eq!(job.processed_items, 6);
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(seen.last().copied(), Some(6));
}

#[tokio::test]
async fn test_concurrent_resume_is_refused_while_a_run_owns_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let db = on_disk_db(&dir);
    let slow = StubChecker::clean("internal-dnc").with_delay(Duration::from_millis(50));
    let processor = processor_with(db.clone(), slow, 1);

    let inputs: Vec<String> = (0..6).map(|i| format!("650776959{}", i)).collect();
    let handle = processor.submit(inputs, None).await.unwrap();
    handle.cancel();
    let interrupted = handle.wait().await.unwrap();
    assert_eq!(interrupted.status, BatchStatus::Processing);

    let first = processor.resume(&interrupted.id).await.unwrap();
    let err = processor
        .clone()
        .with_concurrency(3)
        .resume(&interrupted.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ComplianceError::JobRunning(_)));

    let job = first.wait().await.unwrap();
    assert_eq!(job.status, BatchStatus::Completed);
    assert_eq!(job.processed_items, 6);
    assert_eq!(job.successful_items, 6);
    let succeeded = db
        .items(&job.id)
        .unwrap()
        .iter()
        .filter(|i| i.status == BatchItemStatus::Succeeded)
        .count();
    assert_eq!(succeeded, 6);
}

#[tokio::test]
async fn test_in_flight_checks_never_exceed_concurrency() {
    let db = Arc::new(Database::in_memory().unwrap());
    let checker = CountingChecker::new("internal-dnc", Duration::from_millis(30));
    let peak = checker.peak();
    let processor = processor_with(db, checker, 2);

    let inputs: Vec<String> = (0..8).map(|i| format!("650776959{}", i)).collect();
    let job = processor.submit(inputs, None).await.unwrap().wait().await.unwrap();

    assert_eq!(job.status, BatchStatus::Completed);
    assert_eq!(job.processed_items, 8);
    assert_eq!(peak.load(Ordering::SeqCst), 2);
}
