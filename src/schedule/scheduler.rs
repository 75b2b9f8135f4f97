use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use crate::{
    compliance::BatchProcessor,
    error::{ComplianceError, Result},
    schedule::{Cadence, NextOccurrence},
    storage::{BatchJob, BatchStatus, Database, ScheduledBatch},
};

/// Outcome of one due-schedule scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DueScanSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Turns recurring batch definitions into batch jobs
pub struct Scheduler {
    db: Arc<Database>,
    processor: Arc<BatchProcessor>,
}

impl Scheduler {
    pub fn new(db: Arc<Database>, processor: Arc<BatchProcessor>) -> Self {
        Self { db, processor }
    }

    /// Define a new schedule. The first run is `first_run`, or one cadence
    /// step from now.
    pub fn create(
        &self,
        name: &str,
        identifiers: Vec<String>,
        cadence: &str,
        first_run: Option<DateTime<Utc>>,
    ) -> Result<ScheduledBatch> {
        if identifiers.is_empty() {
            return Err(ComplianceError::Validation("scheduled batch has no identifiers".to_string()));
        }

        let cadence: Cadence = cadence.parse()?;
        let now = Utc::now();
        let next_run = match first_run {
            Some(at) => at,
            None => cadence
                .next_run(now)
                .ok_or_else(|| ComplianceError::InvalidSchedule(format!("'{}' never fires", cadence)))?,
        };

        let schedule = ScheduledBatch {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            identifiers,
            cadence: cadence.to_string(),
            next_run,
            last_run: None,
            enabled: true,
            created_at: now,
        };
        self.db.save_schedule(&schedule)?;

        info!("Created schedule {} ({}), first run {}", schedule.name, schedule.cadence, schedule.next_run);
        Ok(schedule)
    }

    /// Run every enabled schedule whose `next_run <= now`, one at a time,
    /// each to completion
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<DueScanSummary> {
        let due = self.db.due_schedules(now)?;
        let mut summary = DueScanSummary::default();

        if due.is_empty() {
            return Ok(summary);
        }
        info!("{} scheduled batches due", due.len());

        for schedule in due {
            summary.processed += 1;

            let (job_id, error) = match self.run_one(&schedule).await {
                Ok(job) if job.status == BatchStatus::Completed => {
                    summary.succeeded += 1;
                    (Some(job.id), None)
                }
                Ok(job) => {
                    summary.failed += 1;
                    let message = format!("batch ended {} with {} failed items", job.status, job.failed_items);
                    warn!("Schedule {}: {}", schedule.name, message);
                    (Some(job.id), Some(message))
                }
                Err(e) => {
                    summary.failed += 1;
                    error!("Schedule {} failed to run: {}", schedule.name, e);
                    (None, Some(e.to_string()))
                }
            };

            self.db
                .record_schedule_run(&schedule.id, job_id.as_deref(), error.as_deref(), now)?;

            let next_run = match schedule.cadence.parse::<Cadence>() {
                Ok(cadence) => cadence.next_run(now),
                Err(e) => {
                    error!("Schedule {} has an unreadable cadence, disabling: {}", schedule.name, e);
                    None
                }
            };
            self.db.mark_schedule_ran(&schedule.id, now, next_run)?;
        }

        info!(
            "Due scan finished: {} processed, {} succeeded, {} failed",
            summary.processed, summary.succeeded, summary.failed
        );
        Ok(summary)
    }

    async fn run_one(&self, schedule: &ScheduledBatch) -> Result<BatchJob> {
        let label = format!("schedule:{}", schedule.name);
        self.processor
            .submit(schedule.identifiers.clone(), Some(label))
            .await?
            .wait()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkers::{Capabilities, CheckResult, CheckerRegistry, MockChecker};
    use crate::compliance::ComplianceEngine;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use serde_json::json;
    use std::time::Duration;

    fn scheduler() -> (Arc<Database>, Scheduler) {
        let db = Arc::new(Database::in_memory().unwrap());
        let mut checker = MockChecker::new();
        checker.expect_source().return_const("internal-dnc");
        checker
            .expect_check()
            .returning(|_| CheckResult::compliant("internal-dnc", json!({})));
        let mut registry = CheckerRegistry::new();
        registry.register(Arc::new(checker), Capabilities::all_kinds()).unwrap();

        let engine = Arc::new(ComplianceEngine::new(registry, Duration::from_millis(200)));
        let processor = Arc::new(BatchProcessor::new(engine, db.clone(), 2, 100));
        (db.clone(), Scheduler::new(db, processor))
    }

    #[tokio::test]
    async fn test_due_schedule_runs_and_advances() {
        let (db, scheduler) = scheduler();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap();
        let schedule = scheduler
            .create("daily scrub", vec!["6507769592".into()], "daily", Some(now - ChronoDuration::minutes(1)))
            .unwrap();

        let summary = scheduler.run_due(now).await.unwrap();
        assert_eq!(summary, DueScanSummary { processed: 1, succeeded: 1, failed: 0 });

        let stored = db.schedule(&schedule.id).unwrap().unwrap();
        assert_eq!(stored.last_run, Some(now));
        assert_eq!(stored.next_run, now + ChronoDuration::days(1));
        assert_eq!(db.schedule_runs(&schedule.id).unwrap().len(), 1);

        // Nothing is due any more
        assert_eq!(scheduler.run_due(now).await.unwrap().processed, 0);
    }

    #[tokio::test]
    async fn test_all_malformed_schedule_counts_as_failed() {
        let (db, scheduler) = scheduler();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap();
        let schedule = scheduler
            .create("broken list", vec!["nope".into()], "weekly", Some(now))
            .unwrap();

        let summary = scheduler.run_due(now).await.unwrap();
        assert_eq!(summary.failed, 1);
        let runs = db.schedule_runs(&schedule.id).unwrap();
        assert!(!runs[0].success);
        assert!(runs[0].job_id.is_some());
    }

    #[test]
    fn test_create_validates() {
        let (_db, scheduler) = scheduler();
        assert!(scheduler.create("x", vec![], "daily", None).unwrap_err().is_validation());
        assert!(matches!(
            scheduler.create("x", vec!["6507769592".into()], "every tuesday", None),
            Err(ComplianceError::InvalidSchedule(_))
        ));
    }
}
