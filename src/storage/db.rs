use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row};
use serde::{de::DeserializeOwned, Serialize};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;
use crate::{
    compliance::verdict::ComplianceVerdict,
    error::{ComplianceError, Result},
    identifier::Identifier,
    storage::{
        models::{
            BatchItem, BatchItemStatus, BatchJob, BatchStatus, ItemOutcome, NewSuppression,
            ScheduleRun, ScheduledBatch, SuppressionEntry, SuppressionStatus,
        },
        AuditStore,
    },
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS suppression_entries (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        identifier TEXT NOT NULL,
        kind TEXT NOT NULL,
        reason TEXT NOT NULL,
        source TEXT NOT NULL,
        added_by TEXT NOT NULL,
        metadata TEXT NOT NULL,
        status TEXT NOT NULL,
        added_at TEXT NOT NULL,
        expires_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_suppression_lookup ON suppression_entries(identifier, kind, status);

    CREATE TABLE IF NOT EXISTS verdicts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        request_id TEXT NOT NULL,
        identifier TEXT NOT NULL,
        kind TEXT NOT NULL,
        is_compliant INTEGER NOT NULL,
        batch_id TEXT,
        checked_at TEXT NOT NULL,
        payload TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_verdicts_request ON verdicts(request_id);
    CREATE INDEX IF NOT EXISTS idx_verdicts_identifier ON verdicts(identifier);
    CREATE INDEX IF NOT EXISTS idx_verdicts_batch ON verdicts(batch_id);

    CREATE TABLE IF NOT EXISTS check_results (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        verdict_id INTEGER NOT NULL,
        request_id TEXT NOT NULL,
        source TEXT NOT NULL,
        is_compliant INTEGER NOT NULL,
        errored INTEGER NOT NULL,
        errored_reason TEXT,
        latency_ms INTEGER NOT NULL,
        reasons TEXT NOT NULL,
        details TEXT NOT NULL,
        FOREIGN KEY (verdict_id) REFERENCES verdicts(id)
    );

    CREATE TABLE IF NOT EXISTS batch_jobs (
        id TEXT PRIMARY KEY,
        label TEXT,
        status TEXT NOT NULL,
        total_items INTEGER NOT NULL,
        processed_items INTEGER NOT NULL,
        successful_items INTEGER NOT NULL,
        failed_items INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT
    );

    CREATE TABLE IF NOT EXISTS batch_items (
        batch_id TEXT NOT NULL,
        position INTEGER NOT NULL,
        raw_input TEXT NOT NULL,
        status TEXT NOT NULL,
        verdict_id INTEGER,
        error TEXT,
        processed_at TEXT,
        PRIMARY KEY (batch_id, position),
        FOREIGN KEY (batch_id) REFERENCES batch_jobs(id)
    );

    CREATE TABLE IF NOT EXISTS scheduled_batches (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        identifiers TEXT NOT NULL,
        cadence TEXT NOT NULL,
        next_run TEXT NOT NULL,
        last_run TEXT,
        enabled INTEGER NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS schedule_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        schedule_id TEXT NOT NULL,
        job_id TEXT,
        success INTEGER NOT NULL,
        error TEXT,
        ran_at TEXT NOT NULL,
        FOREIGN KEY (schedule_id) REFERENCES scheduled_batches(id)
    );
";

const SUPPRESSION_COLUMNS: &str =
    "id, identifier, kind, reason, source, added_by, metadata, status, added_at, expires_at";

const JOB_COLUMNS: &str = "id, label, status, total_items, processed_items, successful_items, \
     failed_items, created_at, started_at, completed_at";

const SCHEDULE_COLUMNS: &str =
    "id, name, identifiers, cadence, next_run, last_run, enabled, created_at";

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        if path != ":memory:" {
            let mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
            debug!("SQLite journal mode: {}", mode);
        }

        let db = Self { conn: Mutex::new(conn) };
        db.init_schema()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn init_schema(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // Suppression list

    /// Add an identifier to the suppression list, refreshing an existing
    /// active entry in place
    pub fn add_suppression(&self, entry: &NewSuppression) -> Result<SuppressionEntry> {
        let identifier = Identifier::parse(&entry.identifier)?;
        let reason = entry.reason.clone().unwrap_or_else(|| "User opted out".to_string());
        let source = entry.source.clone().unwrap_or_else(|| "manual".to_string());
        let added_by = entry.added_by.clone().unwrap_or_else(|| "system".to_string());
        let metadata = serde_json::to_string(&entry.metadata.clone().unwrap_or_else(|| serde_json::json!({})))?;
        let expires_at = entry.expires_at.as_ref().map(ts);

        let conn = self.conn();
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM suppression_entries WHERE identifier = ?1 AND kind = ?2 AND status = 'active'",
                [identifier.value(), identifier.kind().as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let id = match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE suppression_entries
                     SET reason = ?1, source = ?2, added_by = ?3, metadata = ?4, expires_at = ?5
                     WHERE id = ?6",
                    params![reason, source, added_by, metadata, expires_at, id],
                )?;
                id
            }
            None => {
                conn.execute(
                    "INSERT INTO suppression_entries
                     (identifier, kind, reason, source, added_by, metadata, status, added_at, expires_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active', ?7, ?8)",
                    params![
                        identifier.value(),
                        identifier.kind().as_str(),
                        reason,
                        source,
                        added_by,
                        metadata,
                        ts(&Utc::now()),
                        expires_at,
                    ],
                )?;
                conn.last_insert_rowid()
            }
        };

        let sql = format!("SELECT {} FROM suppression_entries WHERE id = ?1", SUPPRESSION_COLUMNS);
        Ok(conn.query_row(&sql, [id], suppression_from_row)?)
    }

    /// Revoke every active entry for an identifier; returns how many changed
    pub fn revoke_suppression(&self, raw: &str) -> Result<usize> {
        let identifier = Identifier::parse(raw)?;
        let changed = self.conn().execute(
            "UPDATE suppression_entries SET status = 'revoked'
             WHERE identifier = ?1 AND kind = ?2 AND status = 'active'",
            [identifier.value(), identifier.kind().as_str()],
        )?;
        Ok(changed)
    }

    /// Active (non-revoked, non-expired) entries matching any of the identifiers
    /// by both normalized value and kind
    pub fn find_active_suppressions(
        &self,
        identifiers: &[Identifier],
        at: DateTime<Utc>,
    ) -> Result<Vec<SuppressionEntry>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM suppression_entries
             WHERE identifier = ?1 AND kind = ?2 AND status = 'active' ORDER BY id",
            SUPPRESSION_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;

        let mut found = Vec::new();
        for identifier in identifiers {
            let rows = stmt.query_map([identifier.value(), identifier.kind().as_str()], suppression_from_row)?;
            for entry in rows {
                let entry = entry?;
                if entry.is_active_at(at) {
                    found.push(entry);
                }
            }
        }
        Ok(found)
    }

    pub fn list_suppressions(&self, limit: usize) -> Result<Vec<SuppressionEntry>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM suppression_entries ORDER BY id DESC LIMIT ?1",
            SUPPRESSION_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map([limit as i64], suppression_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    // Batch jobs

    pub fn list_jobs(&self, limit: usize) -> Result<Vec<BatchJob>> {
        let conn = self.conn();
        let sql = format!("SELECT {} FROM batch_jobs ORDER BY created_at DESC LIMIT ?1", JOB_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map([limit as i64], job_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    fn job_status(conn: &Connection, id: &str) -> Result<BatchStatus> {
        let status: Option<String> = conn
            .query_row("SELECT status FROM batch_jobs WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        match status {
            Some(s) => s.parse(),
            None => Err(ComplianceError::JobNotFound(id.to_string())),
        }
    }

    // Scheduled batches

    pub fn save_schedule(&self, schedule: &ScheduledBatch) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO scheduled_batches
             (id, name, identifiers, cadence, next_run, last_run, enabled, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                schedule.id,
                schedule.name,
                serde_json::to_string(&schedule.identifiers)?,
                schedule.cadence,
                ts(&schedule.next_run),
                schedule.last_run.as_ref().map(ts),
                schedule.enabled,
                ts(&schedule.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn schedule(&self, id: &str) -> Result<Option<ScheduledBatch>> {
        let sql = format!("SELECT {} FROM scheduled_batches WHERE id = ?1", SCHEDULE_COLUMNS);
        Ok(self.conn().query_row(&sql, [id], schedule_from_row).optional()?)
    }

    pub fn list_schedules(&self) -> Result<Vec<ScheduledBatch>> {
        let conn = self.conn();
        let sql = format!("SELECT {} FROM scheduled_batches ORDER BY next_run", SCHEDULE_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let schedules = stmt
            .query_map([], schedule_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(schedules)
    }

    /// Enabled schedules whose `next_run` is at or before `now`
    pub fn due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledBatch>> {
        Ok(self
            .list_schedules()?
            .into_iter()
            .filter(|s| s.enabled && s.next_run <= now)
            .collect())
    }

    /// Record that a schedule ran; a missing `next_run` disables it
    pub fn mark_schedule_ran(&self, id: &str, ran_at: DateTime<Utc>, next_run: Option<DateTime<Utc>>) -> Result<()> {
        let changed = match next_run {
            Some(next) => self.conn().execute(
                "UPDATE scheduled_batches SET last_run = ?2, next_run = ?3 WHERE id = ?1",
                params![id, ts(&ran_at), ts(&next)],
            )?,
            None => self.conn().execute(
                "UPDATE scheduled_batches SET last_run = ?2, enabled = 0 WHERE id = ?1",
                params![id, ts(&ran_at)],
            )?,
        };
        if changed == 0 {
            return Err(ComplianceError::ScheduleNotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn set_schedule_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE scheduled_batches SET enabled = ?2 WHERE id = ?1",
            params![id, enabled],
        )?;
        if changed == 0 {
            return Err(ComplianceError::ScheduleNotFound(id.to_string()));
        }
        Ok(())
    }

    pub fn record_schedule_run(
        &self,
        schedule_id: &str,
        job_id: Option<&str>,
        error: Option<&str>,
        ran_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO schedule_runs (schedule_id, job_id, success, error, ran_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![schedule_id, job_id, error.is_none(), error, ts(&ran_at)],
        )?;
        Ok(())
    }

    pub fn schedule_runs(&self, schedule_id: &str) -> Result<Vec<ScheduleRun>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, schedule_id, job_id, success, error, ran_at
             FROM schedule_runs WHERE schedule_id = ?1 ORDER BY id",
        )?;
        let runs = stmt
            .query_map([schedule_id], |row| {
                Ok(ScheduleRun {
                    id: row.get(0)?,
                    schedule_id: row.get(1)?,
                    job_id: row.get(2)?,
                    success: row.get(3)?,
                    error: row.get(4)?,
                    ran_at: parse_ts(5, row.get(5)?)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    pub fn get_stats(&self) -> Result<DatabaseStats> {
        let conn = self.conn();
        let count = |sql: &str| -> rusqlite::Result<usize> {
            conn.query_row(sql, [], |row| row.get::<_, i64>(0)).map(|n| n as usize)
        };

        Ok(DatabaseStats {
            total_verdicts: count("SELECT COUNT(*) FROM verdicts")?,
            compliant_verdicts: count("SELECT COUNT(*) FROM verdicts WHERE is_compliant = 1")?,
            errored_checks: count("SELECT COUNT(*) FROM check_results WHERE errored = 1")?,
            batch_jobs: count("SELECT COUNT(*) FROM batch_jobs")?,
            active_batch_jobs: count("SELECT COUNT(*) FROM batch_jobs WHERE status IN ('pending', 'processing')")?,
            active_suppressions: count("SELECT COUNT(*) FROM suppression_entries WHERE status = 'active'")?,
            schedules: count("SELECT COUNT(*) FROM scheduled_batches")?,
        })
    }
}

impl AuditStore for Database {
    fn record_verdict(&self, verdict: &ComplianceVerdict, batch_id: Option<&str>) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        insert_verdict(&tx, verdict, batch_id)?;
        tx.commit()?;
        Ok(())
    }

    fn verdicts_for(&self, identifier: &str) -> Result<Vec<ComplianceVerdict>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT payload FROM verdicts WHERE identifier = ?1 ORDER BY checked_at, rowid",
        )?;
        let verdicts = stmt
            .query_map([identifier], |row| parse_json(0, row.get(0)?))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(verdicts)
    }

    fn create_job(&self, job: &BatchJob, members: &[String]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO batch_jobs
             (id, label, status, total_items, processed_items, successful_items, failed_items,
              created_at, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                job.id,
                job.label,
                job.status.as_str(),
                job.total_items,
                job.processed_items,
                job.successful_items,
                job.failed_items,
                ts(&job.created_at),
                job.started_at.as_ref().map(ts),
                job.completed_at.as_ref().map(ts),
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO batch_items (batch_id, position, raw_input, status) VALUES (?1, ?2, ?3, 'pending')",
            )?;
            for (position, raw) in members.iter().enumerate() {
                stmt.execute(params![job.id, position as u32, raw])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn job(&self, id: &str) -> Result<Option<BatchJob>> {
        let sql = format!("SELECT {} FROM batch_jobs WHERE id = ?1", JOB_COLUMNS);
        Ok(self.conn().query_row(&sql, [id], job_from_row).optional()?)
    }

    fn mark_processing(&self, id: &str) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE batch_jobs SET status = 'processing', started_at = COALESCE(started_at, ?2)
             WHERE id = ?1 AND status = 'pending'",
            params![id, ts(&Utc::now())],
        )?;
        Ok(changed > 0)
    }

    fn record_item(&self, batch_id: &str, position: u32, outcome: &ItemOutcome) -> Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        if Self::job_status(&tx, batch_id)?.is_terminal() {
            return Err(ComplianceError::JobTerminal(batch_id.to_string()));
        }

        let now = ts(&Utc::now());
        let changed = match outcome {
            ItemOutcome::Verdict(verdict) => {
                let verdict_id = insert_verdict(&tx, verdict, Some(batch_id))?;
                tx.execute(
                    "UPDATE batch_items SET status = 'succeeded', verdict_id = ?3, processed_at = ?4
                     WHERE batch_id = ?1 AND position = ?2 AND status = 'pending'",
                    params![batch_id, position, verdict_id, now],
                )?
            }
            ItemOutcome::Error(message) => tx.execute(
                "UPDATE batch_items SET status = 'failed', error = ?3, processed_at = ?4
                 WHERE batch_id = ?1 AND position = ?2 AND status = 'pending'",
                params![batch_id, position, message, now],
            )?,
        };

        // Already recorded: dropping the transaction discards the verdict insert
        if changed == 0 {
            return Ok(false);
        }

        tx.commit()?;
        Ok(true)
    }

    fn update_progress(&self, id: &str, processed: u32, successful: u32, failed: u32) -> Result<()> {
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE batch_jobs SET processed_items = ?2, successful_items = ?3, failed_items = ?4
             WHERE id = ?1 AND status IN ('pending', 'processing')",
            params![id, processed, successful, failed],
        )?;
        if changed == 0 {
            Self::job_status(&conn, id)?;
            return Err(ComplianceError::JobTerminal(id.to_string()));
        }
        Ok(())
    }

    fn finish_job(&self, id: &str, status: BatchStatus) -> Result<bool> {
        if !status.is_terminal() {
            return Err(ComplianceError::Storage(format!("{} is not a terminal status", status)));
        }
        let changed = self.conn().execute(
            "UPDATE batch_jobs SET status = ?2, completed_at = ?3
             WHERE id = ?1 AND status IN ('pending', 'processing')",
            params![id, status.as_str(), ts(&Utc::now())],
        )?;
        Ok(changed > 0)
    }

    fn items(&self, batch_id: &str) -> Result<Vec<BatchItem>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT i.batch_id, i.position, i.raw_input, i.status, i.error, i.processed_at, v.payload
             FROM batch_items i LEFT JOIN verdicts v ON v.id = i.verdict_id
             WHERE i.batch_id = ?1 ORDER BY i.position",
        )?;
        let items = stmt
            .query_map([batch_id], |row| {
                let payload: Option<String> = row.get(6)?;
                Ok(BatchItem {
                    batch_id: row.get(0)?,
                    position: row.get(1)?,
                    raw_input: row.get(2)?,
                    status: parse_enum(3, row.get(3)?)?,
                    error: row.get(4)?,
                    processed_at: parse_opt_ts(5, row.get(5)?)?,
                    verdict: payload.map(|p| parse_json(6, p)).transpose()?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn pending_items(&self, batch_id: &str) -> Result<Vec<(u32, String)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT position, raw_input FROM batch_items
             WHERE batch_id = ?1 AND status = 'pending' ORDER BY position",
        )?;
        let items = stmt
            .query_map([batch_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(items)
    }
}

/// Insert a verdict and its per-source rows; returns the verdict's row id.
/// Request ids are not unique: a caller retrying with the same id gets a second row.
fn insert_verdict(conn: &Connection, verdict: &ComplianceVerdict, batch_id: Option<&str>) -> Result<i64> {
    conn.execute(
        "INSERT INTO verdicts (request_id, identifier, kind, is_compliant, batch_id, checked_at, payload)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            verdict.request_id,
            verdict.identifier.value(),
            verdict.identifier.kind().as_str(),
            verdict.is_compliant,
            batch_id,
            ts(&verdict.timestamp),
            serde_json::to_string(verdict)?,
        ],
    )?;
    let verdict_id = conn.last_insert_rowid();

    let mut stmt = conn.prepare_cached(
        "INSERT INTO check_results
         (verdict_id, request_id, source, is_compliant, errored, errored_reason, latency_ms, reasons, details)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for result in &verdict.results {
        stmt.execute(params![
            verdict_id,
            verdict.request_id,
            result.source,
            result.is_compliant,
            result.errored,
            result.errored_reason.map(|r| r.to_string()),
            result.latency_ms as i64,
            serde_json::to_string(&result.reasons)?,
            serde_json::to_string(&result.details)?,
        ])?;
    }
    Ok(verdict_id)
}

fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_ts(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn parse_opt_ts(idx: usize, value: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_ts(idx, v)).transpose()
}

fn parse_enum<T>(idx: usize, value: String) -> rusqlite::Result<T>
where
    T: FromStr<Err = ComplianceError>,
{
    value.parse().map_err(|e| conversion_error(idx, e))
}

fn parse_json<T: DeserializeOwned>(idx: usize, value: String) -> rusqlite::Result<T> {
    serde_json::from_str(&value).map_err(|e| conversion_error(idx, e))
}

fn suppression_from_row(row: &Row<'_>) -> rusqlite::Result<SuppressionEntry> {
    Ok(SuppressionEntry {
        id: row.get(0)?,
        identifier: row.get(1)?,
        kind: parse_enum(2, row.get(2)?)?,
        reason: row.get(3)?,
        source: row.get(4)?,
        added_by: row.get(5)?,
        metadata: parse_json(6, row.get(6)?)?,
        status: parse_enum::<SuppressionStatus>(7, row.get(7)?)?,
        added_at: parse_ts(8, row.get(8)?)?,
        expires_at: parse_opt_ts(9, row.get(9)?)?,
    })
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<BatchJob> {
    Ok(BatchJob {
        id: row.get(0)?,
        label: row.get(1)?,
        status: parse_enum(2, row.get(2)?)?,
        total_items: row.get(3)?,
        processed_items: row.get(4)?,
        successful_items: row.get(5)?,
        failed_items: row.get(6)?,
        created_at: parse_ts(7, row.get(7)?)?,
        started_at: parse_opt_ts(8, row.get(8)?)?,
        completed_at: parse_opt_ts(9, row.get(9)?)?,
    })
}

fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduledBatch> {
    Ok(ScheduledBatch {
        id: row.get(0)?,
        name: row.get(1)?,
        identifiers: parse_json(2, row.get(2)?)?,
        cadence: row.get(3)?,
        next_run: parse_ts(4, row.get(4)?)?,
        last_run: parse_opt_ts(5, row.get(5)?)?,
        enabled: row.get(6)?,
        created_at: parse_ts(7, row.get(7)?)?,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub total_verdicts: usize,
    pub compliant_verdicts: usize,
    pub errored_checks: usize,
    pub batch_jobs: usize,
    pub active_batch_jobs: usize,
    pub active_suppressions: usize,
    pub schedules: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkers::{CheckFailure, CheckResult};
    use crate::identifier::IdentifierKind;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    fn sample_verdict(raw: &str) -> ComplianceVerdict {
        ComplianceVerdict::new(
            Identifier::parse(raw).unwrap(),
            vec![
                CheckResult::compliant("internal-dnc", json!({})),
                CheckResult::errored("tcpa", CheckFailure::Timeout, "slow"),
            ],
            uuid::Uuid::new_v4().to_string(),
        )
    }

    fn phone(raw: &str) -> Identifier {
        Identifier::phone(raw).unwrap()
    }

    #[test]
    fn test_suppression_lifecycle() {
        let db = Database::in_memory().unwrap();
        let entry = db
            .add_suppression(&NewSuppression::new("(650) 776-9592").with_reason("Asked not to be called"))
            .unwrap();
        assert_eq!(entry.identifier, "6507769592");
        assert_eq!(entry.source, "manual");

        let found = db.find_active_suppressions(&[phone("6507769592")], Utc::now()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].reason, "Asked not to be called");

        // Re-adding refreshes the active entry instead of duplicating it
        db.add_suppression(&NewSuppression::new("6507769592").with_reason("Repeat request")).unwrap();
        let found = db.find_active_suppressions(&[phone("6507769592")], Utc::now()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].reason, "Repeat request");

        assert_eq!(db.revoke_suppression("650-776-9592").unwrap(), 1);
        assert!(db.find_active_suppressions(&[phone("6507769592")], Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn test_expired_suppression_is_inactive() {
        let db = Database::in_memory().unwrap();
        let mut entry = NewSuppression::new("9317167522");
        entry.expires_at = Some(Utc::now() - ChronoDuration::days(1));
        db.add_suppression(&entry).unwrap();
        assert!(db.find_active_suppressions(&[phone("9317167522")], Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn test_suppression_lookup_matches_kind() {
        let db = Database::in_memory().unwrap();
        db.add_suppression(&NewSuppression::new("6507769592")).unwrap();

        // Same normalized text, different kind
        let postal = Identifier::postal_code("6507769592").unwrap();
        assert_eq!(postal.value(), "6507769592");
        assert!(db.find_active_suppressions(&[postal], Utc::now()).unwrap().is_empty());

        let found = db.find_active_suppressions(&[phone("6507769592")], Utc::now()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind, IdentifierKind::Phone);
    }

    #[test]
    fn test_invalid_suppression_is_validation_error() {
        let db = Database::in_memory().unwrap();
        let err = db.add_suppression(&NewSuppression::new("abc")).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_verdict_round_trip_by_identifier() {
        let db = Database::in_memory().unwrap();
        let verdict = sample_verdict("6507769592");
        db.record_verdict(&verdict, None).unwrap();

        let stored = db.verdicts_for("6507769592").unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].request_id, verdict.request_id);
        assert_eq!(stored[0].results.len(), 2);

        let stats = db.get_stats().unwrap();
        assert_eq!(stats.total_verdicts, 1);
        assert_eq!(stats.errored_checks, 1);
    }

    #[test]
    fn test_reused_request_id_is_recorded_again() {
        let db = Database::in_memory().unwrap();
        let verdict = sample_verdict("6507769592");
        db.record_verdict(&verdict, None).unwrap();
        // A retry with the same request id is a second audit row, not a failure
        db.record_verdict(&verdict, None).unwrap();

        let stored = db.verdicts_for("6507769592").unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored.iter().all(|v| v.request_id == verdict.request_id));
        assert_eq!(db.get_stats().unwrap().errored_checks, 2);
    }

    #[test]
    fn test_job_lifecycle_and_terminal_immutability() {
        let db = Database::in_memory().unwrap();
        let job = BatchJob::new(Some("nightly".into()), 2);
        db.create_job(&job, &["6507769592".into(), "bogus".into()]).unwrap();

        assert!(db.mark_processing(&job.id).unwrap());
        assert!(!db.mark_processing(&job.id).unwrap());

        let verdict = sample_verdict("6507769592");
        assert!(db.record_item(&job.id, 0, &ItemOutcome::Verdict(verdict.clone())).unwrap());
        // A second write for the same member is ignored
        assert!(!db.record_item(&job.id, 0, &ItemOutcome::Verdict(verdict)).unwrap());
        assert!(db.record_item(&job.id, 1, &ItemOutcome::Error("malformed".into())).unwrap());
        db.update_progress(&job.id, 2, 1, 1).unwrap();

        assert!(db.pending_items(&job.id).unwrap().is_empty());

        assert!(db.finish_job(&job.id, BatchStatus::Completed).unwrap());
        assert!(!db.finish_job(&job.id, BatchStatus::Failed).unwrap());

        let stored = db.job(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Completed);
        assert!(stored.completed_at.is_some());

        assert!(matches!(
            db.update_progress(&job.id, 3, 2, 1),
            Err(ComplianceError::JobTerminal(_))
        ));
        assert!(matches!(
            db.record_item(&job.id, 1, &ItemOutcome::Error("late".into())),
            Err(ComplianceError::JobTerminal(_))
        ));

        let items = db.items(&job.id).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].status, BatchItemStatus::Succeeded);
        assert!(items[0].verdict.is_some());
        assert_eq!(items[1].status, BatchItemStatus::Failed);
        assert_eq!(items[1].error.as_deref(), Some("malformed"));
    }

    #[test]
    fn test_unknown_job() {
        let db = Database::in_memory().unwrap();
        assert!(db.job("missing").unwrap().is_none());
        assert!(matches!(
            db.update_progress("missing", 1, 1, 0),
            Err(ComplianceError::JobNotFound(_))
        ));
    }

    #[test]
    fn test_due_schedules() {
        let db = Database::in_memory().unwrap();
        let now = Utc::now();
        let mut schedule = ScheduledBatch {
            id: "s1".into(),
            name: "weekly scrub".into(),
            identifiers: vec!["6507769592".into()],
            cadence: "weekly".into(),
            next_run: now - ChronoDuration::minutes(5),
            last_run: None,
            enabled: true,
            created_at: now,
        };
        db.save_schedule(&schedule).unwrap();
        assert_eq!(db.due_schedules(now).unwrap().len(), 1);

        db.mark_schedule_ran("s1", now, Some(now + ChronoDuration::days(7))).unwrap();
        assert!(db.due_schedules(now).unwrap().is_empty());

        schedule.id = "s2".into();
        schedule.enabled = false;
        db.save_schedule(&schedule).unwrap();
        assert!(db.due_schedules(now).unwrap().is_empty());

        db.record_schedule_run("s1", Some("job-1"), None, now).unwrap();
        let runs = db.schedule_runs("s1").unwrap();
        assert_eq!(runs.len(), 1);
        assert!(runs[0].success);
    }
}
