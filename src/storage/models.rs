use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::{
    compliance::verdict::ComplianceVerdict,
    error::ComplianceError,
    identifier::IdentifierKind,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionStatus {
    Active,
    Revoked,
}

impl SuppressionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressionStatus::Active => "active",
            SuppressionStatus::Revoked => "revoked",
        }
    }
}

impl std::str::FromStr for SuppressionStatus {
    type Err = ComplianceError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(SuppressionStatus::Active),
            "revoked" => Ok(SuppressionStatus::Revoked),
            other => Err(ComplianceError::Storage(format!("unknown suppression status '{}'", other))),
        }
    }
}

/// Entry on the internally owned do-not-contact list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionEntry {
    pub id: i64,
    pub identifier: String,
    pub kind: IdentifierKind,
    pub reason: String,
    pub source: String,
    pub added_by: String,
    pub metadata: serde_json::Value,
    pub status: SuppressionStatus,
    pub added_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SuppressionEntry {
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.status == SuppressionStatus::Active && self.expires_at.map_or(true, |exp| exp > at)
    }
}

/// One tuple of a bulk suppression submission
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSuppression {
    pub identifier: String,
    pub reason: Option<String>,
    pub source: Option<String>,
    pub added_by: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewSuppression {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            ..Default::default()
        }
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BatchStatus {
    type Err = ComplianceError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BatchStatus::Pending),
            "processing" => Ok(BatchStatus::Processing),
            "completed" => Ok(BatchStatus::Completed),
            "failed" => Ok(BatchStatus::Failed),
            other => Err(ComplianceError::Storage(format!("unknown batch status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: String,
    pub label: Option<String>,
    pub status: BatchStatus,
    pub total_items: u32,
    pub processed_items: u32,
    /// Items whose aggregate verdict was reached, compliant or not
    pub successful_items: u32,
    /// Items whose processing itself failed
    pub failed_items: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchJob {
    pub fn new(label: Option<String>, total_items: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            label,
            status: BatchStatus::Pending,
            total_items,
            processed_items: 0,
            successful_items: 0,
            failed_items: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.total_items.saturating_sub(self.processed_items)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchItemStatus {
    Pending,
    Succeeded,
    Failed,
}

impl BatchItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchItemStatus::Pending => "pending",
            BatchItemStatus::Succeeded => "succeeded",
            BatchItemStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for BatchItemStatus {
    type Err = ComplianceError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BatchItemStatus::Pending),
            "succeeded" => Ok(BatchItemStatus::Succeeded),
            "failed" => Ok(BatchItemStatus::Failed),
            other => Err(ComplianceError::Storage(format!("unknown batch item status '{}'", other))),
        }
    }
}

/// Per-member result of a batch, written as soon as the member is processed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub batch_id: String,
    pub position: u32,
    pub raw_input: String,
    pub status: BatchItemStatus,
    pub verdict: Option<ComplianceVerdict>,
    pub error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// What a worker hands to storage for one processed member
#[derive(Debug, Clone)]
pub enum ItemOutcome {
    Verdict(ComplianceVerdict),
    Error(String),
}

impl ItemOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Verdict(_))
    }
}

/// Recurring batch definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledBatch {
    pub id: String,
    pub name: String,
    pub identifiers: Vec<String>,
    /// `daily`, `weekly`, `monthly`, or a five-field cron expression
    pub cadence: String,
    pub next_run: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRun {
    pub id: i64,
    pub schedule_id: String,
    pub job_id: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub ran_at: DateTime<Utc>,
}
