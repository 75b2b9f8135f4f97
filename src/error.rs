use thiserror::Error;

#[derive(Error, Debug)]
pub enum ComplianceError {
    #[error("Invalid identifier: {0}")]
    Validation(String),

    #[error("Rate limited ({scope}) for {key}, retry after {retry_after_ms} ms")]
    RateLimited {
        scope: String,
        key: String,
        retry_after_ms: u64,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Batch job not found: {0}")]
    JobNotFound(String),

    #[error("Batch job {0} is already terminal")]
    JobTerminal(String),

    #[error("Batch job {0} is already running")]
    JobRunning(String),

    #[error("Scheduled batch not found: {0}")]
    ScheduleNotFound(String),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ComplianceError {
    /// Caller-correctable input errors that must never be retried
    pub fn is_validation(&self) -> bool {
        matches!(self, ComplianceError::Validation(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ComplianceError::RateLimited { .. })
    }

    /// Persistence failures; no verdict can be guaranteed durable
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            ComplianceError::Database(_) | ComplianceError::Storage(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ComplianceError>;
