pub mod cadence;
pub mod cron;
pub mod scheduler;

use chrono::{DateTime, Utc};

pub use cadence::Cadence;
pub use cron::CronSchedule;
pub use scheduler::{DueScanSummary, Scheduler};

/// Anything that can say when it should fire next
pub trait NextOccurrence {
    /// Next fire time strictly after `current`, or `None` if it never fires again
    fn next_run(&self, current: DateTime<Utc>) -> Option<DateTime<Utc>>;
}
