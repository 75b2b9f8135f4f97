use chrono::{DateTime, Duration, Months, Utc};
use std::fmt;
use std::str::FromStr;
use crate::{
    error::ComplianceError,
    schedule::{CronSchedule, NextOccurrence},
};

/// How often a scheduled batch repeats
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cadence {
    Daily,
    Weekly,
    /// Same day next month, clamped to the month's last day
    Monthly,
    Custom(CronSchedule),
}

impl NextOccurrence for Cadence {
    fn next_run(&self, current: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Cadence::Daily => current.checked_add_signed(Duration::days(1)),
            Cadence::Weekly => current.checked_add_signed(Duration::days(7)),
            Cadence::Monthly => current.checked_add_months(Months::new(1)),
            Cadence::Custom(cron) => cron.next_run(current),
        }
    }
}

impl FromStr for Cadence {
    type Err = ComplianceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Ok(Cadence::Daily),
            "weekly" => Ok(Cadence::Weekly),
            "monthly" => Ok(Cadence::Monthly),
            _ => Ok(Cadence::Custom(s.parse()?)),
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Daily => f.write_str("daily"),
            Cadence::Weekly => f.write_str("weekly"),
            Cadence::Monthly => f.write_str("monthly"),
            Cadence::Custom(cron) => write!(f, "{}", cron),
        }
    }
}
