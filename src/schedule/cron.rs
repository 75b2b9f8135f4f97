use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use std::fmt;
use std::str::FromStr;
use crate::{
    error::{ComplianceError, Result},
    schedule::NextOccurrence,
};

/// Give up searching after this many years without a match (e.g. `0 0 30 2 *`)
const SEARCH_HORIZON_YEARS: i32 = 5;

/// Five-field cron expression evaluated in UTC:
/// `minute hour day-of-month month day-of-week`.
///
/// Supports `*`, lists, ranges and steps. Day-of-week accepts 0-7 with
/// both 0 and 7 meaning Sunday. When both day fields are restricted a
/// time matches if either one does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn matches(&self, at: &NaiveDateTime) -> bool {
        bit(self.minutes, at.minute())
            && bit(self.hours, at.hour())
            && bit(self.months, at.month())
            && self.day_matches(&at.date())
    }

    fn day_matches(&self, date: &NaiveDate) -> bool {
        let dom = bit(self.days_of_month, date.day());
        let dow = bit(self.days_of_week, date.weekday().num_days_from_sunday());
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// First matching minute strictly after `current`
    pub fn next_after(&self, current: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = current.naive_utc().with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let horizon = start.year() + SEARCH_HORIZON_YEARS;
        let mut t = start;

        while t.year() <= horizon {
            if !bit(self.months, t.month()) {
                let (year, month) = if t.month() == 12 { (t.year() + 1, 1) } else { (t.year(), t.month() + 1) };
                t = NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.day_matches(&t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !bit(self.hours, t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if !bit(self.minutes, t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(Utc.from_utc_datetime(&t));
        }

        None
    }
}

fn bit(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

/// Parse one field into a bitmask of allowed values
fn parse_field(field: &str, name: &str, min: u32, max: u32) -> Result<u64> {
    let invalid = |why: &str| ComplianceError::InvalidSchedule(format!("{} field '{}': {}", name, field, why));
    let number = |s: &str| -> Result<u32> {
        let v: u32 = s.parse().map_err(|_| invalid("not a number"))?;
        if v < min || v > max {
            return Err(invalid(&format!("{} is outside {}-{}", v, min, max)));
        }
        Ok(v)
    };

    let mut mask = 0u64;
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step.parse().map_err(|_| invalid("bad step"))?;
                if step == 0 {
                    return Err(invalid("step must be positive"));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (number(a)?, number(b)?)
        } else {
            let v = number(range)?;
            // `5/15` means "from 5, every 15"
            (v, if step.is_some() { max } else { v })
        };

        if lo > hi {
            return Err(invalid("range start is after its end"));
        }

        for v in (lo..=hi).step_by(step.unwrap_or(1) as usize) {
            mask |= 1u64 << v;
        }
    }

    Ok(mask)
}

impl FromStr for CronSchedule {
    type Err = ComplianceError;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ComplianceError::InvalidSchedule(format!(
                "'{}' must have 5 fields, found {}",
                s.trim(),
                fields.len()
            )));
        }

        let mut days_of_week = parse_field(fields[4], "day-of-week", 0, 7)?;
        // 7 is Sunday too
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week | 1) & !(1 << 7);
        }

        Ok(Self {
            expression: fields.join(" "),
            minutes: parse_field(fields[0], "minute", 0, 59)?,
            hours: parse_field(fields[1], "hour", 0, 23)?,
            days_of_month: parse_field(fields[2], "day-of-month", 1, 31)?,
            months: parse_field(fields[3], "month", 1, 12)?,
            days_of_week,
            dom_restricted: !fields[2].starts_with('*'),
            dow_restricted: !fields[4].starts_with('*'),
        })
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

impl NextOccurrence for CronSchedule {
    fn next_run(&self, current: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.next_after(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn cron(expr: &str) -> CronSchedule {
        expr.parse().unwrap()
    }

    #[test]
    fn test_every_minute() {
        let next = cron("* * * * *").next_after(at(2024, 3, 1, 10, 15)).unwrap();
        assert_eq!(next, at(2024, 3, 1, 10, 16));
    }

    #[test]
    fn test_daily_at_fixed_time() {
        let c = cron("30 9 * * *");
        assert_eq!(c.next_after(at(2024, 3, 1, 8, 0)).unwrap(), at(2024, 3, 1, 9, 30));
        assert_eq!(c.next_after(at(2024, 3, 1, 9, 30)).unwrap(), at(2024, 3, 2, 9, 30));
    }

    #[test]
    fn test_steps_ranges_and_lists() {
        let c = cron("*/15 8-10 * * *");
        assert_eq!(c.next_after(at(2024, 3, 1, 8, 16)).unwrap(), at(2024, 3, 1, 8, 30));
        assert_eq!(c.next_after(at(2024, 3, 1, 10, 50)).unwrap(), at(2024, 3, 2, 8, 0));

        let c = cron("0 6,18 * * *");
        assert_eq!(c.next_after(at(2024, 3, 1, 7, 0)).unwrap(), at(2024, 3, 1, 18, 0));
    }

    #[test]
    fn test_weekday_and_sunday_aliases() {
        // 2024-03-01 is a Friday
        let monday = cron("0 9 * * 1");
        assert_eq!(monday.next_after(at(2024, 3, 1, 12, 0)).unwrap(), at(2024, 3, 4, 9, 0));

        assert_eq!(cron("0 0 * * 0").days_of_week, cron("0 0 * * 7").days_of_week);
        assert_eq!(cron("0 0 * * 7").next_after(at(2024, 3, 1, 0, 0)).unwrap(), at(2024, 3, 3, 0, 0));
    }

    #[test]
    fn test_restricted_day_fields_match_either() {
        // 15th of the month or any Monday
        let c = cron("0 0 15 * 1");
        assert_eq!(c.next_after(at(2024, 3, 1, 0, 0)).unwrap(), at(2024, 3, 4, 0, 0));
        assert_eq!(c.next_after(at(2024, 3, 12, 0, 0)).unwrap(), at(2024, 3, 15, 0, 0));
    }

    #[test]
    fn test_month_rollover_and_impossible_dates() {
        assert_eq!(cron("0 0 1 1 *").next_after(at(2024, 3, 1, 0, 0)).unwrap(), at(2025, 1, 1, 0, 0));
        assert!(cron("0 0 30 2 *").next_after(at(2024, 3, 1, 0, 0)).is_none());
    }

    #[test]
    fn test_rejects_bad_expressions() {
        for expr in ["* * * *", "60 * * * *", "* 24 * * *", "* * 0 * *", "*/0 * * * *", "5-1 * * * *", "a * * * *"] {
            let err = expr.parse::<CronSchedule>().unwrap_err();
            assert!(matches!(err, ComplianceError::InvalidSchedule(_)), "{} should be rejected", expr);
        }
    }
}
