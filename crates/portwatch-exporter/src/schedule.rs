//! Cron schedules.
//!
//! Standard five field expressions (`minute hour day-of-month month
//! day-of-week`) with lists, ranges, steps, month and weekday names, and
//! the `@yearly`, `@monthly`, `@weekly`, `@daily`, `@hourly` macros.
//! Evaluation is in UTC.
//!
//! When both day-of-month and day-of-week are restricted, a day matches if
//! either field matches, as in Vixie cron.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Timelike, Utc};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expr}': {reason}")]
    Invalid { expr: String, reason: String },

    #[error("Cron expression '{expr}' has no occurrence after {after}")]
    NoOccurrence { expr: String, after: DateTime<Utc> },
}

/// Computes the next run time of a schedule expression.
pub trait NextOccurrence: Send + Sync {
    /// Check that `expr` is well formed.
    fn validate(&self, expr: &str) -> Result<(), ScheduleError>;

    /// The first occurrence strictly after `after`.
    fn next_occurrence(&self, expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError>;
}

/// `NextOccurrence` backed by [`CronSchedule`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CronClock;

impl NextOccurrence for CronClock {
    fn validate(&self, expr: &str) -> Result<(), ScheduleError> {
        expr.parse::<CronSchedule>().map(|_| ())
    }

    fn next_occurrence(&self, expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        let schedule: CronSchedule = expr.parse()?;
        schedule.next_after(after).ok_or_else(|| ScheduleError::NoOccurrence {
            expr: expr.to_string(),
            after,
        })
    }
}

/// A parsed cron expression. Each field is a bitset of allowed values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

/// Search horizon. Anything valid fires at least once in a leap cycle.
const MAX_SEARCH_DAYS: i64 = 366 * 8;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

struct FieldDef {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const MINUTE: FieldDef = FieldDef { name: "minute", min: 0, max: 59, names: &[] };
const HOUR: FieldDef = FieldDef { name: "hour", min: 0, max: 23, names: &[] };
const DAY_OF_MONTH: FieldDef = FieldDef { name: "day-of-month", min: 1, max: 31, names: &[] };
const MONTH: FieldDef = FieldDef { name: "month", min: 1, max: 12, names: &MONTH_NAMES };
// 7 is accepted as Sunday and folded onto 0.
const DAY_OF_WEEK: FieldDef = FieldDef { name: "day-of-week", min: 0, max: 7, names: &DAY_NAMES };

impl FromStr for CronSchedule {
    type Err = ScheduleError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ScheduleError::Invalid {
            expr: expr.to_string(),
            reason,
        };

        let trimmed = expr.trim();
        let expanded = match trimmed.to_ascii_lowercase().as_str() {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            other if other.starts_with('@') => return Err(invalid(format!("unknown macro {other}"))),
            _ => trimmed,
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!("expected 5 fields, found {}", fields.len())));
        }

        let mut days_of_week = parse_field(fields[4], &DAY_OF_WEEK).map_err(&invalid)?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            minutes: parse_field(fields[0], &MINUTE).map_err(&invalid)?,
            hours: parse_field(fields[1], &HOUR).map_err(&invalid)?,
            days_of_month: parse_field(fields[2], &DAY_OF_MONTH).map_err(&invalid)?,
            months: parse_field(fields[3], &MONTH).map_err(&invalid)?,
            days_of_week,
            dom_restricted: !fields[2].starts_with('*'),
            dow_restricted: !fields[4].starts_with('*'),
        })
    }
}

fn parse_field(field: &str, def: &FieldDef) -> Result<u64, String> {
    let mut bits = 0u64;

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step '{step}' in {} field", def.name))?;
                if step == 0 {
                    return Err(format!("zero step in {} field", def.name));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range == "*" {
            (def.min, def.max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            (parse_value(lo, def)?, parse_value(hi, def)?)
        } else {
            let value = parse_value(range, def)?;
            // "5/15" means every 15 starting at 5.
            (value, if step.is_some() { def.max } else { value })
        };

        if start > end {
            return Err(format!("range {start}-{end} is reversed in {} field", def.name));
        }

        let step = step.unwrap_or(1) as usize;
        for value in (start..=end).step_by(step) {
            bits |= 1 << value;
        }
    }

    Ok(bits)
}

fn parse_value(text: &str, def: &FieldDef) -> Result<u32, String> {
    let lower = text.to_ascii_lowercase();
    if let Some(idx) = def.names.iter().position(|n| *n == lower) {
        // Month names are 1-based, weekday names 0-based.
        return Ok(idx as u32 + def.min);
    }

    let value: u32 = text
        .parse()
        .map_err(|_| format!("invalid value '{text}' in {} field", def.name))?;
    if value < def.min || value > def.max {
        return Err(format!(
            "value {value} out of range {}-{} in {} field",
            def.min, def.max, def.name
        ));
    }
    Ok(value)
}

impl CronSchedule {
    /// The first matching minute strictly after `after`, if any.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.naive_utc().with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let limit = start + Duration::days(MAX_SEARCH_DAYS);

        let mut t = start;
        while t <= limit {
            if !bit(self.months, t.month()) {
                t = first_of_next_month(t.date())?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = (t.date() + Duration::days(1)).and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !bit(self.hours, t.hour()) {
                t = t.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if !bit(self.minutes, t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(DateTime::from_naive_utc_and_offset(t, Utc));
        }

        None
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = bit(self.days_of_month, date.day());
        let dow = bit(self.days_of_week, date.weekday().num_days_from_sunday());

        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

fn bit(bits: u64, value: u32) -> bool {
    bits & (1 << value) != 0
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDateTime> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn next(expr: &str, after: DateTime<Utc>) -> DateTime<Utc> {
        CronClock.next_occurrence(expr, after).unwrap()
    }

    #[test]
    fn test_every_minute_is_strictly_after() {
        assert_eq!(next("* * * * *", at(2026, 3, 1, 10, 0, 0)), at(2026, 3, 1, 10, 1, 0));
        assert_eq!(next("* * * * *", at(2026, 3, 1, 10, 0, 42)), at(2026, 3, 1, 10, 1, 0));
    }

    #[test]
    fn test_steps_and_lists() {
        assert_eq!(next("*/15 * * * *", at(2026, 3, 1, 10, 7, 0)), at(2026, 3, 1, 10, 15, 0));
        assert_eq!(next("*/15 * * * *", at(2026, 3, 1, 10, 45, 0)), at(2026, 3, 1, 11, 0, 0));
        assert_eq!(next("5,35 2 * * *", at(2026, 3, 1, 2, 10, 0)), at(2026, 3, 1, 2, 35, 0));
        assert_eq!(next("10/20 * * * *", at(2026, 3, 1, 10, 31, 0)), at(2026, 3, 1, 10, 50, 0));
        assert_eq!(next("0 9-17/4 * * *", at(2026, 3, 1, 9, 0, 0)), at(2026, 3, 1, 13, 0, 0));
    }

    #[test]
    fn test_rolls_over_year() {
        assert_eq!(next("@yearly", at(2026, 6, 15, 12, 0, 0)), at(2027, 1, 1, 0, 0, 0));
        assert_eq!(next("0 0 1 * *", at(2026, 12, 31, 23, 59, 0)), at(2027, 1, 1, 0, 0, 0));
    }

    #[test]
    fn test_day_of_week_names_and_sunday_alias() {
        // 2026-03-01 is a Sunday.
        assert_eq!(next("0 9 * * MON-FRI", at(2026, 3, 1, 0, 0, 0)), at(2026, 3, 2, 9, 0, 0));
        assert_eq!(next("0 0 * * 7", at(2026, 3, 2, 0, 0, 0)), at(2026, 3, 8, 0, 0, 0));
        assert_eq!(next("@weekly", at(2026, 3, 2, 0, 0, 0)), at(2026, 3, 8, 0, 0, 0));
    }

    #[test]
    fn test_month_names() {
        assert_eq!(next("30 4 1 jul *", at(2026, 3, 1, 0, 0, 0)), at(2026, 7, 1, 4, 30, 0));
    }

    #[test]
    fn test_day_of_month_or_day_of_week() {
        // The 15th, or any Monday.
        assert_eq!(next("0 0 15 * 1", at(2026, 3, 1, 0, 0, 0)), at(2026, 3, 2, 0, 0, 0));
        assert_eq!(next("0 0 15 * 1", at(2026, 3, 13, 0, 0, 0)), at(2026, 3, 15, 0, 0, 0));
    }

    #[test]
    fn test_leap_day() {
        assert_eq!(next("0 0 29 2 *", at(2026, 3, 1, 0, 0, 0)), at(2028, 2, 29, 0, 0, 0));
    }

    #[test]
    fn test_impossible_date_has_no_occurrence() {
        let err = CronClock
            .next_occurrence("0 0 30 2 *", at(2026, 3, 1, 0, 0, 0))
            .unwrap_err();
        assert!(matches!(err, ScheduleError::NoOccurrence { .. }));
    }

    #[test]
    fn test_invalid_expressions() {
        for expr in [
            "not-a-cron",
            "",
            "* * * *",
            "* * * * * *",
            "60 * * * *",
            "* 24 * * *",
            "* * 0 * *",
            "* * * 13 *",
            "* * * * 8",
            "*/0 * * * *",
            "5-1 * * * *",
            "@every 5m",
            "* * * foo *",
        ] {
            assert!(
                matches!(CronClock.validate(expr), Err(ScheduleError::Invalid { .. })),
                "expected '{expr}' to be invalid"
            );
        }
    }

    #[test]
    fn test_valid_expressions() {
        for expr in ["* * * * *", "@hourly", "@DAILY", "0 */6 * * *", "15 3 * * sun,sat", "0 0 1-7 * 1"] {
            assert!(CronClock.validate(expr).is_ok(), "expected '{expr}' to be valid");
        }
    }
}
