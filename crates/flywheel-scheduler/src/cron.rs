//! Lightweight cron expression parser.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds)
//! Field syntax: *, */N, N, N-M, and comma lists mixing values and ranges.
//! Example: "0 8 * * 1-5" = weekdays at 8:00.
//!
//! Expressions are evaluated in the task's timezone; fire times are
//! returned in UTC.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use chrono_tz::Tz;

use flywheel_core::{FlywheelError, Result};

/// How far ahead `next_fire` scans before giving up. Four years covers
/// schedules that only match on a leap day.
const MAX_SCAN_MINUTES: i64 = 1461 * 24 * 60;

#[derive(Debug)]
struct Fields {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    days_of_week: Vec<u32>,
    dom_restricted: bool,
    dow_restricted: bool,
}

/// Check an expression parses, without computing a fire time.
pub fn validate(expression: &str) -> Result<()> {
    parse(expression).map(|_| ())
}

/// Compute the next fire time strictly after `after`, or `None` if nothing
/// matches within the scan window.
pub fn next_fire(expression: &str, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let fields = parse(expression).ok()?;

    // Align to the next whole minute after `after`.
    let mut candidate = (after + Duration::minutes(1))
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(after);

    for _ in 0..MAX_SCAN_MINUTES {
        if matches(&fields, candidate.with_timezone(&tz)) {
            return Some(candidate);
        }
        candidate += Duration::minutes(1);
    }
    None
}

fn matches(fields: &Fields, local: DateTime<Tz>) -> bool {
    if !fields.minutes.contains(&local.minute())
        || !fields.hours.contains(&local.hour())
        || !fields.months.contains(&local.month())
    {
        return false;
    }
    let dom_ok = fields.days_of_month.contains(&local.day());
    let dow_ok = fields
        .days_of_week
        .contains(&local.weekday().num_days_from_sunday());
    // Vixie cron: when both day fields are restricted, either may match.
    match (fields.dom_restricted, fields.dow_restricted) {
        (true, true) => dom_ok || dow_ok,
        (true, false) => dom_ok,
        (false, true) => dow_ok,
        (false, false) => true,
    }
}

fn parse(expression: &str) -> Result<Fields> {
    let parts: Vec<&str> = expression.split_whitespace().collect();
    if parts.len() != 5 {
        return Err(FlywheelError::Validation(format!(
            "invalid cron expression '{expression}' (need 5 fields: MIN HOUR DOM MON DOW)"
        )));
    }

    let field = |spec: &str, name: &str, min: u32, max: u32| -> Result<Vec<u32>> {
        parse_field(spec, min, max).ok_or_else(|| {
            FlywheelError::Validation(format!(
                "invalid cron field '{spec}' for {name} (range {min}-{max})"
            ))
        })
    };

    let minutes = field(parts[0], "minute", 0, 59)?;
    let hours = field(parts[1], "hour", 0, 23)?;
    let days_of_month = field(parts[2], "day-of-month", 1, 31)?;
    let months = field(parts[3], "month", 1, 12)?;
    // Both 0 and 7 mean Sunday.
    let mut days_of_week = field(parts[4], "day-of-week", 0, 7)?;
    for d in days_of_week.iter_mut() {
        if *d == 7 {
            *d = 0;
        }
    }
    days_of_week.sort_unstable();
    days_of_week.dedup();

    Ok(Fields {
        minutes,
        hours,
        days_of_month,
        months,
        days_of_week,
        dom_restricted: parts[2] != "*",
        dow_restricted: parts[4] != "*",
    })
}

/// Parse a cron field into the sorted list of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    if field == "*" {
        return Some((min..=max).collect());
    }

    // */N — every N
    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().ok()?;
        if n == 0 {
            return None;
        }
        return Some((min..=max).step_by(n as usize).collect());
    }

    // Comma list of values and ranges: "0,15,30-35,45"
    let mut values = Vec::new();
    for part in field.split(',') {
        let part = part.trim();
        if let Some((lo, hi)) = part.split_once('-') {
            let lo: u32 = lo.parse().ok()?;
            let hi: u32 = hi.parse().ok()?;
            if lo > hi || lo < min || hi > max {
                return None;
            }
            values.extend(lo..=hi);
        } else {
            let n: u32 = part.parse().ok()?;
            if n < min || n > max {
                return None;
            }
            values.push(n);
        }
    }
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    values.dedup();
    Some(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_every_hour() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 30, 0).unwrap();
        let next = next_fire("0 * * * *", chrono_tz::UTC, after).unwrap();
        assert_eq!(next.hour(), 11);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_specific_time() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 7, 0, 0).unwrap();
        let next = next_fire("0 8 * * *", chrono_tz::UTC, after).unwrap();
        assert_eq!(next.hour(), 8);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_every_15_minutes() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 10, 2, 0).unwrap();
        let next = next_fire("*/15 * * * *", chrono_tz::UTC, after).unwrap();
        assert_eq!(next.minute(), 15);
    }

    #[test]
    fn test_weekday_range() {
        // 2026-02-21 is a Saturday; "0 9 * * 1-5" should skip to Monday the 23rd.
        let after = Utc.with_ymd_and_hms(2026, 2, 21, 0, 0, 0).unwrap();
        let next = next_fire("0 9 * * 1-5", chrono_tz::UTC, after).unwrap();
        assert_eq!(next.day(), 23);
        assert_eq!(next.hour(), 9);
    }

    #[test]
    fn test_dow_seven_is_sunday() {
        let after = Utc.with_ymd_and_hms(2026, 2, 23, 0, 0, 0).unwrap();
        let a = next_fire("0 0 * * 0", chrono_tz::UTC, after).unwrap();
        let b = next_fire("0 0 * * 7", chrono_tz::UTC, after).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.weekday().num_days_from_sunday(), 0);
    }

    #[test]
    fn test_timezone_offset() {
        // 08:00 in New York (EST, UTC-5 in February) is 13:00 UTC.
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 0, 0, 0).unwrap();
        let next = next_fire("0 8 * * *", chrono_tz::America::New_York, after).unwrap();
        assert_eq!(next.hour(), 13);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_strictly_after() {
        // `after` exactly on a match must yield the NEXT occurrence.
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 8, 0, 0).unwrap();
        let next = next_fire("0 8 * * *", chrono_tz::UTC, after).unwrap();
        assert!(next > after);
        assert_eq!(next.day(), 23);
    }

    #[test]
    fn test_first_of_month() {
        let after = Utc.with_ymd_and_hms(2026, 2, 22, 0, 0, 0).unwrap();
        let next = next_fire("30 4 1 * *", chrono_tz::UTC, after).unwrap();
        assert_eq!((next.month(), next.day()), (3, 1));
        assert_eq!((next.hour(), next.minute()), (4, 30));
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(validate("bad").is_err());
        assert!(validate("* * * *").is_err());
        assert!(validate("61 * * * *").is_err());
        assert!(validate("*/0 * * * *").is_err());
        assert!(validate("5-2 * * * *").is_err());
        assert!(validate("0 8 * * 1-5").is_ok());
        assert!(validate("0,30 */2 1,15 * *").is_ok());
    }
}
