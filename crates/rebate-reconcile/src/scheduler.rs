use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::ReconcileError;

/// Parses a five-field POSIX crontab expression (§6) — `min hour dom month
/// dow`, with no seconds field — rejecting anything with no numeric element
/// at all (a schedule of pure wildcards would fire on every tick, which is
/// never the intent here).
pub fn parse_schedule(expr: &str) -> Result<Schedule, ReconcileError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(ReconcileError::Fatal(format!(
            "expected a five-field POSIX crontab expression, got {}: {expr}",
            fields.len()
        )));
    }
    if !fields.iter().any(|field| field.chars().any(|c| c.is_ascii_digit())) {
        return Err(ReconcileError::Fatal(format!(
            "cron expression has no numeric element: {expr}"
        )));
    }
    // this crate's grammar is six-field (leading seconds); POSIX crontabs fire at :00.
    let six_field = format!("0 {expr}");
    Schedule::from_str(&six_field)
        .map_err(|e| ReconcileError::Fatal(format!("invalid cron expression: {e}")))
}

/// The most recent tick at or before `now` — the `prev_cron_tick` the batch
/// state machine (§4.2) compares a stored `batch_timestamp` against.
pub fn prev_tick(schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lookback = now - chrono::Duration::days(2);
    schedule.after(&lookback).take_while(|tick| *tick <= now).last()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn rejects_an_all_wildcard_expression() {
        assert!(parse_schedule("* * * * *").is_err());
    }

    #[test]
    fn accepts_an_expression_with_a_numeric_field() {
        assert!(parse_schedule("0 0 * * *").is_ok());
    }

    #[test]
    fn prev_tick_finds_the_most_recent_midnight() {
        let schedule = parse_schedule("0 0 * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 7, 31, 13, 0, 0).unwrap();
        let tick = prev_tick(&schedule, now).unwrap();
        assert_eq!(tick, Utc.with_ymd_and_hms(2026, 7, 31, 0, 0, 0).unwrap());
    }
}
