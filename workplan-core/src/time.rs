//! Time utilities: local-time views used by the LOW end-of-day rule.

use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::{Result, ScheduleError};

/// Parse a local timestamp like "2026-02-20 16:30" in `tz`, returning UTC.
pub fn parse_local_to_utc(local: &str, tz: Tz) -> Result<DateTime<Utc>> {
    let ndt = NaiveDateTime::parse_from_str(local, "%Y-%m-%d %H:%M")
        .map_err(|e| ScheduleError::InvalidTimestamp(format!("'{local}': {e}")))?;

    let local_dt = tz.from_local_datetime(&ndt).single().ok_or_else(|| {
        ScheduleError::InvalidTimestamp(format!("ambiguous or invalid local time (DST?): {local} {tz}"))
    })?;

    Ok(local_dt.with_timezone(&Utc))
}

/// Accept RFC3339, falling back to "YYYY-MM-DD HH:MM" in `tz`.
pub fn parse_instant(s: &str, tz: Tz) -> Result<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(s) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(_) => parse_local_to_utc(s, tz),
    }
}

/// Hour of day of `t` in `tz`.
pub fn local_hour(t: DateTime<Utc>, tz: Tz) -> u32 {
    t.with_timezone(&tz).hour()
}

/// Whether `a` and `b` fall on the same calendar day in `tz`.
pub fn same_local_day(a: DateTime<Utc>, b: DateTime<Utc>, tz: Tz) -> bool {
    a.with_timezone(&tz).date_naive() == b.with_timezone(&tz).date_naive()
}
