//! Working-calendar arithmetic.
//!
//! A day has two work blocks, `[start, lunch_start)` and `[lunch_end, end)`,
//! in UTC hours. Weekends carry no working time. All scheduling goes through
//! [`WorkCalendar::next_available_start`] and [`WorkCalendar::working_deadline`].

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use tracing::warn;

use crate::config::{HOURS_PER_DAY, WorkCalendarConfig};
use crate::error::Result;

/// Upper bound on snap-and-round passes in `next_available_start`.
///
/// A valid instant is reached in at most a handful of passes; the cap only
/// guards against a misconfigured calendar.
pub const MAX_ROUNDING_PASSES: usize = 64;

const SLOT_MINUTES: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkCalendar {
    cfg: WorkCalendarConfig,
}

impl WorkCalendar {
    pub fn new(cfg: WorkCalendarConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self { cfg })
    }

    /// Round `t` forward to the next instant where work may start.
    ///
    /// The result is a weekday, inside a work block, on a half-hour boundary.
    /// Already valid instants come back unchanged.
    pub fn next_available_start(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let mut cur = t;
        for _ in 0..MAX_ROUNDING_PASSES {
            let next = round_up_to_slot(self.snap_to_block(cur));
            if next == cur {
                return cur;
            }
            cur = next;
        }
        warn!(input = %t, last = %cur, "calendar rounding did not settle");
        cur
    }

    /// Consume `hours` of working time from `start` and return where it ends.
    ///
    /// Blocks are consumed proportionally. When the work runs out exactly at
    /// a block boundary the deadline lands on the start of the next block,
    /// so a deadline is always a working instant.
    pub fn working_deadline(&self, start: DateTime<Utc>, hours: f64) -> DateTime<Utc> {
        if hours.is_nan() || hours <= 0.0 {
            return start;
        }
        let mut remaining = Duration::seconds((hours * 3600.0).round() as i64);
        if remaining <= Duration::zero() {
            return start;
        }

        let mut cursor = start;
        loop {
            let day = cursor.date_naive();
            if is_weekend(day) {
                cursor = at_hour(next_weekday(day), self.cfg.start_hour);
                continue;
            }

            for (block_start, block_end) in self.blocks(day) {
                if cursor >= block_end {
                    continue;
                }
                let from = cursor.max(block_start);
                if remaining == Duration::zero() {
                    return from;
                }
                let available = block_end - from;
                if remaining < available {
                    return from + remaining;
                }
                remaining = remaining - available;
                cursor = block_end;
            }

            cursor = at_hour(day + Duration::days(1), self.cfg.start_hour);
        }
    }

    /// Deadline for a task of `duration_days` starting at `start`.
    pub fn task_deadline(&self, start: DateTime<Utc>, duration_days: f64) -> DateTime<Utc> {
        self.working_deadline(start, duration_days * HOURS_PER_DAY)
    }

    /// Weekday and inside one of the two work blocks.
    pub fn is_working_instant(&self, t: DateTime<Utc>) -> bool {
        let day = t.date_naive();
        !is_weekend(day)
            && self
                .blocks(day)
                .iter()
                .any(|(block_start, block_end)| t >= *block_start && t < *block_end)
    }

    fn blocks(&self, day: NaiveDate) -> [(DateTime<Utc>, DateTime<Utc>); 2] {
        [
            (at_hour(day, self.cfg.start_hour), at_hour(day, self.cfg.lunch_start_hour)),
            (at_hour(day, self.cfg.lunch_end_hour), at_hour(day, self.cfg.end_hour)),
        ]
    }

    /// One application of the weekend / before-start / lunch / after-end rules.
    fn snap_to_block(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let day = t.date_naive();
        let hour = t.hour();

        if is_weekend(day) {
            return at_hour(next_weekday(day), self.cfg.start_hour);
        }
        if hour < self.cfg.start_hour {
            return at_hour(day, self.cfg.start_hour);
        }
        if hour >= self.cfg.lunch_start_hour && hour < self.cfg.lunch_end_hour {
            return at_hour(day, self.cfg.lunch_end_hour);
        }
        if hour >= self.cfg.end_hour {
            return at_hour(day + Duration::days(1), self.cfg.start_hour);
        }
        t
    }
}

fn is_weekend(day: NaiveDate) -> bool {
    matches!(day.weekday(), Weekday::Sat | Weekday::Sun)
}

fn next_weekday(day: NaiveDate) -> NaiveDate {
    let mut d = day + Duration::days(1);
    while is_weekend(d) {
        d = d + Duration::days(1);
    }
    d
}

/// `hour` may be 24, meaning midnight at the end of `day`.
fn at_hour(day: NaiveDate, hour: u32) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN)) + Duration::hours(i64::from(hour))
}

fn round_up_to_slot(t: DateTime<Utc>) -> DateTime<Utc> {
    let into_slot = Duration::minutes(i64::from(t.minute() % SLOT_MINUTES))
        + Duration::seconds(i64::from(t.second()))
        + Duration::nanoseconds(i64::from(t.nanosecond()));
    if into_slot == Duration::zero() {
        return t;
    }
    t - into_slot + Duration::minutes(i64::from(SLOT_MINUTES))
}
