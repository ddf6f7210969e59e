//! Vacation conflict resolution.
//!
//! Pushes a candidate `[start, deadline)` past every overlapping vacation,
//! restarting the scan after each move since the new slot can collide with a
//! different interval.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::calendar::WorkCalendar;
use crate::task::WorkerId;

/// Hard cap on resolver passes.
pub const MAX_VACATION_PASSES: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VacationInterval {
    pub worker_id: WorkerId,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

impl VacationInterval {
    pub fn new(worker_id: impl Into<WorkerId>, start_date: DateTime<Utc>, end_date: DateTime<Utc>) -> Self {
        Self {
            worker_id: worker_id.into(),
            start_date,
            end_date,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.worker_id.trim().is_empty() {
            return Err("worker_id must be non-empty".to_string());
        }
        if self.start_date > self.end_date {
            return Err(format!(
                "vacation for {} ends before it starts",
                self.worker_id
            ));
        }
        Ok(())
    }

    /// Closed-interval overlap test against a candidate slot.
    pub fn overlaps(&self, start: DateTime<Utc>, deadline: DateTime<Utc>) -> bool {
        start <= self.end_date && deadline >= self.start_date
    }

    pub fn describe(&self) -> String {
        format!(
            "{}..{}",
            self.start_date.format("%Y-%m-%d %H:%M"),
            self.end_date.format("%Y-%m-%d %H:%M")
        )
    }
}

/// Caller-facing explanation of a vacation shift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VacationAdjustment {
    pub original_date: DateTime<Utc>,
    pub adjusted_date: DateTime<Utc>,
    pub conflicts: Vec<String>,
    pub converged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VacationResolution {
    pub start_date: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub adjustment: Option<VacationAdjustment>,
    /// False when the pass cap was hit and the slot may still conflict.
    pub converged: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct VacationResolver<'a> {
    calendar: &'a WorkCalendar,
}

impl<'a> VacationResolver<'a> {
    pub fn new(calendar: &'a WorkCalendar) -> Self {
        Self { calendar }
    }

    /// Move `(start, deadline)` forward until it clears every relevant vacation.
    ///
    /// Intervals that ended before `now` are ignored.
    pub fn resolve(
        &self,
        start: DateTime<Utc>,
        deadline: DateTime<Utc>,
        duration_days: f64,
        vacations: &[VacationInterval],
        now: DateTime<Utc>,
    ) -> VacationResolution {
        let mut relevant: Vec<&VacationInterval> =
            vacations.iter().filter(|v| v.end_date >= now).collect();
        relevant.sort_by_key(|v| (v.start_date, v.end_date));

        let original = start;
        let mut start = start;
        let mut deadline = deadline;
        let mut conflicts: Vec<String> = Vec::new();

        for _ in 0..MAX_VACATION_PASSES {
            let Some(vac) = first_conflict(&relevant, start, deadline) else {
                break;
            };
            let next = self
                .calendar
                .next_available_start(vac.end_date + Duration::days(1));
            debug!(
                worker = %vac.worker_id,
                vacation = %vac.describe(),
                from = %start,
                to = %next,
                "slot overlaps vacation, shifting"
            );
            conflicts.push(vac.describe());
            start = next;
            deadline = self.calendar.task_deadline(start, duration_days);
        }

        let converged = first_conflict(&relevant, start, deadline).is_none();
        if !converged {
            warn!(
                passes = MAX_VACATION_PASSES,
                start = %start,
                deadline = %deadline,
                "vacation resolution hit its pass cap; slot may still conflict"
            );
        }

        let adjustment = (!conflicts.is_empty()).then(|| VacationAdjustment {
            original_date: original,
            adjusted_date: start,
            conflicts,
            converged,
        });

        VacationResolution {
            start_date: start,
            deadline,
            adjustment,
            converged,
        }
    }
}

fn first_conflict<'v>(
    vacations: &[&'v VacationInterval],
    start: DateTime<Utc>,
    deadline: DateTime<Utc>,
) -> Option<&'v VacationInterval> {
    vacations.iter().copied().find(|v| v.overlaps(start, deadline))
}
