//! Priority insertion: where a new task lands on a worker's timeline.
//!
//! One handler per [`Priority`] variant, each producing a [`Placement`]:
//!
//! - URGENT starts at the next working instant and overlaps whatever is there.
//! - HIGH pairs with the first NORMAL task that has no URGENT/HIGH partner.
//! - NORMAL queues, jumping ahead of a movable LOW task while few NORMAL tasks
//!   are ahead of it. It is the only priority that displaces existing work.
//! - LOW appends; from the local cutoff hour onward it is placed like NORMAL.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::calendar::WorkCalendar;
use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::task::{Priority, ScheduledTask};
use crate::time::{local_hour, same_local_day};
use crate::timeline::WorkerTimeline;

/// Tunables the handlers read, resolved once from [`SchedulerConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InsertionRules {
    pub normal_before_low_threshold: usize,
    pub low_cutoff_hour: u32,
    pub parallel_window: Duration,
    pub tz: Tz,
}

impl InsertionRules {
    pub fn from_config(cfg: &SchedulerConfig) -> Result<Self> {
        Ok(Self {
            normal_before_low_threshold: cfg.normal_before_low_threshold,
            low_cutoff_hour: cfg.low_cutoff_hour,
            parallel_window: Duration::hours(cfg.parallel_window_hours),
            tz: cfg.tz()?,
        })
    }
}

/// Where a new task goes, before vacation adjustment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub start_date: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub reason: String,
    /// Timeline index from which existing tasks must be re-sequenced.
    pub displace_from: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
pub struct PriorityInsertionEngine<'a> {
    calendar: &'a WorkCalendar,
    rules: &'a InsertionRules,
}

impl<'a> PriorityInsertionEngine<'a> {
    pub fn new(calendar: &'a WorkCalendar, rules: &'a InsertionRules) -> Self {
        Self { calendar, rules }
    }

    pub fn place(
        &self,
        priority: Priority,
        duration_days: f64,
        timeline: &WorkerTimeline,
        now: DateTime<Utc>,
    ) -> Placement {
        let placement = match priority {
            Priority::Urgent => self.place_urgent(duration_days, now),
            Priority::High => self.place_high(duration_days, timeline, now),
            Priority::Normal => self.place_normal(duration_days, timeline, now),
            Priority::Low => self.place_low(duration_days, timeline, now),
        };
        debug!(
            worker = timeline.worker_id(),
            ?priority,
            start = %placement.start_date,
            deadline = %placement.deadline,
            displace_from = ?placement.displace_from,
            reason = %placement.reason,
            "placed task"
        );
        placement
    }

    /// A LOW task stays movable on the local day it was created, if created before the cutoff.
    ///
    /// This compares `now` with the task's `created_at`, not with its start.
    pub fn is_movable_low(&self, task: &ScheduledTask, now: DateTime<Utc>) -> bool {
        task.priority == Priority::Low
            && same_local_day(task.created_at, now, self.rules.tz)
            && local_hour(task.created_at, self.rules.tz) < self.rules.low_cutoff_hour
    }

    fn place_urgent(&self, duration_days: f64, now: DateTime<Utc>) -> Placement {
        let start = self.calendar.next_available_start(now);
        self.placement(
            start,
            duration_days,
            "urgent: next working slot, runs alongside existing work".to_string(),
            None,
        )
    }

    fn place_high(&self, duration_days: f64, timeline: &WorkerTimeline, now: DateTime<Utc>) -> Placement {
        let free_normal = timeline
            .iter()
            .filter(|t| t.priority == Priority::Normal)
            .find(|normal| !self.has_parallel_partner(normal, timeline));

        match free_normal {
            Some(normal) => {
                let start = self.calendar.next_available_start(normal.start_date.max(now));
                self.placement(
                    start,
                    duration_days,
                    format!("high: parallel with normal task {}", normal.id),
                    None,
                )
            }
            None => self.placement(
                self.after_last(timeline, now),
                duration_days,
                "high: every normal task already has a parallel partner, appended".to_string(),
                None,
            ),
        }
    }

    fn place_normal(&self, duration_days: f64, timeline: &WorkerTimeline, now: DateTime<Utc>) -> Placement {
        self.sequential(duration_days, timeline, now, "normal")
    }

    fn place_low(&self, duration_days: f64, timeline: &WorkerTimeline, now: DateTime<Utc>) -> Placement {
        let cutoff = self.rules.low_cutoff_hour;
        if local_hour(now, self.rules.tz) >= cutoff {
            return self.sequential(
                duration_days,
                timeline,
                now,
                &format!("low after {cutoff}:00, placed as normal"),
            );
        }
        self.placement(
            self.after_last(timeline, now),
            duration_days,
            format!("low: appended, movable until {cutoff}:00 today"),
            None,
        )
    }

    /// NORMAL placement, shared with LOW after the cutoff.
    fn sequential(
        &self,
        duration_days: f64,
        timeline: &WorkerTimeline,
        now: DateTime<Utc>,
        label: &str,
    ) -> Placement {
        let threshold = self.rules.normal_before_low_threshold;
        let mut normals_ahead = 0usize;

        for (idx, task) in timeline.iter().enumerate() {
            match task.priority {
                Priority::Normal => normals_ahead += 1,
                Priority::Low if normals_ahead < threshold && self.is_movable_low(task, now) => {
                    let start = self.calendar.next_available_start(task.start_date.max(now));
                    return self.placement(
                        start,
                        duration_days,
                        format!(
                            "{label}: inserted before low task {} ({normals_ahead} normal ahead, threshold {threshold})",
                            task.id
                        ),
                        Some(idx),
                    );
                }
                _ => {}
            }
        }

        self.placement(
            self.after_last(timeline, now),
            duration_days,
            format!("{label}: appended after last task"),
            None,
        )
    }

    fn has_parallel_partner(&self, normal: &ScheduledTask, timeline: &WorkerTimeline) -> bool {
        timeline.iter().any(|other| {
            other.priority.is_parallel()
                && abs_gap(other.start_date, normal.start_date) <= self.rules.parallel_window
        })
    }

    fn after_last(&self, timeline: &WorkerTimeline, now: DateTime<Utc>) -> DateTime<Utc> {
        let anchor = timeline.latest_deadline().map_or(now, |d| d.max(now));
        self.calendar.next_available_start(anchor)
    }

    fn placement(
        &self,
        start_date: DateTime<Utc>,
        duration_days: f64,
        reason: String,
        displace_from: Option<usize>,
    ) -> Placement {
        Placement {
            start_date,
            deadline: self.calendar.task_deadline(start_date, duration_days),
            reason,
            displace_from,
        }
    }
}

fn abs_gap(a: DateTime<Utc>, b: DateTime<Utc>) -> Duration {
    if a >= b { a - b } else { b - a }
}
