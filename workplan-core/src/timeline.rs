//! Worker timeline: a worker's open tasks ordered by start date.
//!
//! Rebuilt on demand from whatever the store hands over; never persisted.

use chrono::{DateTime, Utc};

use crate::task::{ScheduledTask, WorkerId};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkerTimeline {
    worker_id: WorkerId,
    tasks: Vec<ScheduledTask>,
}

impl WorkerTimeline {
    /// Keep the worker's non-complete tasks, sorted by start date.
    ///
    /// Ties fall back to creation time, then id, so the order is stable.
    pub fn from_tasks<I>(worker_id: impl Into<WorkerId>, tasks: I) -> Self
    where
        I: IntoIterator<Item = ScheduledTask>,
    {
        let worker_id = worker_id.into();
        let mut tasks: Vec<ScheduledTask> = tasks
            .into_iter()
            .filter(|t| !t.is_complete() && t.is_assigned_to(&worker_id))
            .collect();
        tasks.sort_by(|a, b| {
            a.start_date
                .cmp(&b.start_date)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        Self { worker_id, tasks }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn tasks(&self) -> &[ScheduledTask] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScheduledTask> {
        self.tasks.iter()
    }

    /// Latest deadline across the timeline.
    ///
    /// Parallel placements can end after the task that starts last, so this
    /// is the max over all tasks rather than the last task's deadline.
    pub fn latest_deadline(&self) -> Option<DateTime<Utc>> {
        self.tasks.iter().map(|t| t.deadline).max()
    }

    /// Sum of `duration_days` over open tasks.
    pub fn workload_days(&self) -> f64 {
        self.tasks.iter().map(|t| t.duration_days).sum()
    }
}
