//! Queue shift propagation: re-linearize a timeline after an insertion.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::calendar::WorkCalendar;
use crate::task::TaskMove;
use crate::timeline::WorkerTimeline;

#[derive(Debug, Clone, Copy)]
pub struct QueueShiftPropagator<'a> {
    calendar: &'a WorkCalendar,
}

impl<'a> QueueShiftPropagator<'a> {
    pub fn new(calendar: &'a WorkCalendar) -> Self {
        Self { calendar }
    }

    /// Recompute every task from `from_index` onward, back to back after `anchor_deadline`.
    ///
    /// The returned batch is only meaningful as a whole: apply all of it or none.
    pub fn propagate(
        &self,
        anchor_deadline: DateTime<Utc>,
        from_index: usize,
        timeline: &WorkerTimeline,
    ) -> Vec<TaskMove> {
        let Some(affected) = timeline.tasks().get(from_index..) else {
            return Vec::new();
        };

        let mut previous_deadline = anchor_deadline;
        let moves: Vec<TaskMove> = affected
            .iter()
            .map(|task| {
                let new_start_date = self.calendar.next_available_start(previous_deadline);
                let new_deadline = self.calendar.task_deadline(new_start_date, task.duration_days);
                previous_deadline = new_deadline;
                TaskMove {
                    task_id: task.id.clone(),
                    new_start_date,
                    new_deadline,
                }
            })
            .collect();

        debug!(
            worker = timeline.worker_id(),
            from_index,
            moved = moves.len(),
            "propagated queue shift"
        );
        moves
    }
}
