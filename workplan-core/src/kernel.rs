//! Scheduler kernel: the engine's external call shapes.
//!
//! Wires calendar, insertion, vacation and shift primitives together over a
//! [`Clock`]. Every call works on snapshots handed in by the caller; the
//! kernel holds no per-worker state, so serializing writes per worker is the
//! caller's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::calendar::WorkCalendar;
use crate::candidate::{CandidateSelector, TaskRequirements, WorkerCandidate, WorkerProfile};
use crate::config::SchedulerConfig;
use crate::error::{Result, ScheduleError};
use crate::insertion::{InsertionRules, PriorityInsertionEngine};
use crate::shift::QueueShiftPropagator;
use crate::task::{Priority, TaskMove, WorkerId};
use crate::timeline::WorkerTimeline;
use crate::vacation::{VacationAdjustment, VacationInterval, VacationResolution, VacationResolver};

/// Source of "now" for every scheduling decision.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Outcome of placing one new task on one worker's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertionResult {
    pub worker_id: WorkerId,
    pub priority: Priority,
    pub start_date: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub reason: String,
    /// Timeline index the new task was inserted at, when it displaced work.
    pub insertion_index: Option<usize>,
    pub tasks_to_move: Vec<TaskMove>,
    pub no_tasks_affected: bool,
    pub vacation_adjustment: Option<VacationAdjustment>,
    /// False only when vacation resolution hit its pass cap.
    pub resolved: bool,
}

#[derive(Debug, Clone)]
pub struct SchedulerKernel<C: Clock> {
    calendar: WorkCalendar,
    rules: InsertionRules,
    specialist_overload_days: i64,
    clock: C,
}

impl<C: Clock> SchedulerKernel<C> {
    pub fn new(config: &SchedulerConfig, clock: C) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            calendar: WorkCalendar::new(config.calendar)?,
            rules: InsertionRules::from_config(config)?,
            specialist_overload_days: config.specialist_overload_days,
            clock,
        })
    }

    pub fn calendar(&self) -> &WorkCalendar {
        &self.calendar
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Place a new task for `worker_id`: priority placement, then vacation
    /// adjustment, then displacement of whatever follows the insertion point.
    pub fn compute_insertion(
        &self,
        worker_id: &str,
        priority: Priority,
        duration_days: f64,
        timeline: &WorkerTimeline,
        vacations: &[VacationInterval],
    ) -> Result<InsertionResult> {
        if !(duration_days.is_finite() && duration_days > 0.0) {
            return Err(ScheduleError::InvalidDuration(duration_days));
        }
        check_owner(worker_id, timeline)?;
        let now = self.clock.now();

        let placement = PriorityInsertionEngine::new(&self.calendar, &self.rules).place(
            priority,
            duration_days,
            timeline,
            now,
        );

        let own_vacations: Vec<VacationInterval> = vacations
            .iter()
            .filter(|v| v.worker_id == worker_id)
            .cloned()
            .collect();
        let resolved = VacationResolver::new(&self.calendar).resolve(
            placement.start_date,
            placement.deadline,
            duration_days,
            &own_vacations,
            now,
        );

        let tasks_to_move = match placement.displace_from {
            Some(idx) => self.compute_shift(worker_id, resolved.deadline, idx, timeline)?,
            None => Vec::new(),
        };

        let mut reason = placement.reason;
        if let Some(adj) = &resolved.adjustment {
            reason.push_str(&format!("; moved past vacation ({})", adj.conflicts.join(", ")));
        }

        info!(
            worker = worker_id,
            ?priority,
            start = %resolved.start_date,
            deadline = %resolved.deadline,
            moved = tasks_to_move.len(),
            "computed insertion"
        );

        Ok(InsertionResult {
            worker_id: worker_id.to_string(),
            priority,
            start_date: resolved.start_date,
            deadline: resolved.deadline,
            reason,
            insertion_index: placement.displace_from,
            no_tasks_affected: tasks_to_move.is_empty(),
            tasks_to_move,
            vacation_adjustment: resolved.adjustment,
            resolved: resolved.converged,
        })
    }

    /// Re-sequence `timeline` from `insertion_index` behind `anchor_deadline`.
    pub fn compute_shift(
        &self,
        worker_id: &str,
        anchor_deadline: DateTime<Utc>,
        insertion_index: usize,
        timeline: &WorkerTimeline,
    ) -> Result<Vec<TaskMove>> {
        check_owner(worker_id, timeline)?;
        Ok(QueueShiftPropagator::new(&self.calendar).propagate(anchor_deadline, insertion_index, timeline))
    }

    /// Push a slot of `duration_days` starting at `start` past every interval
    /// in `vacations`, whoever they belong to.
    pub fn resolve_vacations(
        &self,
        start: DateTime<Utc>,
        duration_days: f64,
        vacations: &[VacationInterval],
    ) -> VacationResolution {
        let deadline = self.calendar.task_deadline(start, duration_days);
        VacationResolver::new(&self.calendar).resolve(start, deadline, duration_days, vacations, self.clock.now())
    }

    /// Derive one worker's selection facts; `None` when the worker is not eligible.
    pub fn build_candidate(
        &self,
        profile: &WorkerProfile,
        req: &TaskRequirements,
        timeline: &WorkerTimeline,
        vacations: &[VacationInterval],
    ) -> Option<WorkerCandidate> {
        self.selector()
            .build_candidate(profile, req, timeline, vacations, self.clock.now())
    }

    pub fn select_candidate(&self, pool: &[WorkerCandidate]) -> Option<WorkerCandidate> {
        let chosen = self.selector().select(pool, self.clock.now());
        match &chosen {
            Some(c) => debug!(worker = %c.worker_id, pool = pool.len(), "selected candidate"),
            None => debug!(pool = pool.len(), "no candidate"),
        }
        chosen
    }

    fn selector(&self) -> CandidateSelector<'_> {
        CandidateSelector::new(&self.calendar, self.specialist_overload_days)
    }
}

fn check_owner(worker_id: &str, timeline: &WorkerTimeline) -> Result<()> {
    if timeline.worker_id() != worker_id {
        return Err(ScheduleError::TimelineMismatch {
            worker: worker_id.to_string(),
            timeline: timeline.worker_id().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkCalendarConfig;
    use crate::task::ScheduledTask;
    use chrono::{Duration, TimeZone};

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, h, 0, 0).unwrap()
    }

    fn kernel(now: DateTime<Utc>) -> SchedulerKernel<FixedClock> {
        SchedulerKernel::new(&SchedulerConfig::default(), FixedClock(now)).unwrap()
    }

    fn task(id: &str, p: Priority, start: DateTime<Utc>, end: DateTime<Utc>, days: f64) -> ScheduledTask {
        ScheduledTask::new(id, p, start, end, days)
            .with_assignee("w1")
            .with_created_at(at(2, 8))
    }

    #[test]
    fn kernel_rejects_invalid_config() {
        let cfg = SchedulerConfig::default().with_calendar(WorkCalendarConfig::new(18, 13, 14, 9));
        assert!(SchedulerKernel::new(&cfg, SystemClock).is_err());
    }

    #[test]
    fn kernel_rejects_non_positive_duration() {
        let k = kernel(at(2, 9));
        let tl = WorkerTimeline::from_tasks("w1", vec![]);
        let err = k.compute_insertion("w1", Priority::Normal, 0.0, &tl, &[]).unwrap_err();
        assert_eq!(err, ScheduleError::InvalidDuration(0.0));
        assert!(k.compute_insertion("w1", Priority::Normal, f64::NAN, &tl, &[]).is_err());
    }

    #[test]
    fn kernel_urgent_leaves_timeline_untouched() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 11, 5, 0).unwrap();
        let k = kernel(now);
        let tl = WorkerTimeline::from_tasks(
            "w1",
            vec![
                task("n1", Priority::Normal, at(2, 9), at(3, 9), 1.0),
                task("n2", Priority::Normal, at(3, 9), at(4, 9), 1.0),
            ],
        );

        let res = k.compute_insertion("w1", Priority::Urgent, 1.0, &tl, &[]).unwrap();
        assert!(res.no_tasks_affected);
        assert!(res.tasks_to_move.is_empty());
        assert_eq!(res.start_date, k.calendar().next_available_start(now));
        assert!(res.resolved);
    }

    #[test]
    fn kernel_normal_displacement_is_anchored_on_vacation_adjusted_deadline() {
        let now = at(2, 10);
        let k = kernel(now);
        let tl = WorkerTimeline::from_tasks(
            "w1",
            vec![
                task("n1", Priority::Normal, at(2, 9), at(3, 9), 1.0),
                task("l1", Priority::Low, at(3, 9), at(4, 9), 1.0),
                task("l2", Priority::Low, at(4, 9), at(4, 14), 0.5),
            ],
        );
        // Tuesday afternoon off: the new task slides from Tue to Thu.
        let vacations = vec![
            VacationInterval::new("w1", at(3, 12), at(4, 0)),
            VacationInterval::new("w2", at(3, 0), at(20, 0)),
        ];

        let res = k
            .compute_insertion("w1", Priority::Normal, 1.0, &tl, &vacations)
            .unwrap();

        assert_eq!(res.insertion_index, Some(1));
        assert_eq!(res.start_date, at(5, 9));
        assert_eq!(res.deadline, at(6, 9));
        assert!(res.reason.contains("vacation"));
        assert!(res.vacation_adjustment.is_some());

        let ids: Vec<&str> = res.tasks_to_move.iter().map(|m| m.task_id.as_str()).collect();
        assert_eq!(ids, vec!["l1", "l2"]);
        assert_eq!(res.tasks_to_move[0].new_start_date, at(6, 9));
        assert_eq!(res.tasks_to_move[1].new_start_date, at(9, 9));
        assert!(!res.no_tasks_affected);
    }

    #[test]
    fn kernel_refuses_foreign_timeline() {
        let k = kernel(at(2, 9));
        let tl = WorkerTimeline::from_tasks("w2", vec![]);
        let err = k.compute_shift("w1", at(2, 9), 0, &tl).unwrap_err();
        assert_eq!(
            err,
            ScheduleError::TimelineMismatch {
                worker: "w1".into(),
                timeline: "w2".into(),
            }
        );
        assert!(k.compute_insertion("w1", Priority::Normal, 1.0, &tl, &[]).is_err());
    }

    #[test]
    fn resolve_vacations_clears_every_interval_given() {
        let k = kernel(at(2, 9));
        let vacations = vec![
            VacationInterval::new("w1", at(2, 0), at(2, 23)),
            VacationInterval::new("w2", at(3, 0), at(3, 23)),
        ];
        let res = k.resolve_vacations(at(2, 9), 1.0, &vacations);
        assert!(res.converged);
        // Monday off pushes to Wednesday, which already clears Tuesday.
        assert_eq!(res.start_date, at(4, 9));
        assert!(vacations.iter().all(|v| !v.overlaps(res.start_date, res.deadline)));
    }

    #[test]
    fn kernel_selects_and_reports_none() {
        let k = kernel(at(2, 9));
        assert!(k.select_candidate(&[]).is_none());

        let profile = WorkerProfile::new("w1", &["design"]);
        let req = TaskRequirements {
            task_type: "design".into(),
            brand: None,
            duration_days: 1.0,
        };
        let tl = WorkerTimeline::from_tasks("w1", vec![]);
        let cand = k.build_candidate(&profile, &req, &tl, &[]).unwrap();
        assert_eq!(cand.available_from, at(2, 9));
        assert_eq!(k.select_candidate(&[cand]).unwrap().worker_id, "w1");
    }

    #[test]
    fn insertion_result_serializes_with_snake_case_keys() {
        let k = kernel(at(2, 9) + Duration::minutes(10));
        let tl = WorkerTimeline::from_tasks("w1", vec![]);
        let res = k.compute_insertion("w1", Priority::Low, 0.5, &tl, &[]).unwrap();

        let json = serde_json::to_string(&res).unwrap();
        assert!(json.contains("\"priority\":\"low\""));
        assert!(json.contains("\"tasks_to_move\":[]"));
        assert!(json.contains("\"no_tasks_affected\":true"));
        let back: InsertionResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, res);
    }
}
