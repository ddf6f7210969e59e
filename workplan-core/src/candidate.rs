//! Candidate selection: pick an assignee when the caller names none.
//!
//! Specialists (workers whose only role is the task type) are preferred over
//! generalists, unless the specialist's backlog runs past the generalist's by
//! more than the configured overload threshold.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

use crate::calendar::WorkCalendar;
use crate::task::WorkerId;
use crate::timeline::WorkerTimeline;
use crate::vacation::{VacationInterval, VacationResolver};

/// Role and brand facts for one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerProfile {
    pub id: WorkerId,
    pub roles: Vec<String>,
    /// Brands this worker serves; empty means every brand.
    #[serde(default)]
    pub brands: Vec<String>,
}

impl WorkerProfile {
    pub fn new(id: impl Into<WorkerId>, roles: &[&str]) -> Self {
        Self {
            id: id.into(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            brands: Vec::new(),
        }
    }

    pub fn with_brands(mut self, brands: &[&str]) -> Self {
        self.brands = brands.iter().map(|b| b.to_string()).collect();
        self
    }

    pub fn is_eligible(&self, req: &TaskRequirements) -> bool {
        let has_role = self.roles.iter().any(|r| r == &req.task_type);
        let serves_brand = match &req.brand {
            Some(brand) => self.brands.is_empty() || self.brands.iter().any(|b| b == brand),
            None => true,
        };
        has_role && serves_brand
    }

    pub fn is_specialist_for(&self, task_type: &str) -> bool {
        self.roles.len() == 1 && self.roles[0] == task_type
    }
}

/// What the task being assigned needs from its worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequirements {
    pub task_type: String,
    #[serde(default)]
    pub brand: Option<String>,
    pub duration_days: f64,
}

/// A worker's standing for one selection round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerCandidate {
    pub worker_id: WorkerId,
    pub workload_days: f64,
    pub is_specialist: bool,
    pub last_deadline: Option<DateTime<Utc>>,
    pub available_from: DateTime<Utc>,
}

impl WorkerCandidate {
    /// Last committed deadline, or `now` for an idle worker.
    pub fn effective_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.last_deadline.unwrap_or(now)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CandidateSelector<'a> {
    calendar: &'a WorkCalendar,
    overload: Duration,
}

impl<'a> CandidateSelector<'a> {
    pub fn new(calendar: &'a WorkCalendar, specialist_overload_days: i64) -> Self {
        Self {
            calendar,
            overload: Duration::days(specialist_overload_days),
        }
    }

    /// Derive selection facts for `profile`, or `None` if it cannot take the task.
    pub fn build_candidate(
        &self,
        profile: &WorkerProfile,
        req: &TaskRequirements,
        timeline: &WorkerTimeline,
        vacations: &[VacationInterval],
        now: DateTime<Utc>,
    ) -> Option<WorkerCandidate> {
        if !profile.is_eligible(req) {
            return None;
        }

        let last_deadline = timeline.latest_deadline();
        let start = self
            .calendar
            .next_available_start(last_deadline.map_or(now, |d| d.max(now)));
        let deadline = self.calendar.task_deadline(start, req.duration_days);
        let own_vacations: Vec<VacationInterval> = vacations
            .iter()
            .filter(|v| v.worker_id == profile.id)
            .cloned()
            .collect();
        let resolved = VacationResolver::new(self.calendar).resolve(
            start,
            deadline,
            req.duration_days,
            &own_vacations,
            now,
        );

        Some(WorkerCandidate {
            worker_id: profile.id.clone(),
            workload_days: timeline.workload_days(),
            is_specialist: profile.is_specialist_for(&req.task_type),
            last_deadline,
            available_from: resolved.start_date,
        })
    }

    /// Pick the assignee from `pool`; `None` when the pool is empty.
    pub fn select(&self, pool: &[WorkerCandidate], now: DateTime<Utc>) -> Option<WorkerCandidate> {
        let best_specialist = pool.iter().filter(|c| c.is_specialist).min_by(|a, b| rank(a, b));
        let best_generalist = pool.iter().filter(|c| !c.is_specialist).min_by(|a, b| rank(a, b));

        let chosen = match (best_specialist, best_generalist) {
            (Some(specialist), Some(generalist)) => {
                let lag = specialist.effective_deadline(now) - generalist.effective_deadline(now);
                if lag > self.overload {
                    debug!(
                        specialist = %specialist.worker_id,
                        generalist = %generalist.worker_id,
                        lag_hours = lag.num_hours(),
                        "specialist overloaded, choosing generalist"
                    );
                    generalist
                } else {
                    specialist
                }
            }
            (Some(only), None) | (None, Some(only)) => only,
            (None, None) => return None,
        };
        Some(chosen.clone())
    }
}

/// Lighter workload first, then earliest availability, then id.
fn rank(a: &WorkerCandidate, b: &WorkerCandidate) -> Ordering {
    a.workload_days
        .total_cmp(&b.workload_days)
        .then_with(|| a.available_from.cmp(&b.available_from))
        .then_with(|| a.worker_id.cmp(&b.worker_id))
}
