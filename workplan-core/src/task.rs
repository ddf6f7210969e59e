//! Task model: the scheduling-relevant projection of a work item.
//!
//! Storage owns the full record; the scheduler only ever sees these fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub type TaskId = String;
pub type WorkerId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    New,
    InProgress,
    OnReview,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Starts at the next working instant, alongside whatever is scheduled.
    Urgent = 0,
    /// Runs in parallel with the first NORMAL task that has no partner yet.
    High = 1,
    /// Sequential; the only priority that displaces existing work.
    Normal = 2,
    /// Appended to the end; provisional until the local cutoff.
    Low = 3,
}

impl Priority {
    /// URGENT and HIGH are placed over existing work instead of queueing.
    pub fn is_parallel(self) -> bool {
        matches!(self, Priority::Urgent | Priority::High)
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "urgent" => Ok(Priority::Urgent),
            "high" => Ok(Priority::High),
            "normal" => Ok(Priority::Normal),
            "low" => Ok(Priority::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// A task as the scheduler sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub priority: Priority,
    pub start_date: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    /// Working days; may be fractional (0.5 = four working hours).
    pub duration_days: f64,
    pub created_at: DateTime<Utc>,
    pub assignee_ids: BTreeSet<WorkerId>,
    #[serde(default)]
    pub status: TaskStatus,
}

impl ScheduledTask {
    pub fn new(
        id: impl Into<TaskId>,
        priority: Priority,
        start_date: DateTime<Utc>,
        deadline: DateTime<Utc>,
        duration_days: f64,
    ) -> Self {
        Self {
            id: id.into(),
            priority,
            start_date,
            deadline,
            duration_days,
            created_at: start_date,
            assignee_ids: BTreeSet::new(),
            status: TaskStatus::New,
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_assignee(mut self, worker_id: impl Into<WorkerId>) -> Self {
        self.assignee_ids.insert(worker_id.into());
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_complete(&self) -> bool {
        self.status == TaskStatus::Complete
    }

    pub fn is_assigned_to(&self, worker_id: &str) -> bool {
        self.assignee_ids.contains(worker_id)
    }

    /// Minimal invariants for safe downstream processing.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("id must be non-empty".to_string());
        }
        if self.assignee_ids.is_empty() {
            return Err(format!("task {}: assignee_ids must be non-empty", self.id));
        }
        if !(self.duration_days.is_finite() && self.duration_days > 0.0) {
            return Err(format!("task {}: duration_days must be positive", self.id));
        }
        if self.start_date >= self.deadline {
            return Err(format!("task {}: start_date must precede deadline", self.id));
        }
        Ok(())
    }
}

/// A rewrite instruction for one displaced task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMove {
    pub task_id: TaskId,
    pub new_start_date: DateTime<Utc>,
    pub new_deadline: DateTime<Utc>,
}

impl TaskMove {
    /// True when applying the move would not change the stored task.
    pub fn is_noop_for(&self, task: &ScheduledTask) -> bool {
        task.id == self.task_id
            && task.start_date == self.new_start_date
            && task.deadline == self.new_deadline
    }
}
