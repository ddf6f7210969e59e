//! workplan-core: task placement engine for the Workplan scheduler
//!
//! Pure computation over snapshots: working-calendar arithmetic, priority
//! insertion, vacation resolution, queue shifting and assignee selection.
//! Persistence, locking and notification belong to the caller.

pub mod calendar;
pub mod candidate;
pub mod config;
pub mod error;
pub mod insertion;
pub mod kernel;
pub mod shift;
pub mod task;
pub mod time;
pub mod timeline;
pub mod vacation;

pub use calendar::{MAX_ROUNDING_PASSES, WorkCalendar};
pub use candidate::{CandidateSelector, TaskRequirements, WorkerCandidate, WorkerProfile};
pub use config::{
    DEFAULT_LOW_CUTOFF_HOUR, DEFAULT_NORMAL_BEFORE_LOW_THRESHOLD, DEFAULT_PARALLEL_WINDOW_HOURS,
    DEFAULT_SPECIALIST_OVERLOAD_DAYS, HOURS_PER_DAY, SchedulerConfig, WorkCalendarConfig,
};
pub use error::{Result, ScheduleError};
pub use insertion::{InsertionRules, Placement, PriorityInsertionEngine};
pub use kernel::{Clock, FixedClock, InsertionResult, SchedulerKernel, SystemClock};
pub use shift::QueueShiftPropagator;
pub use task::{Priority, ScheduledTask, TaskId, TaskMove, TaskStatus, WorkerId};
pub use time::{local_hour, parse_instant, parse_local_to_utc, same_local_day};
pub use timeline::WorkerTimeline;
pub use vacation::{
    MAX_VACATION_PASSES, VacationAdjustment, VacationInterval, VacationResolution, VacationResolver,
};
