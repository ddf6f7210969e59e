//! Error types for scheduler configuration and inputs.

use thiserror::Error;

/// Errors surfaced by the scheduling core.
///
/// Only configuration and malformed inputs are errors. A missing candidate is
/// `None` and a vacation pass that hits its cap is reported on the result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScheduleError {
    /// Work hours are not strictly increasing or fall outside a day.
    #[error(
        "invalid work calendar: expected start < lunch_start < lunch_end < end <= 24, got {start}/{lunch_start}/{lunch_end}/{end}"
    )]
    InvalidCalendar {
        start: u32,
        lunch_start: u32,
        lunch_end: u32,
        end: u32,
    },

    /// A tunable threshold has an unusable value.
    #[error("invalid threshold {name}: {reason}")]
    InvalidThreshold { name: &'static str, reason: String },

    /// The configured IANA zone could not be parsed.
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),

    /// A timestamp could not be parsed or does not exist locally.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// A timeline was handed in under another worker's id.
    #[error("timeline belongs to {timeline}, not {worker}")]
    TimelineMismatch { worker: String, timeline: String },

    /// Task duration must be a positive, finite number of days.
    #[error("invalid duration: {0} days")]
    InvalidDuration(f64),
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, ScheduleError>;
