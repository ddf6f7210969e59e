//! Scheduler configuration: work hours plus the tunable placement thresholds.
//!
//! Everything here is loaded once per process and treated as immutable.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScheduleError};

/// NORMAL tasks that may precede a LOW task before a new NORMAL stops jumping it.
pub const DEFAULT_NORMAL_BEFORE_LOW_THRESHOLD: usize = 5;

/// Local hour after which a new LOW task is placed like a NORMAL one.
pub const DEFAULT_LOW_CUTOFF_HOUR: u32 = 17;

/// Two tasks starting within this many hours of each other run in parallel.
pub const DEFAULT_PARALLEL_WINDOW_HOURS: i64 = 24;

/// Specialist backlog (in days past the generalist's) that hands work to the generalist.
pub const DEFAULT_SPECIALIST_OVERLOAD_DAYS: i64 = 10;

/// Working hours counted per task day.
pub const HOURS_PER_DAY: f64 = 8.0;

/// Daily work windows, expressed as UTC hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkCalendarConfig {
    pub start_hour: u32,
    pub lunch_start_hour: u32,
    pub lunch_end_hour: u32,
    pub end_hour: u32,
}

impl Default for WorkCalendarConfig {
    fn default() -> Self {
        Self {
            start_hour: 9,
            lunch_start_hour: 13,
            lunch_end_hour: 14,
            end_hour: 18,
        }
    }
}

impl WorkCalendarConfig {
    pub fn new(start_hour: u32, lunch_start_hour: u32, lunch_end_hour: u32, end_hour: u32) -> Self {
        Self {
            start_hour,
            lunch_start_hour,
            lunch_end_hour,
            end_hour,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let ordered = self.start_hour < self.lunch_start_hour
            && self.lunch_start_hour < self.lunch_end_hour
            && self.lunch_end_hour < self.end_hour
            && self.end_hour <= 24;
        if !ordered {
            return Err(ScheduleError::InvalidCalendar {
                start: self.start_hour,
                lunch_start: self.lunch_start_hour,
                lunch_end: self.lunch_end_hour,
                end: self.end_hour,
            });
        }
        Ok(())
    }
}

/// Full scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// IANA zone used for the LOW end-of-day cutoff and "same day" checks.
    pub timezone: String,
    pub low_cutoff_hour: u32,
    pub normal_before_low_threshold: usize,
    pub parallel_window_hours: i64,
    pub specialist_overload_days: i64,
    pub calendar: WorkCalendarConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            low_cutoff_hour: DEFAULT_LOW_CUTOFF_HOUR,
            normal_before_low_threshold: DEFAULT_NORMAL_BEFORE_LOW_THRESHOLD,
            parallel_window_hours: DEFAULT_PARALLEL_WINDOW_HOURS,
            specialist_overload_days: DEFAULT_SPECIALIST_OVERLOAD_DAYS,
            calendar: WorkCalendarConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_calendar(mut self, calendar: WorkCalendarConfig) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn with_timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = tz.into();
        self
    }

    /// Check every invariant; a failure here is fatal at startup.
    pub fn validate(&self) -> Result<()> {
        self.calendar.validate()?;
        self.tz()?;

        if self.low_cutoff_hour > 23 {
            return Err(ScheduleError::InvalidThreshold {
                name: "low_cutoff_hour",
                reason: format!("{} is not an hour of the day", self.low_cutoff_hour),
            });
        }
        if self.parallel_window_hours <= 0 {
            return Err(ScheduleError::InvalidThreshold {
                name: "parallel_window_hours",
                reason: "must be positive".to_string(),
            });
        }
        if self.specialist_overload_days < 0 {
            return Err(ScheduleError::InvalidThreshold {
                name: "specialist_overload_days",
                reason: "must not be negative".to_string(),
            });
        }
        Ok(())
    }

    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse()
            .map_err(|_| ScheduleError::UnknownTimezone(self.timezone.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = SchedulerConfig::default();
        cfg.validate().unwrap();
    }

    #[test]
    fn non_monotonic_hours_are_rejected() {
        let cal = WorkCalendarConfig::new(9, 14, 13, 18);
        let err = cal.validate().unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidCalendar { .. }));

        let past_midnight = WorkCalendarConfig::new(15, 19, 20, 25);
        assert!(past_midnight.validate().is_err());
    }

    #[test]
    fn end_of_day_at_midnight_is_allowed() {
        WorkCalendarConfig::new(15, 19, 20, 24).validate().unwrap();
    }

    #[test]
    fn bad_timezone_is_rejected() {
        let cfg = SchedulerConfig::default().with_timezone("Mars/Olympus");
        assert_eq!(
            cfg.validate().unwrap_err(),
            ScheduleError::UnknownTimezone("Mars/Olympus".to_string())
        );
    }

    #[test]
    fn partial_config_fills_defaults() {
        let cfg: SchedulerConfig =
            serde_json::from_str(r#"{"timezone":"Europe/Moscow","low_cutoff_hour":16}"#).unwrap();
        assert_eq!(cfg.low_cutoff_hour, 16);
        assert_eq!(cfg.normal_before_low_threshold, DEFAULT_NORMAL_BEFORE_LOW_THRESHOLD);
        assert_eq!(cfg.calendar, WorkCalendarConfig::default());
        cfg.validate().unwrap();
    }
}
