//! Working-hours window.

use crate::config::ScheduleConfig;
use crate::error::{JobError, JobResult};
use chrono::{DateTime, FixedOffset, NaiveTime, TimeDelta, Utc};
use std::time::Duration;

/// Daily window `[start, end)` during which the processor may take jobs.
///
/// A window whose end lies before its start wraps past midnight. Equal
/// bounds mean the whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingHours {
    start: NaiveTime,
    end: NaiveTime,
    offset: FixedOffset,
}

impl WorkingHours {
    /// Creates a window in the given UTC offset.
    pub fn new(start: NaiveTime, end: NaiveTime, offset: FixedOffset) -> Self {
        Self { start, end, offset }
    }

    /// Builds the window from configuration. Returns `None` when the
    /// schedule is disabled.
    pub fn from_config(config: &ScheduleConfig) -> JobResult<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }

        let start = parse_time(&config.start)?;
        let end = parse_time(&config.end)?;
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60).ok_or_else(|| {
            JobError::Configuration(format!(
                "UTC offset out of range: {} minutes",
                config.utc_offset_minutes
            ))
        })?;

        Ok(Some(Self::new(start, end, offset)))
    }

    /// Window start.
    pub fn start(&self) -> NaiveTime {
        self.start
    }

    /// Window end.
    pub fn end(&self) -> NaiveTime {
        self.end
    }

    /// Returns true if the local time falls inside the window.
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start == self.end {
            return true;
        }
        if self.start < self.end {
            time >= self.start && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }

    /// Time from `time` until the window next opens; zero inside it.
    pub fn until_open(&self, time: NaiveTime) -> Duration {
        if self.contains(time) {
            return Duration::ZERO;
        }
        let mut delta = self.start.signed_duration_since(time);
        if delta < TimeDelta::zero() {
            delta += TimeDelta::days(1);
        }
        delta.to_std().unwrap_or_default()
    }

    /// Local wall-clock time of an instant.
    pub fn local_time(&self, now: DateTime<Utc>) -> NaiveTime {
        now.with_timezone(&self.offset).time()
    }

    /// Returns true if the window is open at the given instant.
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        self.contains(self.local_time(now))
    }

    /// Time from the given instant until the window next opens.
    pub fn until_open_at(&self, now: DateTime<Utc>) -> Duration {
        self.until_open(self.local_time(now))
    }
}

/// Parses `HH:MM` or `HH:MM:SS`.
pub fn parse_time(value: &str) -> JobResult<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .map_err(|e| JobError::Configuration(format!("Invalid time '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(value: &str) -> NaiveTime {
        parse_time(value).unwrap()
    }

    fn window(start: &str, end: &str) -> WorkingHours {
        WorkingHours::new(t(start), t(end), FixedOffset::east_opt(0).unwrap())
    }

    #[test]
    fn test_daytime_window() {
        let hours = window("08:00", "18:00");
        assert!(hours.contains(t("08:00")));
        assert!(hours.contains(t("12:30")));
        assert!(!hours.contains(t("18:00")));
        assert!(!hours.contains(t("07:59")));
    }

    #[test]
    fn test_window_wrapping_midnight() {
        let hours = window("22:00", "06:00");
        assert!(hours.contains(t("23:15")));
        assert!(hours.contains(t("00:00")));
        assert!(hours.contains(t("05:59")));
        assert!(!hours.contains(t("06:00")));
        assert!(!hours.contains(t("12:00")));
    }

    #[test]
    fn test_equal_bounds_is_whole_day() {
        let hours = window("00:00", "00:00");
        assert!(hours.contains(t("13:37")));
    }

    #[test]
    fn test_until_open() {
        let hours = window("08:00", "18:00");
        assert_eq!(hours.until_open(t("10:00")), Duration::ZERO);
        assert_eq!(hours.until_open(t("07:30")), Duration::from_secs(30 * 60));
        assert_eq!(hours.until_open(t("20:00")), Duration::from_secs(12 * 3600));
    }

    #[test]
    fn test_offset_is_applied() {
        let hours = WorkingHours::new(t("08:00"), t("18:00"), FixedOffset::east_opt(2 * 3600).unwrap());
        let utc_seven = Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap();
        assert!(hours.is_open_at(utc_seven));

        let utc_five = Utc.with_ymd_and_hms(2024, 5, 1, 5, 0, 0).unwrap();
        assert!(!hours.is_open_at(utc_five));
        assert_eq!(hours.until_open_at(utc_five), Duration::from_secs(3600));
    }

    #[test]
    fn test_from_config() {
        let mut config = ScheduleConfig::default();
        assert!(WorkingHours::from_config(&config).unwrap().is_none());

        config.enabled = true;
        config.start = "22:00".into();
        config.end = "06:00:00".into();
        let hours = WorkingHours::from_config(&config).unwrap().unwrap();
        assert_eq!(hours.start(), t("22:00"));
        assert_eq!(hours.end(), t("06:00"));

        config.start = "25:00".into();
        assert!(matches!(
            WorkingHours::from_config(&config),
            Err(JobError::Configuration(_))
        ));
    }
}
