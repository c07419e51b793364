//! Time windows for catalog queries.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A closed time interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Create a window; the bounds are swapped if given in reverse.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t <= self.end
    }

    /// Linear position of `t` within the window, clamped to [0, 1].
    ///
    /// A zero-length window yields 1.0.
    pub fn fraction_of(&self, t: DateTime<Utc>) -> f64 {
        let span = (self.end - self.start).num_milliseconds();
        if span <= 0 {
            return 1.0;
        }
        let offset = (t - self.start).num_milliseconds();
        (offset as f64 / span as f64).clamp(0.0, 1.0)
    }

    /// Union of two windows.
    pub fn span(&self, other: &TimeWindow) -> TimeWindow {
        TimeWindow {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// ISO8601 interval in the `start,end` form catalog APIs take.
    pub fn to_query_interval(&self) -> String {
        format!(
            "{},{}",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}

/// One window per recent warm season, most recent first.
///
/// A season runs from the first day of `start_month` to the last instant of
/// `end_month` (inclusive). The current year's season is clipped to `now` and
/// skipped entirely if it has not started yet. Months must be 1..=12 with
/// `start_month <= end_month`.
pub fn warm_season_windows(
    now: DateTime<Utc>,
    years: u32,
    start_month: u32,
    end_month: u32,
) -> Vec<TimeWindow> {
    let mut windows = Vec::with_capacity(years as usize);
    let mut year = now.year();

    while windows.len() < years as usize {
        let (Some(start), Some(end)) = (
            month_start(year, start_month),
            month_start_after(year, end_month),
        ) else {
            break;
        };
        let end = end - chrono::Duration::seconds(1);

        if start <= now {
            windows.push(TimeWindow::new(start, end.min(now)));
        }
        year -= 1;
        if year < 1970 {
            break;
        }
    }
    windows
}

fn month_start(year: i32, month: u32) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(year, month, 1)?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

fn month_start_after(year: i32, month: u32) -> Option<DateTime<Utc>> {
    if month >= 12 {
        month_start(year + 1, 1)
    } else {
        month_start(year, month + 1)
    }
}

/// Parse an ISO8601 timestamp or calendar date (assumed UTC).
pub fn parse_iso8601(s: &str) -> Result<DateTime<Utc>, TimeParseError> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.fZ", "%Y-%m-%dT%H:%M:%SZ", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(ndt) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&ndt));
        }
    }
    Err(TimeParseError::InvalidFormat(s.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum TimeParseError {
    #[error("Invalid time format: {0}")]
    InvalidFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_fraction_of_window() {
        let w = TimeWindow::new(utc(2024, 6, 1, 0), utc(2024, 6, 11, 0));
        assert_eq!(w.fraction_of(utc(2024, 6, 1, 0)), 0.0);
        assert_eq!(w.fraction_of(utc(2024, 6, 11, 0)), 1.0);
        assert!((w.fraction_of(utc(2024, 6, 6, 0)) - 0.5).abs() < 1e-9);
        assert_eq!(w.fraction_of(utc(2025, 1, 1, 0)), 1.0);
        assert_eq!(w.fraction_of(utc(2020, 1, 1, 0)), 0.0);
    }

    #[test]
    fn test_zero_length_window_is_fully_recent() {
        let t = utc(2024, 7, 1, 12);
        assert_eq!(TimeWindow::new(t, t).fraction_of(t), 1.0);
    }

    #[test]
    fn test_warm_seasons_mid_summer() {
        let now = utc(2024, 7, 15, 0);
        let windows = warm_season_windows(now, 3, 6, 8);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].start, utc(2024, 6, 1, 0));
        assert_eq!(windows[0].end, now);
        assert_eq!(windows[1].start, utc(2023, 6, 1, 0));
        assert_eq!(windows[1].end, Utc.with_ymd_and_hms(2023, 8, 31, 23, 59, 59).unwrap());
        assert_eq!(windows[2].start, utc(2022, 6, 1, 0));
    }

    #[test]
    fn test_warm_seasons_skip_unstarted_season() {
        let now = utc(2024, 3, 1, 0);
        let windows = warm_season_windows(now, 2, 6, 8);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].start, utc(2023, 6, 1, 0));
        assert_eq!(windows[1].start, utc(2022, 6, 1, 0));
    }

    #[test]
    fn test_parse_iso8601_variants() {
        assert_eq!(parse_iso8601("2024-06-01").unwrap(), utc(2024, 6, 1, 0));
        assert_eq!(parse_iso8601("2024-06-01T12:00:00Z").unwrap(), utc(2024, 6, 1, 12));
        assert_eq!(parse_iso8601("2024-06-01T12:00:00.000Z").unwrap(), utc(2024, 6, 1, 12));
        assert_eq!(parse_iso8601("2024-06-01T14:00:00+02:00").unwrap(), utc(2024, 6, 1, 12));
        assert!(parse_iso8601("yesterday").is_err());
    }
}
