//! Wall-clock helpers: the persisted timestamp format and the daily reset boundary.
//!
//! All scheduling times are local, second precision, without timezone
//! (`NaiveDateTime`). The environment's reference timezone only matters when
//! locating the daily boundary, so it is carried as an offset from local time.

use chrono::{NaiveDateTime, NaiveTime, TimeDelta, Timelike};

use super::errors::{Result, RotaError};

/// `YYYY-MM-DD HH:MM:SS`, used by the delay state file.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_timestamp(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT)
        .map_err(|e| RotaError::InvalidTimestamp(format!("{value:?}: {e}")))
}

/// Drop sub-second precision so values survive a round trip through the file.
pub fn truncate_to_second(at: NaiveDateTime) -> NaiveDateTime {
    at.with_nanosecond(0).unwrap_or(at)
}

/// Whole minutes between `now` and `until`, never less than one.
pub fn minutes_until(now: NaiveDateTime, until: NaiveDateTime) -> i64 {
    ((until - now).num_seconds() / 60).max(1)
}

/// The fixed daily maintenance boundary.
///
/// `time_of_day` is expressed in the environment's reference timezone;
/// `reference_offset` is (reference time - local time).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetSchedule {
    time_of_day: NaiveTime,
    reference_offset: TimeDelta,
}

impl ResetSchedule {
    pub fn new(time_of_day: NaiveTime, reference_offset_minutes: i64) -> Self {
        Self {
            time_of_day,
            reference_offset: TimeDelta::minutes(reference_offset_minutes),
        }
    }

    /// Parse `HH:MM` (or `HH:MM:SS`).
    pub fn parse(time_of_day: &str, reference_offset_minutes: i64) -> Result<Self> {
        let parsed = NaiveTime::parse_from_str(time_of_day, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(time_of_day, "%H:%M:%S"))
            .map_err(|e| RotaError::ConfigValidation {
                path: "reset_time".to_string(),
                reason: format!("{time_of_day:?}: {e}"),
            })?;
        Ok(Self::new(parsed, reference_offset_minutes))
    }

    pub fn time_of_day(&self) -> NaiveTime {
        self.time_of_day
    }

    /// Next strictly-future occurrence of the boundary, in local time.
    pub fn next_boundary(&self, now: NaiveDateTime) -> NaiveDateTime {
        let reference_now = now + self.reference_offset;
        let mut candidate = reference_now.date().and_time(self.time_of_day);
        if candidate <= reference_now {
            candidate += TimeDelta::days(1);
        }
        candidate - self.reference_offset
    }
}

impl Default for ResetSchedule {
    fn default() -> Self {
        Self::new(NaiveTime::MIN, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn timestamp_format_is_fixed() {
        let t = at(2, 23, 55, 0);
        assert_eq!(format_timestamp(t), "2024-01-02 23:55:00");
        assert_eq!(parse_timestamp("2024-01-02 23:55:00").unwrap(), t);
        assert!(parse_timestamp("2024-01-02T23:55:00").is_err());
        assert!(parse_timestamp("garbage").is_err());
    }

    #[test]
    fn next_boundary_is_strictly_in_the_future() {
        let reset = ResetSchedule::default();
        assert_eq!(reset.next_boundary(at(1, 23, 54, 0)), at(2, 0, 0, 0));
        // exactly on the boundary rolls to the next day
        assert_eq!(reset.next_boundary(at(2, 0, 0, 0)), at(3, 0, 0, 0));
        assert_eq!(reset.next_boundary(at(2, 0, 5, 0)), at(3, 0, 0, 0));
    }

    #[test]
    fn reference_offset_shifts_the_local_boundary() {
        // reference clock runs one hour ahead of local time
        let reset = ResetSchedule::new(NaiveTime::MIN, 60);
        assert_eq!(reset.next_boundary(at(1, 22, 30, 0)), at(1, 23, 0, 0));
        assert_eq!(reset.next_boundary(at(1, 23, 30, 0)), at(2, 23, 0, 0));
    }

    #[test]
    fn parse_rejects_bad_time_of_day() {
        assert!(ResetSchedule::parse("00:00", 0).is_ok());
        let err = ResetSchedule::parse("25:00", 0).unwrap_err();
        assert!(err.to_string().contains("reset_time"));
    }

    #[test]
    fn minutes_until_never_drops_below_one() {
        assert_eq!(minutes_until(at(1, 10, 0, 0), at(1, 10, 30, 0)), 30);
        assert_eq!(minutes_until(at(1, 10, 0, 0), at(1, 10, 0, 20)), 1);
        assert_eq!(minutes_until(at(1, 10, 0, 0), at(1, 9, 0, 0)), 1);
    }
}
