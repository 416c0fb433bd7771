use crate::error::AppError;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Tolerance for request latency: a start instant may lag `now` by up to a
/// minute and still count as "not in the past".
const GRACE_SECONDS: i64 = 60;

/// Half-open interval `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeSlot {
    /// Build a validated slot from the wire format: a `YYYY-MM-DD` date, an
    /// `HH:MM` time of day and a duration in minutes.
    ///
    /// The date and time fields are taken as UTC components directly; no
    /// client timezone is modelled. Duration must be a positive multiple of
    /// 30 minutes, and the start may not lie more than [`GRACE_SECONDS`]
    /// behind `now`.
    pub fn from_request(
        date: &str,
        time: &str,
        duration_minutes: i64,
        now: DateTime<Utc>,
    ) -> Result<Self, AppError> {
        if duration_minutes <= 0 || duration_minutes % 30 != 0 {
            return Err(AppError::InvalidDuration);
        }

        let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .map_err(|e| AppError::MalformedPayload(format!("invalid date {date:?}: {e}")))?;
        let time = NaiveTime::parse_from_str(time, "%H:%M")
            .map_err(|e| AppError::MalformedPayload(format!("invalid time {time:?}: {e}")))?;
        let start = date.and_time(time).and_utc();

        if start < now - Duration::seconds(GRACE_SECONDS) {
            return Err(AppError::PastReservation);
        }

        let duration = Duration::try_minutes(duration_minutes).ok_or(AppError::InvalidDuration)?;
        let end = start
            .checked_add_signed(duration)
            .ok_or(AppError::InvalidDuration)?;

        Ok(Self { start, end })
    }

    /// Standard half-open intersection test: `[s1,e1)` and `[s2,e2)` overlap
    /// iff `s1 < e2 && s2 < e1`. Back-to-back slots do not overlap.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}
