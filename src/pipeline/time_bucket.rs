//! Hourly time-bucket admission policy
//!
//! Snapshots are expected once per hour, at the top of the hour. Feeds jitter,
//! so a snapshot is "on schedule" when it lands inside
//! `[hh:00 - earlier, hh:00 + later]`. Two admitted snapshots of the same
//! market must sit roughly an hour apart once both tolerances are accounted for.

use super::types::MarketSnapshot;
use chrono::{DateTime, Duration, Utc};

const SECONDS_PER_HOUR: i64 = 3_600;

pub const DEFAULT_EARLIER_TOLERANCE_MINUTES: u32 = 5;
pub const DEFAULT_LATER_TOLERANCE_MINUTES: u32 = 10;

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Admit,
    /// Candidate is outside every hourly acceptance window
    NotAligned,
    /// Candidate is within the dedup window of the last stored snapshot
    TooClose { offset_minutes: f64 },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admit)
    }
}

/// Acceptance window around each hour boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBucketPolicy {
    pub earlier_tolerance_minutes: u32,
    pub later_tolerance_minutes: u32,
}

impl Default for TimeBucketPolicy {
    fn default() -> Self {
        Self {
            earlier_tolerance_minutes: DEFAULT_EARLIER_TOLERANCE_MINUTES,
            later_tolerance_minutes: DEFAULT_LATER_TOLERANCE_MINUTES,
        }
    }
}

impl TimeBucketPolicy {
    pub fn new(earlier_tolerance_minutes: u32, later_tolerance_minutes: u32) -> Self {
        Self {
            earlier_tolerance_minutes,
            later_tolerance_minutes,
        }
    }

    /// True if `timestamp` is within tolerance of some hour boundary
    pub fn is_aligned(&self, timestamp: DateTime<Utc>) -> bool {
        let into_hour = timestamp.timestamp().rem_euclid(SECONDS_PER_HOUR);
        let before_next_hour = SECONDS_PER_HOUR - into_hour;

        into_hour <= i64::from(self.later_tolerance_minutes) * 60
            || before_next_hour <= i64::from(self.earlier_tolerance_minutes) * 60
    }

    /// Decide whether `candidate` may be stored given the newest stored
    /// snapshot of the same market
    pub fn should_admit(
        &self,
        candidate: &MarketSnapshot,
        last_stored: Option<&MarketSnapshot>,
    ) -> Admission {
        if !self.is_aligned(candidate.updated) {
            return Admission::NotAligned;
        }

        let Some(last) = last_stored else {
            return Admission::Admit;
        };

        let offset_minutes =
            (candidate.updated - last.updated).num_seconds() as f64 / 60.0;
        let required = 60.0 - f64::from(self.earlier_tolerance_minutes);

        if offset_minutes + f64::from(self.later_tolerance_minutes) >= required {
            Admission::Admit
        } else {
            Admission::TooClose { offset_minutes }
        }
    }

    /// Padding added to retrieval windows so a snapshot stored slightly
    /// before the hour is not missed
    pub fn window_padding(&self) -> Duration {
        Duration::minutes(i64::from(self.earlier_tolerance_minutes))
    }

    /// Lower bound of a nominal "last `hours` hours" window
    ///
    /// Saturates at the earliest representable instant for very large `hours`.
    pub fn window_start(&self, now: DateTime<Utc>, hours: u32) -> DateTime<Utc> {
        let span = Duration::hours(i64::from(hours)) + self.window_padding();
        now.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}
