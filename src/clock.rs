//! Deterministic clock abstraction for testable time-dependent logic.

use crate::LedgerError;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};

/// Clock trait for deterministic time in tests.
pub trait Clock: Send + Sync {
    /// Get the current UTC time.
    fn now_utc(&self) -> DateTime<Utc>;
}

/// System clock using actual wall time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Calendar date of `instant` in the business timezone.
///
/// Offsets outside the representable range fall back to UTC.
pub fn business_date(instant: DateTime<Utc>, utc_offset_minutes: i32) -> NaiveDate {
    match FixedOffset::east_opt(utc_offset_minutes * 60) {
        Some(offset) => instant.with_timezone(&offset).date_naive(),
        None => instant.date_naive(),
    }
}

/// Whole calendar days between the business dates of two instants.
///
/// Time of day is ignored: anything earlier "yesterday" is one day ago.
pub fn calendar_days_between(
    earlier: DateTime<Utc>,
    later: DateTime<Utc>,
    utc_offset_minutes: i32,
) -> i64 {
    let start = business_date(earlier, utc_offset_minutes);
    let end = business_date(later, utc_offset_minutes);
    (end - start).num_days()
}

/// `instant` moved forward by `days` whole days.
///
/// Fails with `InvalidRequest` instead of overflowing the date range.
pub fn add_days(instant: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>, LedgerError> {
    Duration::try_days(days)
        .and_then(|delta| instant.checked_add_signed(delta))
        .ok_or_else(|| LedgerError::InvalidRequest(format!("{} days is out of range", days)))
}

/// Days left until `expires_at`, rounded up, never below 1.
pub fn days_left_ceil(now: DateTime<Utc>, expires_at: DateTime<Utc>) -> i64 {
    let millis = (expires_at - now).num_milliseconds();
    let day = Duration::days(1).num_milliseconds();
    let days = if millis <= 0 {
        0
    } else {
        (millis + day - 1) / day
    };
    days.max(1)
}

/// Mock clock for deterministic testing.
///
/// The frozen instant sits behind a lock so a clock shared through
/// `Arc<dyn Clock>` can still be advanced by the test.
#[cfg(any(test, feature = "test-seams"))]
#[derive(Debug)]
pub struct MockClock {
    now: std::sync::RwLock<DateTime<Utc>>,
}

#[cfg(any(test, feature = "test-seams"))]
impl MockClock {
    /// Create a mock clock frozen at the given time.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::RwLock::new(now),
        }
    }

    /// Create a mock clock from an RFC 3339 string.
    pub fn from_rfc3339(s: &str) -> Self {
        Self::new(
            DateTime::parse_from_rfc3339(s)
                .expect("valid RFC 3339")
                .with_timezone(&Utc),
        )
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.write().expect("mock clock lock");
        *now += duration;
    }

    /// Jump to an absolute instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.write().expect("mock clock lock") = instant;
    }
}

#[cfg(any(test, feature = "test-seams"))]
impl Clock for MockClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.read().expect("mock clock lock")
    }
}
