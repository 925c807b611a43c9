//! Fixed-window rate limiter over the store's shared counters.
//!
//! Windows are aligned to the Unix epoch, so every process sharing a store
//! agrees on which window a hit belongs to without any coordination.

use crate::store::LedgerStore;
use crate::LedgerError;
use chrono::{DateTime, TimeZone, Utc};

/// Allow at most `max_per_window` hits per bucket per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindowLimiter {
    max_per_window: u64,
    window_secs: i64,
}

impl FixedWindowLimiter {
    /// Create a limiter. `window_secs` below one is treated as one.
    pub fn new(max_per_window: u64, window_secs: i64) -> Self {
        Self {
            max_per_window,
            window_secs: window_secs.max(1),
        }
    }

    /// Start of the window containing `now`.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let secs = now.timestamp();
        let start = secs - secs.rem_euclid(self.window_secs);
        Utc.timestamp_opt(start, 0).single().unwrap_or(now)
    }

    /// Count a hit against `bucket`.
    ///
    /// Returns the hit number within the window, or `RateLimited` with the
    /// seconds until the window rolls over.
    pub fn hit(
        &self,
        store: &dyn LedgerStore,
        bucket: &str,
        now: DateTime<Utc>,
    ) -> Result<u64, LedgerError> {
        let start = self.window_start(now);
        let count = store.hit_counter(bucket, start)?;
        if count > self.max_per_window {
            let retry_after_secs = (start.timestamp() + self.window_secs - now.timestamp()).max(1);
            tracing::debug!(bucket, count, retry_after_secs, "rate limited");
            return Err(LedgerError::RateLimited { retry_after_secs });
        }
        Ok(count)
    }
}
