//! Time source for delay and lease scores.
//!
//! Scores are Unix seconds with millisecond precision. The clock is
//! injectable so lease expiry can be exercised without sleeping.

use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += chrono::Duration::milliseconds(by.as_millis() as i64);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Score for a point in time.
pub fn score(at: DateTime<Utc>) -> f64 {
    at.timestamp_millis() as f64 / 1000.0
}

/// Score for `now + offset`.
pub fn score_after(clock: &dyn Clock, offset: Duration) -> f64 {
    score(clock.now()) + offset.as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let clock = ManualClock::new(start);

        clock.advance(Duration::from_millis(1500));

        assert_eq!(score(clock.now()), 1_700_000_001.5);
        assert_eq!(score_after(&clock, Duration::from_secs(60)), 1_700_000_061.5);
    }
}
