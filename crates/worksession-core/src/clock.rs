//! Wall-clock source for the session controller.
//!
//! The controller never counts ticks; every remaining-time value is derived
//! from two instants read through a [`Clock`]. Tests and simulations inject a
//! [`ManualClock`].

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::error::ClockSkewError;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same instant, so a test can keep one handle and give
/// another to the controller.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Clock starting at the current system time.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    pub fn set(&self, at: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }

    /// Move the clock backwards, as a user adjusting the device clock would.
    pub fn rewind(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now -= by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Milliseconds from `from` to `to`.
///
/// # Errors
/// Returns [`ClockSkewError`] when `to` is earlier than `from`.
pub fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<u64, ClockSkewError> {
    let delta = (to - from).num_milliseconds();
    if delta < 0 {
        Err(ClockSkewError {
            behind_ms: delta.unsigned_abs(),
        })
    } else {
        Ok(delta as u64)
    }
}

/// Convert a millisecond count into a chrono duration, saturating on overflow.
pub(crate) fn ms_to_duration(ms: u64) -> Duration {
    Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::starting_now();
        let other = clock.clone();
        let t0 = clock.now();
        other.advance_secs(30);
        assert_eq!(clock.now() - t0, Duration::seconds(30));
    }

    #[test]
    fn elapsed_forward() {
        let t0 = Utc::now();
        assert_eq!(elapsed_ms(t0, t0 + Duration::milliseconds(1500)), Ok(1500));
        assert_eq!(elapsed_ms(t0, t0), Ok(0));
    }

    #[test]
    fn elapsed_backwards_is_skew() {
        let t0 = Utc::now();
        let err = elapsed_ms(t0, t0 - Duration::seconds(2)).unwrap_err();
        assert_eq!(err.behind_ms, 2000);
    }
}
