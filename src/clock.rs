//! Provides the time source used by the [throttle](crate::throttle).
//!
//! All time based decisions (window resets and ban expirations) are made using an injected
//! [Clock]. In production, the [SystemClock] simply reports the current UTC time. Tests (or
//! simulations) use a [ManualClock] which only moves when told to.
//!
//! # Examples
//!
//! ```
//! # use callisto::clock::{Clock, ManualClock};
//! # use chrono::{DateTime, Utc};
//! # use std::time::Duration;
//! let clock = ManualClock::new(DateTime::<Utc>::UNIX_EPOCH);
//! assert_eq!(clock.now(), DateTime::<Utc>::UNIX_EPOCH);
//!
//! clock.advance(Duration::from_secs(90));
//! assert_eq!(clock.now().timestamp(), 90);
//! ```
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Supplies the current point in time.
pub trait Clock: Send + Sync {
    /// Returns the current instant in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// Reports the real wall clock time.
#[derive(Debug, Default, Copy, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Provides a clock which only moves when explicitly told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a new clock which reports the given instant until it is changed.
    pub fn new(now: DateTime<Utc>) -> Self {
        ManualClock {
            now: Mutex::new(now),
        }
    }

    /// Sets the current instant.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = now;
    }

    /// Moves the clock forward by the given duration.
    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now = plus(*now, duration);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Adds a std duration to an instant, saturating at the largest representable instant.
pub fn plus(instant: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| instant.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Computes the time elapsed between two instants.
///
/// If **later** is actually before **earlier** (e.g. a wall clock which has been set back), no
/// time has elapsed.
pub fn elapsed(earlier: DateTime<Utc>, later: DateTime<Utc>) -> Duration {
    (later - earlier).to_std().unwrap_or(Duration::ZERO)
}
