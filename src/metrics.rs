//! Provides lock free counters which describe the activity of a façade.
//!
//! All metrics are internally mutable without needing a mutable reference as we rely on atomic
//! intrinsics. They are therefore cheap enough to be updated on every call.
//!
//! # Example
//!
//! ```
//! # use callisto::metrics::Average;
//! let avg = Average::new();
//! avg.add(10);
//! avg.add(20);
//! avg.add(30);
//!
//! assert_eq!(avg.avg(), 20);
//! assert_eq!(avg.count(), 3);
//! ```
use std::fmt;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::fmt::format_micros;

/// A simple monotonic counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Increments the counter by one.
    pub fn inc(&self) {
        let _ = self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Computes the average of all recorded values.
///
/// Both, the sum and the count are tracked in separate atomics. A reader might therefore observe
/// a sum which is one value ahead of the count - which is perfectly fine for monitoring
/// purposes. Note that the sum wraps around gracefully instead of panicking.
#[derive(Debug, Default)]
pub struct Average {
    sum: AtomicU64,
    count: AtomicU64,
}

impl Average {
    /// Creates a new average.
    pub fn new() -> Average {
        Average::default()
    }

    /// Records another value.
    pub fn add(&self, value: u64) {
        let _ = self.sum.fetch_add(value, Ordering::Relaxed);
        let _ = self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of recorded values.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Returns the average of all recorded values or 0 if nothing was recorded yet.
    pub fn avg(&self) -> u64 {
        match self.count() {
            0 => 0,
            count => self.sum.load(Ordering::Relaxed) / count,
        }
    }
}

impl Display for Average {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        format_micros(self.avg(), f)?;
        write!(f, " ({})", self.count())
    }
}

/// Measures the time elapsed since its creation.
pub struct Watch {
    start: Instant,
}

impl Watch {
    /// Starts a new watch.
    pub fn start() -> Watch {
        Watch {
            start: Instant::now(),
        }
    }

    /// Returns the number of microseconds since the watch was started.
    pub fn micros(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

/// Describes the activity of a [SingleFlightCache](crate::cache::SingleFlightCache).
#[derive(Debug, Default)]
pub struct CacheMetrics {
    /// Reads which were answered from the cache.
    pub hits: Counter,

    /// Reads which had to consult the provider.
    pub misses: Counter,

    /// Failed provider loads.
    pub load_failures: Counter,

    /// Provider stores (successful or not).
    pub stores: Counter,

    /// Failed provider stores.
    pub store_failures: Counter,

    /// The duration of provider calls in microseconds.
    pub provider_latency: Average,
}

impl CacheMetrics {
    /// Returns the percentage of reads which were answered from the cache.
    pub fn hit_rate(&self) -> f32 {
        let hits = self.hits.get();
        let reads = hits + self.misses.get();
        if reads == 0 {
            0.
        } else {
            hits as f32 / reads as f32 * 100.
        }
    }
}

impl Display for CacheMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Reads:          {} ({:.1} % hits)",
            self.hits.get() + self.misses.get(),
            self.hit_rate()
        )?;
        writeln!(f, "Load failures:  {}", self.load_failures.get())?;
        writeln!(
            f,
            "Writes:         {} ({} failed)",
            self.stores.get(),
            self.store_failures.get()
        )?;
        writeln!(f, "Provider calls: {}", self.provider_latency)
    }
}

/// Describes the activity of a [ThrottlingService](crate::throttle::ThrottlingService).
#[derive(Debug, Default)]
pub struct ThrottleMetrics {
    /// Calls which were passed on to the inner service.
    pub admitted: Counter,

    /// Calls which were rejected as the client was banned.
    pub rejected_banned: Counter,

    /// Calls which were rejected as they exceeded the limit (each one issued a ban).
    pub rejected_limit: Counter,
}

impl Display for ThrottleMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Admitted:       {}", self.admitted.get())?;
        writeln!(f, "Bans issued:    {}", self.rejected_limit.get())?;
        writeln!(f, "Banned calls:   {}", self.rejected_banned.get())
    }
}
