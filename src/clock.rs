//! Monotonic time source.
//!
//! The scheduler time-slices drivers and the executor samples elapsed time
//! for its concurrency-adjustment cadence; both need a clock that tests can
//! replace with a deterministic one. This mirrors the time-source seam the
//! teacher repo uses to support both wall-clock and virtual-time runtimes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A monotonic nanosecond clock.
///
/// Implementations must be monotonically non-decreasing; they need not be
/// wall-clock accurate. The executor and conductor only ever compare two
/// readings from the same clock instance.
pub trait Clock: Send + Sync {
    /// Returns the current time as nanoseconds since an arbitrary epoch.
    fn now_nanos(&self) -> u64;

    /// Returns the elapsed duration between an earlier reading and now.
    ///
    /// Saturates at zero if `since` is somehow in the future.
    fn elapsed_since(&self, since: u64) -> Duration {
        Duration::from_nanos(self.now_nanos().saturating_sub(since))
    }
}

/// Production clock backed by [`std::time::Instant`].
#[derive(Debug)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    /// Creates a new clock anchored to the moment of construction.
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_nanos(&self) -> u64 {
        let elapsed = self.epoch.elapsed();
        u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
    }
}

/// A manually-advanced clock for deterministic tests.
///
/// Every reading is an atomic load, so the clock can be shared across
/// worker threads in a test harness and advanced from the test's own
/// thread without synchronizing with the workers.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    /// Creates a manual clock starting at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nanos: AtomicU64::new(0),
        }
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Sets the clock to an absolute nanosecond reading.
    pub fn set(&self, nanos: u64) {
        self.nanos.store(nanos, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> u64 {
        self.nanos.load(Ordering::Relaxed)
    }
}
