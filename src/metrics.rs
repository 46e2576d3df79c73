//! Counters and gauges for task-execution observability.
//!
//! Modeled on the teacher repo's `observability::metrics` types, adapted to
//! be lock-free and shareable across worker and notification threads
//! (metrics here are updated from completion callbacks that never run on
//! the thread that owns a `&mut` reference to anything).

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Creates a counter starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Increments the counter by the given amount.
    pub fn increment(&self, amount: u64) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    /// Increments the counter by 1.
    pub fn inc(&self) {
        self.increment(1);
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// A gauge that can increase or decrease.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    /// Creates a gauge starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current value.
    #[must_use]
    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Sets the gauge to an absolute value.
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Increments the gauge by the given amount.
    pub fn increment(&self, amount: i64) {
        self.value.fetch_add(amount, Ordering::Relaxed);
    }

    /// Decrements the gauge by the given amount.
    pub fn decrement(&self, amount: i64) {
        self.value.fetch_sub(amount, Ordering::Relaxed);
    }
}

impl fmt::Display for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value())
    }
}

/// The metrics a single task's conductor exposes to the control plane.
///
/// This is the concrete realization of "emit a split-completed metric
/// event" / "emit a split-failed metric event" from the driver-runner
/// completion callback (spec §4.5.4): rather than a generic event bus, the
/// conductor holds one of these and the callbacks increment it directly.
#[derive(Debug, Default)]
pub struct TaskMetrics {
    /// Count of driver runners that completed successfully.
    pub splits_completed: Counter,
    /// Count of driver runners whose future failed.
    pub splits_failed: Counter,
    /// Current value of `status.overall_remaining_driver`.
    pub remaining_drivers: Gauge,
    /// Current output buffer utilization, as a permille (0-1000) integer so
    /// it fits a plain gauge; see [`crate::pressure::BufferPressure`] for the
    /// floating-point version used internally by the executor.
    pub buffer_utilization_permille: Gauge,
}

impl TaskMetrics {
    /// Creates an all-zero metrics snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successfully completed split-runner.
    pub fn record_split_completed(&self) {
        self.splits_completed.inc();
    }

    /// Records a failed split-runner.
    pub fn record_split_failed(&self) {
        self.splits_failed.inc();
    }

    /// Updates the buffer-utilization gauge from a `[0.0, 1.0]` reading.
    pub fn set_buffer_utilization(&self, utilization: f64) {
        self.buffer_utilization_permille
            .set((utilization.clamp(0.0, 1.0) * 1000.0).round() as i64);
    }
}
