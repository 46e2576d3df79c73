//! Atomic backpressure signal shared between the output buffer and the
//! executor's concurrency-adjustment heuristic.
//!
//! [`BufferPressure`] carries an atomic utilization value (0.0-1.0) that can
//! be read lock-free from any thread. The conductor updates it whenever the
//! output buffer's `utilization()` changes; the executor's admission
//! adjuster samples it on every `split_concurrency_adjustment_interval` tick
//! without ever taking a lock.

use std::sync::atomic::{AtomicU32, Ordering};

/// Lock-free utilization gauge in `[0.0, 1.0]`.
///
/// `0.0` means the output buffer is empty (raise concurrency); `1.0` means
/// it is full (lower concurrency). See [`crate::executor`]'s
/// concurrency-adjustment policy for how this drives the per-task cap.
#[derive(Debug)]
pub struct BufferPressure {
    utilization_bits: AtomicU32,
}

impl BufferPressure {
    /// Creates a pressure gauge starting at zero utilization (empty buffer).
    #[must_use]
    pub fn new() -> Self {
        Self {
            utilization_bits: AtomicU32::new(0.0_f32.to_bits()),
        }
    }

    /// Reads the current utilization.
    ///
    /// Uses `Relaxed` ordering: a slightly stale read is fine for an
    /// advisory backpressure signal, and the value is always a valid
    /// `f32` in `[0.0, 1.0]`.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        f64::from(f32::from_bits(self.utilization_bits.load(Ordering::Relaxed)))
    }

    /// Updates the utilization value, clamped to `[0.0, 1.0]`.
    pub fn set_utilization(&self, value: f64) {
        let clamped = value.clamp(0.0, 1.0) as f32;
        self.utilization_bits
            .store(clamped.to_bits(), Ordering::Relaxed);
    }

    /// True when utilization is below `low_watermark` (raise concurrency
    /// candidate).
    #[must_use]
    pub fn is_low(&self, low_watermark: f64) -> bool {
        self.utilization() < low_watermark
    }

    /// True when utilization is above `high_watermark` (lower concurrency
    /// candidate).
    #[must_use]
    pub fn is_high(&self, high_watermark: f64) -> bool {
        self.utilization() > high_watermark
    }
}

impl Default for BufferPressure {
    fn default() -> Self {
        Self::new()
    }
}
