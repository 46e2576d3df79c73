//! Per-task admission-control ticket (spec §4.6.1).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use qtask_types::TaskId;

use crate::config::TaskManagerConfig;
use crate::pressure::BufferPressure;

/// The executor's admission-control ticket for one task.
///
/// Bounds how many of a task's driver runners may be concurrently admitted
/// into the executor (dispatched for a slice or suspended awaiting wake) at
/// once. The cap starts at `initial_splits_per_node` and is adjusted by
/// [`super::TaskExecutor`]'s concurrency-adjustment loop, never exceeding
/// `max_drivers_per_task`.
pub struct TaskHandle {
    task_id: TaskId,
    cap: AtomicU32,
    max_drivers: u32,
    running: AtomicU32,
    pressure: Arc<BufferPressure>,
}

impl TaskHandle {
    /// Creates a handle seeded from the task manager configuration.
    #[must_use]
    pub fn new(task_id: TaskId, config: &TaskManagerConfig, pressure: Arc<BufferPressure>) -> Self {
        Self {
            task_id,
            cap: AtomicU32::new(config.initial_splits_per_node),
            max_drivers: config.max_drivers_per_task,
            running: AtomicU32::new(0),
            pressure,
        }
    }

    /// The task this handle tracks.
    #[must_use]
    pub const fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// The current concurrent-driver cap.
    #[must_use]
    pub fn cap(&self) -> u32 {
        self.cap.load(Ordering::Acquire)
    }

    /// The number of runners currently admitted (dispatched or suspended).
    #[must_use]
    pub fn running(&self) -> u32 {
        self.running.load(Ordering::Acquire)
    }

    /// The output-buffer pressure gauge this task's conductor updates.
    #[must_use]
    pub fn pressure(&self) -> &Arc<BufferPressure> {
        &self.pressure
    }

    /// Attempts to reserve one admission slot. Returns `true` on success.
    pub(crate) fn try_admit(&self) -> bool {
        loop {
            let current = self.running.load(Ordering::Acquire);
            let cap = self.cap.load(Ordering::Acquire);
            if current >= cap {
                return false;
            }
            if self
                .running
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Releases an admission slot held by a runner that has finished or
    /// been closed.
    pub(crate) fn release(&self) {
        self.running.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            Some(current.saturating_sub(1))
        })
        .ok();
    }

    /// Raises the cap by one, up to `max_drivers_per_task`. Returns `true`
    /// if the cap changed.
    pub fn raise_cap(&self) -> bool {
        loop {
            let current = self.cap.load(Ordering::Acquire);
            if current >= self.max_drivers {
                return false;
            }
            if self
                .cap
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Lowers the cap by one, down to 1. Returns `true` if the cap changed.
    pub fn lower_cap(&self) -> bool {
        loop {
            let current = self.cap.load(Ordering::Acquire);
            if current <= 1 {
                return false;
            }
            if self
                .cap
                .compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }
}
