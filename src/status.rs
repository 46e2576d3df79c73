//! Task-wide and per-pipeline driver accounting (spec §3, §4.3).
//!
//! [`Status`] is the conductor's single source of truth for "is there still
//! work that could produce a driver in the future". It exists purely to
//! answer that question cheaply from [`crate::execution`]'s completion
//! check without walking the driver roster.

use std::collections::HashMap;

use qtask_types::{PipelineId, TaskId};

use crate::error::{TaskError, TaskResult};

/// Per-pipeline driver-runner bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct PerPipelineStatus {
    pending_creation: i32,
    no_more_driver_runners: bool,
}

impl PerPipelineStatus {
    /// Drivers currently under construction for this pipeline (counted
    /// from the start of `create_driver_runner` to the point the driver is
    /// handed to the executor).
    #[must_use]
    pub const fn pending_creation(&self) -> i32 {
        self.pending_creation
    }

    /// True once this pipeline's factory has latched "no more driver
    /// runners will ever be created".
    #[must_use]
    pub const fn no_more_driver_runners(&self) -> bool {
        self.no_more_driver_runners
    }
}

/// Task-wide driver accounting.
///
/// `overall_remaining_driver` is the number of drivers that exist but have
/// not yet reported completion; it is the quantity
/// [`crate::execution::SqlTaskExecution::check_task_completion`] watches
/// for reaching zero.
#[derive(Debug)]
pub struct Status {
    overall_remaining_driver: i32,
    pipelines_with_no_more_driver_runners: i32,
    per_pipeline: HashMap<PipelineId, PerPipelineStatus>,
    pipeline_with_task_lifecycle_count: i32,
}

impl Status {
    /// Seeds a status for every pipeline id in the compiled plan.
    ///
    /// `pipeline_with_task_lifecycle_count` is the number of pipelines
    /// driven by `schedule_drivers_for_task_lifecycle` rather than by
    /// incoming splits; it bounds how many pipelines can ever latch
    /// `no_more_driver_runners` without any split-lifecycle source existing.
    #[must_use]
    pub fn new(
        pipeline_ids: impl IntoIterator<Item = PipelineId>,
        pipeline_with_task_lifecycle_count: i32,
    ) -> Self {
        let per_pipeline = pipeline_ids
            .into_iter()
            .map(|id| (id, PerPipelineStatus::default()))
            .collect();
        Self {
            overall_remaining_driver: 0,
            pipelines_with_no_more_driver_runners: 0,
            per_pipeline,
            pipeline_with_task_lifecycle_count,
        }
    }

    /// Current count of drivers that exist but have not yet completed.
    #[must_use]
    pub const fn overall_remaining_driver(&self) -> i32 {
        self.overall_remaining_driver
    }

    /// Count of pipelines that have latched `no_more_driver_runners`.
    #[must_use]
    pub const fn pipelines_with_no_more_driver_runners(&self) -> i32 {
        self.pipelines_with_no_more_driver_runners
    }

    /// The fixed count of task-lifecycle pipelines this status was seeded
    /// with.
    #[must_use]
    pub const fn pipeline_with_task_lifecycle_count(&self) -> i32 {
        self.pipeline_with_task_lifecycle_count
    }

    /// Per-pipeline status, if `pipeline_id` was part of the compiled plan.
    #[must_use]
    pub fn per_pipeline(&self, pipeline_id: PipelineId) -> Option<&PerPipelineStatus> {
        self.per_pipeline.get(&pipeline_id)
    }

    /// Marks one more driver construction in flight for `pipeline_id`.
    pub fn increment_pending_creation(&mut self, pipeline_id: PipelineId) {
        self.per_pipeline.entry(pipeline_id).or_default().pending_creation += 1;
    }

    /// Marks a driver construction for `pipeline_id` as complete.
    pub fn decrement_pending_creation(&mut self, pipeline_id: PipelineId) {
        let entry = self.per_pipeline.entry(pipeline_id).or_default();
        entry.pending_creation -= 1;
    }

    /// Latches `no_more_driver_runners` for `pipeline_id`. Idempotent.
    pub fn set_no_more_driver_runners(&mut self, pipeline_id: PipelineId) {
        let entry = self.per_pipeline.entry(pipeline_id).or_default();
        if !entry.no_more_driver_runners {
            entry.no_more_driver_runners = true;
            self.pipelines_with_no_more_driver_runners += 1;
        }
    }

    /// Accounts for one more live (not-yet-completed) driver.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Internal`] if every task-lifecycle pipeline has
    /// already latched `no_more_driver_runners` — a task with no
    /// split-lifecycle source can never legitimately create a driver after
    /// that point, so this indicates a bug in the caller.
    pub fn increment_remaining_driver(&mut self, pipeline_id: PipelineId) -> TaskResult<()> {
        if self.pipeline_with_task_lifecycle_count > 0
            && self.pipelines_with_no_more_driver_runners >= self.pipeline_with_task_lifecycle_count
            && self.per_pipeline.values().all(PerPipelineStatus::no_more_driver_runners)
        {
            return Err(TaskError::Internal(format!(
                "attempted to create a driver for {pipeline_id} after every pipeline \
                 latched no_more_driver_runners"
            )));
        }
        self.overall_remaining_driver += 1;
        Ok(())
    }

    /// Accounts for one driver completing (successfully or not).
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NegativeRemainingDriver`] if this would take
    /// the count below zero, which can only happen if a completion
    /// callback fired twice for the same runner.
    pub fn decrement_remaining_driver(&mut self, task_id: &TaskId) -> TaskResult<()> {
        if self.overall_remaining_driver == 0 {
            return Err(TaskError::NegativeRemainingDriver(task_id.clone()));
        }
        self.overall_remaining_driver -= 1;
        Ok(())
    }
}
