//! Crate-wide error taxonomy.
//!
//! Every failure path named in the task lifecycle surfaces as a
//! [`TaskError`] variant. There is no retry ladder inside this crate: a
//! driver failure or a buffer failure propagates synchronously to the
//! [`TaskStateMachine`](crate::state_machine::TaskStateMachine) and nothing
//! downstream swallows it.

use qtask_types::{PlanNodeId, TaskId};

/// Convenience alias for results produced by this crate's public API.
pub type TaskResult<T> = Result<T, TaskError>;

/// The crate's error type.
///
/// Errors fall into three buckets: control-plane misuse (duplicate task id,
/// operating on a terminal task), protocol violations by a split producer
/// (adding a split after `no_more_splits`), and internal invariant
/// violations that indicate a bug in this crate rather than caller misuse.
#[derive(Debug, thiserror::Error, Clone)]
pub enum TaskError {
    /// `create_task` was called with a task id that is already registered.
    #[error("task {0} already exists")]
    DuplicateTaskId(TaskId),

    /// An operation was attempted on a task that has already reached a
    /// terminal state.
    #[error("task {0} is already terminal")]
    TaskTerminal(TaskId),

    /// A split was added to a plan node whose pending-splits queue has
    /// already been marked `NO_MORE` or `FINISHED`.
    #[error("plan node {plan_node} is no longer accepting splits")]
    SplitAfterNoMore {
        /// The plan node that rejected the write.
        plan_node: PlanNodeId,
    },

    /// `overall_remaining_driver` would have gone negative. This can only
    /// happen if a completion callback fired more than once for the same
    /// runner, which is itself a scheduler bug.
    #[error("remaining driver count would go negative for task {0}")]
    NegativeRemainingDriver(TaskId),

    /// The output buffer transitioned to `FAILED`.
    #[error("output buffer failed: {0}")]
    BufferFailed(String),

    /// The output buffer reached `ABORTED` without a corresponding
    /// task-level abort driving it. Treated as an internal error per the
    /// open question recorded in `DESIGN.md`.
    #[error("output buffer aborted without a task-level abort")]
    BufferAborted,

    /// An invariant the conductor relies on was violated. This is always a
    /// bug in this crate or in a caller that bypassed the documented
    /// contract (e.g. calling `add_split_assignments` while holding the
    /// conductor's lock). Fails fast: the task transitions to `FAILED`, it
    /// does not attempt to continue.
    #[error("internal invariant violation: {0}")]
    Internal(String),
}

impl TaskError {
    /// Returns a synthetic cause for a buffer that reports `FAILED` without
    /// recording an underlying cause.
    #[must_use]
    pub fn buffer_cause_missing() -> Self {
        Self::BufferFailed("buffer reported FAILED with no recorded cause".to_string())
    }

    /// True for variants that represent a bug in this crate's own
    /// bookkeeping rather than a caller or collaborator misbehaving.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(
            self,
            Self::NegativeRemainingDriver(_) | Self::Internal(_) | Self::BufferAborted
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_task_id() {
        let id = TaskId::new("q", 0, 0, 0);
        let err = TaskError::DuplicateTaskId(id.clone());
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn buffer_cause_missing_is_a_buffer_failed_variant() {
        let err = TaskError::buffer_cause_missing();
        assert!(matches!(err, TaskError::BufferFailed(_)));
    }

    #[test]
    fn internal_classification() {
        assert!(TaskError::Internal("x".into()).is_internal());
        assert!(TaskError::BufferAborted.is_internal());
        assert!(!TaskError::BufferFailed("x".into()).is_internal());
    }
}
