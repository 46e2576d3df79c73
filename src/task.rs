//! `Task`: the registry the control plane actually calls into (spec §6).
//!
//! [`SqlTaskExecution`] is the conductor for one task's lifecycle; `Task`
//! is the thin, `Arc`-shared map from [`TaskId`] to conductor that lets a
//! coordinator create, look up, and drive many tasks without reaching past
//! this crate's public surface.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use qtask_types::{PlanNodeId, TaskId};

use crate::buffer::OutputBuffer;
use crate::error::{TaskError, TaskResult};
use crate::executor::TaskExecutor;
use crate::execution::{SqlTaskExecution, TaskPlan};
use crate::notify::NotificationExecutor;
use crate::state_machine::TaskState;

/// The control plane's entry point into this crate.
///
/// Wraps one [`TaskExecutor`] and [`NotificationExecutor`] shared by every
/// task it creates, plus a registry of live conductors keyed by
/// [`TaskId`]. A coordinator typically owns exactly one `Task` instance per
/// worker node.
pub struct Task {
    executor: Arc<TaskExecutor>,
    notification: Arc<NotificationExecutor>,
    conductors: Mutex<HashMap<TaskId, Arc<SqlTaskExecution>>>,
}

impl Task {
    /// Builds a registry backed by the given scheduler and callback
    /// dispatcher. Both are shared across every task this registry creates.
    #[must_use]
    pub fn new(executor: Arc<TaskExecutor>, notification: Arc<NotificationExecutor>) -> Self {
        Self {
            executor,
            notification,
            conductors: Mutex::new(HashMap::new()),
        }
    }

    /// Registers and starts a new task's conductor (spec §6).
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::DuplicateTaskId`] if `task_id` is already
    /// registered. The existing conductor is left untouched.
    pub fn create_task(
        &self,
        task_id: TaskId,
        plan: TaskPlan,
        output_buffer: Arc<dyn OutputBuffer>,
    ) -> TaskResult<Arc<SqlTaskExecution>> {
        let mut conductors = self.conductors.lock();
        if conductors.contains_key(&task_id) {
            return Err(TaskError::DuplicateTaskId(task_id));
        }
        let execution = SqlTaskExecution::new(
            task_id.clone(),
            plan,
            output_buffer,
            self.executor.clone(),
            self.notification.clone(),
        );
        conductors.insert(task_id, execution.clone());
        Ok(execution)
    }

    /// Looks up a previously created task's conductor.
    #[must_use]
    pub fn get_task(&self, task_id: &TaskId) -> Option<Arc<SqlTaskExecution>> {
        self.conductors.lock().get(task_id).cloned()
    }

    /// Merges newly delivered split assignments into `task_id` (spec §6).
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::TaskTerminal`] if the task does not exist or has
    /// already reached a terminal state; see
    /// [`SqlTaskExecution::add_split_assignments`] for the remaining error
    /// cases.
    pub fn add_split_assignments(
        &self,
        task_id: &TaskId,
        assignments: Vec<crate::split::SplitAssignment>,
    ) -> TaskResult<()> {
        let execution = self.get_task(task_id).ok_or_else(|| TaskError::TaskTerminal(task_id.clone()))?;
        execution.add_split_assignments(assignments)
    }

    /// Plan nodes `task_id` has fully delivered splits for (spec §6).
    #[must_use]
    pub fn get_no_more_splits(&self, task_id: &TaskId) -> Option<std::collections::HashSet<PlanNodeId>> {
        self.get_task(task_id).map(|execution| execution.no_more_splits())
    }

    /// `task_id`'s current lifecycle state (spec §6).
    #[must_use]
    pub fn get_state(&self, task_id: &TaskId) -> Option<TaskState> {
        self.get_task(task_id).map(|execution| execution.state())
    }

    /// Registers a listener fired on every subsequent state transition of
    /// `task_id` (spec §6). A no-op if `task_id` is unknown.
    pub fn add_state_listener(&self, task_id: &TaskId, listener: Box<dyn Fn(TaskState) + Send + Sync>) {
        if let Some(execution) = self.get_task(task_id) {
            execution.add_state_listener(listener);
        }
    }

    /// Cancels `task_id`. A no-op if `task_id` is unknown.
    pub fn cancel(&self, task_id: &TaskId) {
        if let Some(execution) = self.get_task(task_id) {
            execution.cancel();
        }
    }

    /// Aborts `task_id`. A no-op if `task_id` is unknown.
    pub fn abort(&self, task_id: &TaskId) {
        if let Some(execution) = self.get_task(task_id) {
            execution.abort();
        }
    }

    /// Fails `task_id` with the given cause. A no-op if `task_id` is
    /// unknown.
    pub fn fail(&self, task_id: &TaskId, cause: impl Into<String>) {
        if let Some(execution) = self.get_task(task_id) {
            execution.fail(cause);
        }
    }

    /// Drops the registry entry for a terminal task, releasing this
    /// registry's own strong reference to its conductor.
    ///
    /// The conductor may still be kept alive elsewhere (e.g. by a caller
    /// still holding the `Arc` returned from `create_task`); this only
    /// affects what `get_task` and friends can see.
    pub fn forget(&self, task_id: &TaskId) {
        self.conductors.lock().remove(task_id);
    }
}
