//! The task-level state machine exposed to the control plane (spec §4.1).

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// The reason a task reached a terminal state via `failed()`.
///
/// "First cause wins" (spec §4.1): once a task is `FAILED`, subsequent
/// `failed()` calls are recorded nowhere and do not overwrite this.
#[derive(Debug, Clone)]
pub struct FailureCause(pub String);

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A task's lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Pipelines installed, no driver has run yet.
    Planned,
    /// Drivers are actively being scheduled.
    Running,
    /// All drivers finished; waiting for the output buffer to drain.
    Flushing,
    /// All drivers finished and the output buffer finished. Terminal.
    Finished,
    /// Cancelled by the control plane. Terminal.
    Canceled,
    /// Aborted by the control plane. Terminal.
    Aborted,
    /// A driver, the output buffer, or an internal invariant failed.
    /// Terminal. Carries the first recorded cause.
    Failed(FailureCause),
}

impl TaskState {
    /// True for the four terminal states.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished | Self::Canceled | Self::Aborted | Self::Failed(_)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Planned => write!(f, "PLANNED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Flushing => write!(f, "FLUSHING"),
            Self::Finished => write!(f, "FINISHED"),
            Self::Canceled => write!(f, "CANCELED"),
            Self::Aborted => write!(f, "ABORTED"),
            Self::Failed(cause) => write!(f, "FAILED({cause})"),
        }
    }
}

type Listener = Box<dyn Fn(TaskState) + Send + Sync>;

/// Single-writer FSM over [`TaskState`] (spec §4.1).
///
/// Transitions are monotone and terminal states absorb everything after
/// them: once terminal, every mutating method becomes a no-op and no
/// listener fires a second time. Listener dispatch happens after the
/// internal lock is released, so a listener may safely call back into this
/// machine (e.g. to read the new state) without deadlocking.
pub struct TaskStateMachine {
    state: Mutex<TaskState>,
    listeners: Mutex<Vec<Listener>>,
}

impl TaskStateMachine {
    /// Creates a machine starting in `PLANNED`.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TaskState::Planned),
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// The current state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.state.lock().clone()
    }

    /// Registers a listener invoked on every subsequent transition,
    /// including the one that reaches a terminal state. Does not fire for
    /// the current state at registration time.
    pub fn add_state_listener(&self, listener: Listener) {
        self.listeners.lock().push(listener);
    }

    /// `PLANNED -> RUNNING`. No-op outside `PLANNED`.
    pub fn start(&self) {
        self.transition_if(|s| *s == TaskState::Planned, TaskState::Running);
    }

    /// `RUNNING -> FLUSHING`. No-op outside `RUNNING`.
    pub fn flush(&self) {
        self.transition_if(|s| *s == TaskState::Running, TaskState::Flushing);
    }

    /// `RUNNING | FLUSHING -> FINISHED`. No-op from any other state.
    pub fn finish(&self) {
        self.transition_if(
            |s| matches!(s, TaskState::Running | TaskState::Flushing),
            TaskState::Finished,
        );
    }

    /// Any non-terminal state `-> CANCELED`.
    pub fn cancel(&self) {
        self.transition_if(|s| !s.is_terminal(), TaskState::Canceled);
    }

    /// Any non-terminal state `-> ABORTED`.
    pub fn abort(&self) {
        self.transition_if(|s| !s.is_terminal(), TaskState::Aborted);
    }

    /// Any non-terminal state `-> FAILED(cause)`. If the task is already
    /// `FAILED`, the existing cause is kept ("first cause wins") and no
    /// listener fires.
    pub fn failed(&self, cause: impl Into<String>) {
        let cause = FailureCause(cause.into());
        self.transition_if(|s| !s.is_terminal(), TaskState::Failed(cause));
    }

    fn transition_if(&self, predicate: impl FnOnce(&TaskState) -> bool, new_state: TaskState) {
        let fired = {
            let mut state = self.state.lock();
            if predicate(&state) {
                *state = new_state.clone();
                true
            } else {
                false
            }
        };
        if fired {
            let listeners = self.listeners.lock();
            for listener in listeners.iter() {
                listener(new_state.clone());
            }
        }
    }
}

impl Default for TaskStateMachine {
    fn default() -> Self {
        Self {
            state: Mutex::new(TaskState::Planned),
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl fmt::Debug for TaskStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskStateMachine").field("state", &self.state()).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn happy_path_transitions() {
        let machine = TaskStateMachine::new();
        machine.start();
        assert_eq!(machine.state(), TaskState::Running);
        machine.flush();
        assert_eq!(machine.state(), TaskState::Flushing);
        machine.finish();
        assert_eq!(machine.state(), TaskState::Finished);
    }

    #[test]
    fn running_can_finish_directly_without_flushing() {
        let machine = TaskStateMachine::new();
        machine.start();
        machine.finish();
        assert_eq!(machine.state(), TaskState::Finished);
    }

    #[test]
    fn terminal_states_absorb_further_transitions() {
        let machine = TaskStateMachine::new();
        machine.start();
        machine.cancel();
        assert_eq!(machine.state(), TaskState::Canceled);
        machine.abort();
        assert_eq!(machine.state(), TaskState::Canceled);
        machine.finish();
        assert_eq!(machine.state(), TaskState::Canceled);
    }

    #[test]
    fn failed_first_cause_wins() {
        let machine = TaskStateMachine::new();
        machine.start();
        machine.failed("disk error");
        machine.failed("a different, later error");
        match machine.state() {
            TaskState::Failed(cause) => assert_eq!(cause.0, "disk error"),
            other => panic!("expected Failed, got {other}"),
        }
    }

    #[test]
    fn listeners_fire_once_per_transition_not_for_noops() {
        let machine = TaskStateMachine::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        machine.add_state_listener(Box::new(move |_state| {
            count_clone.fetch_add(1, Ordering::Relaxed);
        }));
        machine.start();
        machine.cancel();
        machine.cancel();
        machine.abort();
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn planned_can_go_straight_to_terminal() {
        let machine = TaskStateMachine::new();
        machine.failed("never started");
        assert!(machine.state().is_terminal());
    }
}
