//! The round-robin ready queue: a ring of runnable tasks, each with its own
//! backlog (spec §4.6.1, §4.6.4).
//!
//! Grounded on the teacher's `runtime::scheduler::global_queue::GlobalQueue`
//! (a `crossbeam_queue::SegQueue`-backed FIFO) for the already-admitted
//! "ready" backlog, and on `runtime::scheduler::stealing::steal_task`'s
//! start-anywhere, scan-everyone shape for round-robin fairness across
//! tasks.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crossbeam_queue::SegQueue;
use parking_lot::{Mutex, RwLock};

use qtask_types::TaskId;

use super::SplitRunnable;

struct TaskBacklog {
    /// Runners not yet admitted into the concurrency cap. Protected by a
    /// mutex (rather than a lock-free queue) so a `pop_next` admission
    /// check-then-pop is atomic: no other caller can steal the head after
    /// admission succeeds.
    pending: Mutex<VecDeque<Arc<dyn SplitRunnable>>>,
    /// Runners already admitted and immediately dispatchable: re-entered
    /// here after a time slice that left them runnable, or after their
    /// suspension future resolved. No admission check needed to pop these.
    ready: SegQueue<Arc<dyn SplitRunnable>>,
}

impl TaskBacklog {
    fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            ready: SegQueue::new(),
        }
    }

    fn has_work(&self) -> bool {
        !self.ready.is_empty() || !self.pending.lock().is_empty()
    }
}

struct RingState {
    order: VecDeque<TaskId>,
    members: HashSet<TaskId>,
}

/// A global round-robin queue over per-task backlogs.
///
/// Every worker thread that wants work calls [`Self::pop_next`], which
/// scans at most once around the current ring of runnable tasks: each task
/// gets one opportunity to hand back a runnable before any task gets a
/// second (spec §4.6.4's no-starvation guarantee).
pub struct ReadyQueue {
    backlogs: RwLock<std::collections::HashMap<TaskId, Arc<TaskBacklog>>>,
    ring: Mutex<RingState>,
}

impl ReadyQueue {
    /// Creates an empty ready queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            backlogs: RwLock::new(std::collections::HashMap::new()),
            ring: Mutex::new(RingState {
                order: VecDeque::new(),
                members: HashSet::new(),
            }),
        }
    }

    /// Registers a new task's backlog. Must be called before any
    /// `push_pending`/`push_ready` for that task.
    pub fn register_task(&self, task_id: TaskId) {
        self.backlogs.write().insert(task_id, Arc::new(TaskBacklog::new()));
    }

    /// Removes a task's backlog and the ring entry, returning every runner
    /// still queued (neither running nor already completed) so the caller
    /// can close them.
    pub fn remove_task(&self, task_id: &TaskId) -> Vec<Arc<dyn SplitRunnable>> {
        let backlog = self.backlogs.write().remove(task_id);
        {
            let mut ring = self.ring.lock();
            ring.members.remove(task_id);
            ring.order.retain(|id| id != task_id);
        }
        let Some(backlog) = backlog else {
            return Vec::new();
        };
        let mut drained = Vec::new();
        while let Some(runnable) = backlog.ready.pop() {
            drained.push(runnable);
        }
        drained.extend(backlog.pending.lock().drain(..));
        drained
    }

    /// Pushes a freshly created runner that must pass the admission check
    /// before its first dispatch.
    pub fn push_pending(&self, task_id: &TaskId, runnable: Arc<dyn SplitRunnable>) {
        if let Some(backlog) = self.backlogs.read().get(task_id) {
            backlog.pending.lock().push_back(runnable);
            self.ensure_in_ring(task_id);
        }
    }

    /// Pushes a runner that is already admitted and immediately
    /// dispatchable again (end of a productive slice, or a suspension
    /// future just resolved).
    pub fn push_ready(&self, task_id: &TaskId, runnable: Arc<dyn SplitRunnable>) {
        if let Some(backlog) = self.backlogs.read().get(task_id) {
            backlog.ready.push(runnable);
            self.ensure_in_ring(task_id);
        }
    }

    /// True if `task_id` has at least one runner waiting for an admission
    /// slot. Used by the concurrency-adjustment loop to decide whether
    /// raising the cap would actually help.
    #[must_use]
    pub fn has_pending_backlog(&self, task_id: &TaskId) -> bool {
        self.backlogs
            .read()
            .get(task_id)
            .is_some_and(|backlog| !backlog.pending.lock().is_empty())
    }

    fn ensure_in_ring(&self, task_id: &TaskId) {
        let mut ring = self.ring.lock();
        if ring.members.insert(task_id.clone()) {
            ring.order.push_back(task_id.clone());
        }
    }

    /// Pops the next dispatchable `(task_id, runnable)` pair, preferring
    /// already-admitted "ready" work over admission-gated "pending" work
    /// for a given task, and rotating through at most one lap of the ring
    /// so no runnable task is skipped twice before an unserved one is
    /// served once.
    pub fn pop_next(&self, try_admit: impl Fn(&TaskId) -> bool) -> Option<(TaskId, Arc<dyn SplitRunnable>)> {
        let backlogs = self.backlogs.read();
        let mut ring = self.ring.lock();
        let attempts = ring.order.len();
        for _ in 0..attempts {
            let task_id = ring.order.pop_front()?;
            ring.members.remove(&task_id);
            let Some(backlog) = backlogs.get(&task_id) else {
                continue;
            };
            if let Some(runnable) = backlog.ready.pop() {
                if backlog.has_work() {
                    ring.members.insert(task_id.clone());
                    ring.order.push_back(task_id.clone());
                }
                return Some((task_id, runnable));
            }
            {
                let mut pending = backlog.pending.lock();
                if !pending.is_empty() && try_admit(&task_id) {
                    let runnable = pending.pop_front().expect("checked non-empty under lock");
                    drop(pending);
                    if backlog.has_work() {
                        ring.members.insert(task_id.clone());
                        ring.order.push_back(task_id.clone());
                    }
                    return Some((task_id, runnable));
                }
            }
            if backlog.has_work() {
                ring.members.insert(task_id.clone());
                ring.order.push_back(task_id.clone());
            }
        }
        None
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::ready;
    use std::task::{Context, Poll};

    struct Immediate;
    impl SplitRunnable for Immediate {
        fn advance(&self, _duration: std::time::Duration, _cx: &mut Context<'_>) -> Poll<()> {
            let _ = ready(());
            Poll::Ready(())
        }
        fn is_finished(&self) -> bool {
            true
        }
        fn on_finished(&self) {}
        fn close(&self) {}
    }

    fn task(n: u32) -> TaskId {
        TaskId::new("q", 0, n, 0)
    }

    #[test]
    fn round_robin_serves_every_task_once_per_lap() {
        let queue = ReadyQueue::new();
        queue.register_task(task(0));
        queue.register_task(task(1));
        queue.push_pending(&task(0), Arc::new(Immediate));
        queue.push_pending(&task(1), Arc::new(Immediate));

        let (first, _) = queue.pop_next(|_| true).unwrap();
        let (second, _) = queue.pop_next(|_| true).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn pending_requires_admission_but_ready_does_not() {
        let queue = ReadyQueue::new();
        queue.register_task(task(0));
        queue.push_pending(&task(0), Arc::new(Immediate));
        assert!(queue.pop_next(|_| false).is_none());
        assert!(queue.pop_next(|_| true).is_some());

        queue.push_ready(&task(0), Arc::new(Immediate));
        assert!(queue.pop_next(|_| false).is_some());
    }

    #[test]
    fn remove_task_drains_and_unregisters() {
        let queue = ReadyQueue::new();
        queue.register_task(task(0));
        queue.push_pending(&task(0), Arc::new(Immediate));
        queue.push_ready(&task(0), Arc::new(Immediate));
        let drained = queue.remove_task(&task(0));
        assert_eq!(drained.len(), 2);
        assert!(queue.pop_next(|_| true).is_none());
    }

    #[test]
    fn has_pending_backlog_reflects_admission_gated_work() {
        let queue = ReadyQueue::new();
        queue.register_task(task(0));
        assert!(!queue.has_pending_backlog(&task(0)));
        queue.push_pending(&task(0), Arc::new(Immediate));
        assert!(queue.has_pending_backlog(&task(0)));
    }
}
