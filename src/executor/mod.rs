//! The cooperative, multi-task thread pool (spec §4.6).
//!
//! A bounded pool of worker threads round-robins across every task's runnable
//! drivers, advancing each for a bounded time slice before moving on. No
//! async runtime backs this: time-slicing and suspension are both driven by
//! [`crate::runner::DriverSplitRunner::advance`]'s own `Future` polling,
//! following the teacher's `runtime::worker`'s park/unpark dispatch loop but
//! swapping its work-stealing deque for the round-robin, per-task-fair
//! [`queue::ReadyQueue`] spec §4.6.4 requires.

mod handle;
mod queue;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Wake, Waker};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::RwLock;

use qtask_types::TaskId;

use crate::config::TaskManagerConfig;
use crate::pressure::BufferPressure;

pub use handle::TaskHandle;

/// The unit of work the executor schedules: one [`crate::runner::DriverSplitRunner`],
/// wrapped by [`crate::execution::SqlTaskExecution`] with whatever
/// completion bookkeeping it needs.
///
/// Kept as a trait (rather than scheduling `DriverSplitRunner` directly) so
/// the conductor can attach per-runner completion callbacks without the
/// executor needing to know about pipelines, splits, or task state at all.
pub trait SplitRunnable: Send + Sync {
    /// Advances this runnable for up to `duration`. See
    /// [`crate::runner::DriverSplitRunner::advance`] for the exact contract:
    /// `Pending` means the executor must not call this again until `cx`'s
    /// waker fires.
    fn advance(&self, duration: Duration, cx: &mut Context<'_>) -> Poll<()>;

    /// True once this runnable has no more work to do, ever.
    fn is_finished(&self) -> bool;

    /// Called exactly once, when the executor observes [`Self::is_finished`]
    /// becoming true after an `advance` call. Used to release resources and
    /// fire downstream completion checks.
    fn on_finished(&self);

    /// Requests this runnable stop at its next opportunity. Must be
    /// idempotent.
    fn close(&self);

    /// True if this runnable was dispatched through [`TaskExecutor::enqueue`]'s
    /// admission gate and therefore holds one of its task's [`TaskHandle`]
    /// concurrency slots that must be released on completion.
    ///
    /// Runnables submitted via [`TaskExecutor::enqueue_force`] (spec's
    /// `force_run`, task-lifecycle bootstrap) never acquired a slot and must
    /// override this to `false` so completion doesn't refund an admission
    /// the task never spent.
    fn holds_admission_slot(&self) -> bool {
        true
    }
}

struct ExecutorInner {
    config: TaskManagerConfig,
    queue: queue::ReadyQueue,
    handles: RwLock<HashMap<TaskId, Arc<TaskHandle>>>,
    shutdown: AtomicBool,
    work: Mutex<()>,
    work_cv: Condvar,
}

impl ExecutorInner {
    fn try_admit(&self, task_id: &TaskId) -> bool {
        self.handles
            .read()
            .get(task_id)
            .is_some_and(|handle| handle.try_admit())
    }

    fn notify_work(&self) {
        self.work_cv.notify_all();
    }

    fn requeue(&self, task_id: &TaskId, runnable: Arc<dyn SplitRunnable>) {
        if runnable.is_finished() {
            runnable.on_finished();
            if runnable.holds_admission_slot() {
                if let Some(handle) = self.handles.read().get(task_id) {
                    handle.release();
                }
            }
        } else {
            self.queue.push_ready(task_id, runnable);
        }
        self.notify_work();
    }

    fn dispatch_once(self: &Arc<Self>, task_id: TaskId, runnable: Arc<dyn SplitRunnable>) {
        let waker = Waker::from(Arc::new(RequeueWaker {
            inner: self.clone(),
            task_id: task_id.clone(),
            runnable: runnable.clone(),
        }));
        let mut cx = Context::from_waker(&waker);
        match runnable.advance(self.config.task_yield_interval, &mut cx) {
            Poll::Ready(()) => self.requeue(&task_id, runnable),
            Poll::Pending => {
                // RequeueWaker::wake will re-enter this runnable into the
                // ready queue once the driver becomes progressable again.
                // The admission slot stays held for the whole suspension.
            }
        }
    }

    fn worker_loop(self: &Arc<Self>) {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }
            match self.queue.pop_next(|task_id| self.try_admit(task_id)) {
                Some((task_id, runnable)) => self.dispatch_once(task_id, runnable),
                None => {
                    let guard = self.work.lock().expect("executor work lock poisoned");
                    if self.shutdown.load(Ordering::Acquire) {
                        return;
                    }
                    let _ = self
                        .work_cv
                        .wait_timeout(guard, Duration::from_millis(50))
                        .expect("executor work condvar wait poisoned");
                }
            }
        }
    }

    fn adjust_concurrency_once(&self) {
        let handles = self.handles.read();
        for handle in handles.values() {
            let pressure = handle.pressure();
            if pressure.is_low(self.config.low_utilization_watermark)
                && self.queue.has_pending_backlog(handle.task_id())
            {
                handle.raise_cap();
            } else if pressure.is_high(self.config.high_utilization_watermark) {
                handle.lower_cap();
            }
        }
    }
}

/// A wake callback that, once fired, hands a suspended runnable back to the
/// ready queue so a worker picks it up on its next dispatch.
///
/// Mirrors the teacher's `runtime::park::Unparker`: a `Waker` is nothing
/// more than "make this runnable observable to a worker again", never a
/// direct poll.
struct RequeueWaker {
    inner: Arc<ExecutorInner>,
    task_id: TaskId,
    runnable: Arc<dyn SplitRunnable>,
}

impl Wake for RequeueWaker {
    fn wake(self: Arc<Self>) {
        self.inner.requeue(&self.task_id, self.runnable.clone());
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.inner.requeue(&self.task_id, self.runnable.clone());
    }
}

/// The cooperative scheduler shared by every task on this node.
///
/// One `TaskExecutor` backs an entire node's worker pool; every
/// [`crate::execution::SqlTaskExecution`] registers its own [`TaskHandle`]
/// with it and submits runnables through [`Self::enqueue`].
pub struct TaskExecutor {
    inner: Arc<ExecutorInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    adjuster: Mutex<Option<JoinHandle<()>>>,
}

impl TaskExecutor {
    /// Starts the executor's worker pool and concurrency-adjustment thread.
    #[must_use]
    pub fn new(config: TaskManagerConfig) -> Arc<Self> {
        let worker_count = config.executor_worker_threads;
        let adjustment_interval = config.split_concurrency_adjustment_interval;
        let inner = Arc::new(ExecutorInner {
            config,
            queue: queue::ReadyQueue::new(),
            handles: RwLock::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
            work: Mutex::new(()),
            work_cv: Condvar::new(),
        });

        let workers = (0..worker_count)
            .map(|index| {
                let inner = inner.clone();
                std::thread::Builder::new()
                    .name(format!("qtask-worker-{index}"))
                    .spawn(move || inner.worker_loop())
                    .expect("failed to spawn executor worker thread")
            })
            .collect();

        let adjuster_inner = inner.clone();
        let adjuster = std::thread::Builder::new()
            .name("qtask-concurrency-adjuster".to_string())
            .spawn(move || loop {
                if adjuster_inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                std::thread::sleep(adjustment_interval);
                if adjuster_inner.shutdown.load(Ordering::Acquire) {
                    return;
                }
                adjuster_inner.adjust_concurrency_once();
            })
            .expect("failed to spawn concurrency adjuster thread");

        Arc::new(Self {
            inner,
            workers: Mutex::new(workers),
            adjuster: Mutex::new(Some(adjuster)),
        })
    }

    /// Registers a new task, returning the admission-control handle its
    /// conductor should consult and mutate.
    pub fn add_task(&self, task_id: TaskId, pressure: Arc<BufferPressure>) -> Arc<TaskHandle> {
        let handle = Arc::new(TaskHandle::new(task_id.clone(), &self.inner.config, pressure));
        self.inner.handles.write().insert(task_id.clone(), handle.clone());
        self.inner.queue.register_task(task_id);
        handle
    }

    /// Unregisters a task and returns every runnable still queued (neither
    /// dispatched nor completed), for the caller to [`SplitRunnable::close`].
    /// Runnables currently mid-dispatch on a worker thread are not included;
    /// the executor closes those in place once their current slice finishes.
    pub fn remove_task(&self, task_id: &TaskId) -> Vec<Arc<dyn SplitRunnable>> {
        self.inner.handles.write().remove(task_id);
        self.inner.queue.remove_task(task_id)
    }

    /// Submits a runnable for admission-gated dispatch.
    pub fn enqueue(&self, task_id: &TaskId, runnable: Arc<dyn SplitRunnable>) {
        self.inner.queue.push_pending(task_id, runnable);
        self.inner.notify_work();
    }

    /// Submits a runnable that bypasses admission control and is dispatched
    /// on the next available worker regardless of the task's current cap.
    /// Used only for task-lifecycle bootstrap drivers (spec's `force_run`).
    pub fn enqueue_force(&self, task_id: &TaskId, runnable: Arc<dyn SplitRunnable>) {
        self.inner.queue.push_ready(task_id, runnable);
        self.inner.notify_work();
    }

    /// The admission-control handle for a registered task, if still present.
    #[must_use]
    pub fn handle_for(&self, task_id: &TaskId) -> Option<Arc<TaskHandle>> {
        self.inner.handles.read().get(task_id).cloned()
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        self.inner.shutdown.store(true, Ordering::Release);
        self.inner.notify_work();
        for worker in self.workers.get_mut().expect("workers lock poisoned").drain(..) {
            let _ = worker.join();
        }
        if let Some(adjuster) = self.adjuster.get_mut().expect("adjuster lock poisoned").take() {
            let _ = adjuster.join();
        }
    }
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("tasks", &self.inner.handles.read().len())
            .finish_non_exhaustive()
    }
}
