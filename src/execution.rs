//! The conductor: ties pipelines, splits, the executor, and the output
//! buffer together into one task's lifecycle (spec §4.5).
//!
//! [`SqlTaskExecution`] owns no thread of its own. It reacts: to splits
//! arriving from the control plane, to drivers the executor reports
//! finished, and to the output buffer draining. Every reaction is funneled
//! through [`Self::check_task_completion`], the single place that decides
//! whether the task is done.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock as StdRwLock, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use slab::Slab;

use qtask_types::{PipelineId, PlanNodeId, SequenceId, TaskId};

use crate::buffer::{BufferState, OutputBuffer};
use crate::error::{TaskError, TaskResult};
use crate::executor::{SplitRunnable, TaskExecutor};
use crate::metrics::TaskMetrics;
use crate::notify::NotificationExecutor;
use crate::pipeline::{DriverFactory, DriverSplitRunnerFactory};
use crate::pressure::BufferPressure;
use crate::runner::DriverSplitRunner;
use crate::split::{PendingSplits, PendingSplitsState, SplitAssignment};
use crate::state_machine::{TaskState, TaskStateMachine};
use crate::status::Status;

/// The compiled fragment a [`SqlTaskExecution`] is built from: every
/// pipeline, plus the order in which split-lifecycle source plan nodes must
/// be scheduled (spec §4.5.3).
pub struct TaskPlan {
    pipelines: Vec<Arc<DriverFactory>>,
    source_order: Vec<PlanNodeId>,
}

impl TaskPlan {
    /// Creates a plan from its pipelines and source scheduling order.
    ///
    /// `source_order` must list exactly the plan nodes of every
    /// split-lifecycle pipeline in `pipelines`, and nothing else.
    #[must_use]
    pub fn new(pipelines: Vec<Arc<DriverFactory>>, source_order: Vec<PlanNodeId>) -> Self {
        Self { pipelines, source_order }
    }
}

/// State the conductor mutates under a single lock, separate from the
/// driver slot table (spec §5: split fan-out must not block on the same
/// lock driver iteration holds).
struct Monitor {
    pending_splits: HashMap<PlanNodeId, PendingSplits>,
    unpartitioned: HashMap<PlanNodeId, SplitAssignment>,
    scheduling_cursor: usize,
    max_acknowledged: HashMap<PlanNodeId, SequenceId>,
    status: Status,
}

/// One entry in the conductor's driver roster.
///
/// `valid` flips to `false` once the driver finishes; the fan-out loop in
/// [`SqlTaskExecution::add_split_assignments`] skips invalidated slots
/// instead of pruning them, so slot keys handed out to a [`RunnerHandle`]
/// stay valid for the runner's whole lifetime (spec §9: "generation + slot"
/// table in place of weak references to drivers).
struct DriverSlot {
    runner: Arc<DriverSplitRunner>,
    valid: AtomicBool,
}

/// One task's conductor: the runtime object that owns a compiled plan's
/// lifecycle from `PLANNED` through a terminal state.
///
/// Construction wires every pipeline into either the split-lifecycle or
/// task-lifecycle group (spec §4.3), registers listeners on the output
/// buffer and task state machine, and immediately schedules task-lifecycle
/// drivers. From then on the conductor is driven entirely by
/// [`Self::add_split_assignments`] and by completion callbacks the executor
/// fires through [`RunnerHandle`].
pub struct SqlTaskExecution {
    task_id: TaskId,
    state_machine: Arc<TaskStateMachine>,
    output_buffer: Arc<dyn OutputBuffer>,
    executor: Arc<TaskExecutor>,
    task_handle: Arc<crate::executor::TaskHandle>,
    notification: Arc<NotificationExecutor>,
    metrics: Arc<TaskMetrics>,
    split_lifecycle: HashMap<PlanNodeId, Arc<DriverSplitRunnerFactory>>,
    task_lifecycle: Vec<Arc<DriverSplitRunnerFactory>>,
    source_order: Vec<PlanNodeId>,
    monitor: Mutex<Monitor>,
    drivers: StdRwLock<Slab<DriverSlot>>,
}

impl SqlTaskExecution {
    /// Builds a conductor for `task_id` from a compiled `plan`, wires it
    /// into `executor`, and immediately starts its task-lifecycle drivers.
    ///
    /// The returned `Arc` is also registered with `executor` under
    /// `task_id`; callers must not call [`TaskExecutor::add_task`]
    /// themselves.
    #[must_use]
    pub fn new(
        task_id: TaskId,
        plan: TaskPlan,
        output_buffer: Arc<dyn OutputBuffer>,
        executor: Arc<TaskExecutor>,
        notification: Arc<NotificationExecutor>,
    ) -> Arc<Self> {
        let mut split_lifecycle = HashMap::new();
        let mut task_lifecycle = Vec::new();
        let mut pending_splits = HashMap::new();
        let mut pipeline_ids = Vec::new();

        for factory in plan.pipelines {
            pipeline_ids.push(factory.pipeline_id());
            let wrapped = Arc::new(DriverSplitRunnerFactory::new(factory.clone()));
            if let Some(source) = factory.source_plan_node() {
                pending_splits.insert(source.clone(), PendingSplits::new(source.clone()));
                split_lifecycle.insert(source.clone(), wrapped);
            } else {
                task_lifecycle.push(wrapped);
            }
        }

        let task_lifecycle_count = i32::try_from(task_lifecycle.len()).unwrap_or(i32::MAX);
        let status = Status::new(pipeline_ids, task_lifecycle_count);

        let pressure = Arc::new(BufferPressure::new());
        let task_handle = executor.add_task(task_id.clone(), pressure);

        let execution = Arc::new(Self {
            task_id: task_id.clone(),
            state_machine: TaskStateMachine::new(),
            output_buffer: output_buffer.clone(),
            executor,
            task_handle,
            notification,
            metrics: Arc::new(TaskMetrics::new()),
            split_lifecycle,
            task_lifecycle,
            source_order: plan.source_order,
            monitor: Mutex::new(Monitor {
                pending_splits,
                unpartitioned: HashMap::new(),
                scheduling_cursor: 0,
                max_acknowledged: HashMap::new(),
                status,
            }),
            drivers: StdRwLock::new(Slab::new()),
        });

        let weak_for_buffer = Arc::downgrade(&execution);
        output_buffer.add_state_change_listener(Box::new(move |state| {
            let Some(execution) = weak_for_buffer.upgrade() else {
                return;
            };
            execution.task_handle.pressure().set_utilization(execution.output_buffer.utilization());
            execution.metrics.set_buffer_utilization(execution.output_buffer.utilization());
            if state.is_terminal() {
                let execution = execution.clone();
                execution.notification.spawn(move || execution.check_task_completion());
            }
        }));

        let weak_for_state = Arc::downgrade(&execution);
        execution.state_machine.add_state_listener(Box::new(move |state| {
            #[cfg(feature = "tracing-integration")]
            tracing::debug!(state = %state, "task state transitioned");
            if state.is_terminal() {
                if let Some(execution) = weak_for_state.upgrade() {
                    execution.on_terminal();
                }
            }
        }));

        execution.schedule_task_lifecycle_drivers();
        execution.state_machine.start();
        execution
    }

    /// The task this conductor governs.
    #[must_use]
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// The task's current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.state_machine.state()
    }

    /// Registers a listener fired on every subsequent task state transition.
    pub fn add_state_listener(&self, listener: Box<dyn Fn(TaskState) + Send + Sync>) {
        self.state_machine.add_state_listener(listener);
    }

    /// The observability counters this task's driver completions feed.
    #[must_use]
    pub fn metrics(&self) -> &Arc<TaskMetrics> {
        &self.metrics
    }

    /// Plan nodes whose producer has declared `no_more_splits` (including
    /// those already fully scheduled and cleaned up).
    #[must_use]
    pub fn no_more_splits(&self) -> HashSet<PlanNodeId> {
        self.monitor
            .lock()
            .pending_splits
            .iter()
            .filter(|(_, pending)| pending.state() != PendingSplitsState::Adding)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Merges newly delivered split assignments into this task (spec
    /// §4.5.2).
    ///
    /// Must not be called while the caller holds this conductor's internal
    /// lock — doing so would deadlock against the reentrant-incapable
    /// [`parking_lot::Mutex`] this method itself takes.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::TaskTerminal`] if the task has already reached a
    /// terminal state. Returns [`TaskError::SplitAfterNoMore`] if a source
    /// plan node that already latched `NO_MORE` receives splits it had not
    /// already seen.
    pub fn add_split_assignments(self: &Arc<Self>, assignments: Vec<SplitAssignment>) -> TaskResult<()> {
        assert!(
            self.monitor.try_lock().is_some(),
            "add_split_assignments must not be called while already holding the conductor lock"
        );

        if self.state_machine.state().is_terminal() {
            return Err(TaskError::TaskTerminal(self.task_id.clone()));
        }

        let mut touched_sources = false;
        let mut changed_unpartitioned = Vec::new();
        {
            let mut monitor = self.monitor.lock();
            for assignment in &assignments {
                let plan_node = assignment.plan_node_id().clone();
                if let Some(max_seq) = assignment.max_sequence_id() {
                    let watermark = monitor.max_acknowledged.entry(plan_node.clone()).or_insert(SequenceId::MIN);
                    if max_seq > *watermark {
                        *watermark = max_seq;
                    }
                }
                if let Some(pending) = monitor.pending_splits.get_mut(&plan_node) {
                    pending.merge_assignment(assignment)?;
                    touched_sources = true;
                } else {
                    let entry = monitor
                        .unpartitioned
                        .entry(plan_node.clone())
                        .or_insert_with(|| SplitAssignment::new(plan_node.clone(), std::iter::empty(), false));
                    entry.merge(assignment);
                    changed_unpartitioned.push(entry.clone());
                }
            }
        }

        if touched_sources {
            self.schedule_partitioned_sources();
        }

        if !changed_unpartitioned.is_empty() {
            let drivers = self.drivers.read().expect("driver slot table lock poisoned");
            for (_, slot) in drivers.iter() {
                if slot.valid.load(Ordering::Acquire) {
                    for assignment in &changed_unpartitioned {
                        slot.runner.push_split_update(assignment);
                    }
                }
            }
        }

        self.check_task_completion();
        Ok(())
    }

    /// Requests the task stop running and transition to `CANCELED`.
    pub fn cancel(&self) {
        self.state_machine.cancel();
        self.output_buffer.abort();
    }

    /// Requests the task stop running and transition to `ABORTED`.
    pub fn abort(&self) {
        self.state_machine.abort();
        self.output_buffer.abort();
    }

    /// Forces the task to `FAILED` with the given cause.
    pub fn fail(&self, cause: impl Into<String>) {
        self.state_machine.failed(cause);
        self.output_buffer.abort();
    }

    fn schedule_task_lifecycle_drivers(self: &Arc<Self>) {
        for factory in self.task_lifecycle.clone() {
            let pipeline_id = factory.factory().pipeline_id();
            let instances = factory.factory().effective_driver_instances();
            let mut runners = Vec::with_capacity(instances as usize);
            for _ in 0..instances {
                {
                    let mut monitor = self.monitor.lock();
                    monitor.status.increment_pending_creation(pipeline_id);
                }
                let runner = Arc::new(factory.create_driver_runner(None));
                {
                    let mut monitor = self.monitor.lock();
                    monitor.status.decrement_pending_creation(pipeline_id);
                }
                runners.push(runner);
            }
            self.enqueue(true, runners, pipeline_id);
            factory.no_more_driver_runner();
            let pending_creation = {
                let mut monitor = self.monitor.lock();
                monitor.status.set_no_more_driver_runners(pipeline_id);
                monitor
                    .status
                    .per_pipeline(pipeline_id)
                    .map_or(0, crate::status::PerPipelineStatus::pending_creation)
            };
            factory.close_if_fully_created(pending_creation);
        }
    }

    /// Drains every source plan node in `source_order` starting from the
    /// current cursor, creating and enqueueing one driver runner per queued
    /// split, and advances the cursor past any plan node that is both fully
    /// drained and latched `NO_MORE` (spec §4.5.3).
    fn schedule_partitioned_sources(self: &Arc<Self>) {
        loop {
            let plan_node = {
                let monitor = self.monitor.lock();
                match self.source_order.get(monitor.scheduling_cursor) {
                    Some(node) => node.clone(),
                    None => return,
                }
            };
            let Some(factory) = self.split_lifecycle.get(&plan_node).cloned() else {
                return;
            };
            let pipeline_id = factory.factory().pipeline_id();

            let drained = {
                let mut monitor = self.monitor.lock();
                let pending = monitor
                    .pending_splits
                    .get_mut(&plan_node)
                    .expect("pending splits initialized for every split-lifecycle plan node");
                pending.drain()
            };
            if !drained.is_empty() {
                let mut runners = Vec::with_capacity(drained.len());
                for split in drained {
                    {
                        let mut monitor = self.monitor.lock();
                        monitor.status.increment_pending_creation(pipeline_id);
                    }
                    let runner = Arc::new(factory.create_driver_runner(Some(split)));
                    {
                        let mut monitor = self.monitor.lock();
                        monitor.status.decrement_pending_creation(pipeline_id);
                    }
                    runners.push(runner);
                }
                self.enqueue(false, runners, pipeline_id);
            }

            let fully_drained_and_closed = {
                let monitor = self.monitor.lock();
                let pending = monitor
                    .pending_splits
                    .get(&plan_node)
                    .expect("checked present above");
                pending.is_empty() && pending.state() == PendingSplitsState::NoMore
            };
            if !fully_drained_and_closed {
                return;
            }

            factory.no_more_driver_runner();
            {
                let mut monitor = self.monitor.lock();
                monitor
                    .pending_splits
                    .get_mut(&plan_node)
                    .expect("checked present above")
                    .mark_cleaned_up();
                monitor.status.set_no_more_driver_runners(pipeline_id);
                monitor.scheduling_cursor += 1;
            }
            self.check_task_completion();
        }
    }

    /// Accounts for and dispatches a batch of freshly created runners.
    /// `force_run` bypasses the executor's admission control (task-lifecycle
    /// bootstrap only, spec §4.5.1).
    fn enqueue(self: &Arc<Self>, force_run: bool, runners: Vec<Arc<DriverSplitRunner>>, pipeline_id: PipelineId) {
        for runner in runners {
            let admitted = {
                let mut monitor = self.monitor.lock();
                let admitted = monitor.status.increment_remaining_driver(pipeline_id);
                if admitted.is_ok() {
                    self.metrics.remaining_drivers.set(i64::from(monitor.status.overall_remaining_driver()));
                }
                admitted
            };
            if let Err(err) = admitted {
                self.state_machine.failed(err.to_string());
                continue;
            }

            let slot_key = self.drivers.write().expect("driver slot table lock poisoned").insert(DriverSlot {
                runner: runner.clone(),
                valid: AtomicBool::new(true),
            });
            let wrapper: Arc<dyn SplitRunnable> = Arc::new(RunnerHandle {
                execution: self.clone(),
                runner,
                pipeline_id,
                slot_key,
                force_run,
            });
            if force_run {
                self.executor.enqueue_force(&self.task_id, wrapper);
            } else {
                self.executor.enqueue(&self.task_id, wrapper);
            }
        }
    }

    fn unpartitioned_snapshot(&self) -> Vec<SplitAssignment> {
        self.monitor.lock().unpartitioned.values().cloned().collect()
    }

    /// Flips a driver slot invalid once its runner has finished, so the
    /// split fan-out loop stops routing updates to it. Never removes the
    /// slot: `on_terminal` still needs to close it.
    fn invalidate_driver_slot(&self, slot_key: usize) {
        let drivers = self.drivers.read().expect("driver slot table lock poisoned");
        if let Some(slot) = drivers.get(slot_key) {
            slot.valid.store(false, Ordering::Release);
        }
    }

    /// Called on the notification executor once a driver runner reports
    /// finished, successfully or not (spec §4.5.4).
    fn on_driver_completed(&self, pipeline_id: PipelineId, slot_key: usize, failure_cause: Option<String>) {
        self.invalidate_driver_slot(slot_key);
        match failure_cause {
            None => {
                let result = {
                    let mut monitor = self.monitor.lock();
                    let result = monitor.status.decrement_remaining_driver(&self.task_id);
                    if result.is_ok() {
                        self.metrics.remaining_drivers.set(i64::from(monitor.status.overall_remaining_driver()));
                    }
                    result
                };
                if let Err(err) = result {
                    self.state_machine.failed(err.to_string());
                    return;
                }
                self.metrics.record_split_completed();
                self.check_task_completion();
            }
            Some(cause) => {
                self.state_machine.failed(cause);
                {
                    let mut monitor = self.monitor.lock();
                    let _ = monitor.status.decrement_remaining_driver(&self.task_id);
                    self.metrics.remaining_drivers.set(i64::from(monitor.status.overall_remaining_driver()));
                }
                self.metrics.record_split_failed();
            }
        }
        let _ = pipeline_id;
    }

    /// The single arbiter of "is this task done" (spec §4.5.5).
    ///
    /// A no-op unless every split-lifecycle factory has latched
    /// `no_more_driver_runner` and every created driver has completed; once
    /// both hold, drains the output buffer's terminal state into the
    /// matching task state.
    fn check_task_completion(&self) {
        if self.state_machine.state().is_terminal() {
            return;
        }
        if self.split_lifecycle.values().any(|f| !f.is_no_more_driver_runner()) {
            return;
        }
        let remaining = self.monitor.lock().status.overall_remaining_driver();
        if remaining != 0 {
            return;
        }

        self.output_buffer.no_more_pages();
        match self.output_buffer.state() {
            BufferState::Finished => self.state_machine.finish(),
            BufferState::Failed => {
                let cause = self
                    .output_buffer
                    .failure_cause()
                    .unwrap_or_else(|| TaskError::buffer_cause_missing().to_string());
                self.state_machine.failed(cause);
            }
            BufferState::Aborted => {
                self.state_machine.failed(TaskError::BufferAborted.to_string());
            }
            BufferState::Open | BufferState::NoMorePages | BufferState::Flushing => {
                self.state_machine.flush();
            }
        }
    }

    /// Tears down the executor registration and closes every driver and
    /// factory once the task reaches a terminal state (spec §4.5, §5).
    fn on_terminal(&self) {
        #[cfg(feature = "tracing-integration")]
        tracing::info!(task = %self.task_id, "task reached a terminal state, tearing down");

        for leftover in self.executor.remove_task(&self.task_id) {
            leftover.close();
        }
        for (_, slot) in self.drivers.read().expect("driver slot table lock poisoned").iter() {
            slot.runner.close();
        }
        for factory in self.split_lifecycle.values().chain(self.task_lifecycle.iter()) {
            factory.force_close();
        }
    }
}

/// Adapts a [`DriverSplitRunner`] plus its conductor back-reference to the
/// executor's [`SplitRunnable`] seam.
///
/// Holds a strong reference to the conductor so the task cannot be dropped
/// while one of its runners is still queued; the conductor's own roster
/// (`drivers`) holds its reference through the same slab slot this handle
/// was issued, identified by `slot_key`.
struct RunnerHandle {
    execution: Arc<SqlTaskExecution>,
    runner: Arc<DriverSplitRunner>,
    pipeline_id: PipelineId,
    slot_key: usize,
    /// Whether this runner was dispatched via `enqueue_force`, bypassing the
    /// executor's admission gate. If `true`, this handle never holds a
    /// `TaskHandle` concurrency slot and must not release one on completion.
    force_run: bool,
}

impl SplitRunnable for RunnerHandle {
    fn advance(&self, duration: Duration, cx: &mut Context<'_>) -> Poll<()> {
        let snapshot = self.execution.unpartitioned_snapshot();
        self.runner.advance(duration, &snapshot, cx)
    }

    fn is_finished(&self) -> bool {
        self.runner.is_finished()
    }

    fn holds_admission_slot(&self) -> bool {
        !self.force_run
    }

    fn on_finished(&self) {
        let execution = self.execution.clone();
        let pipeline_id = self.pipeline_id;
        let slot_key = self.slot_key;
        let failure_cause = self.runner.failure_cause();
        // Completion bookkeeping never runs on the worker thread that
        // observed the finish, per spec §5.
        execution
            .notification
            .spawn(move || execution.on_driver_completed(pipeline_id, slot_key, failure_cause));
    }

    fn close(&self) {
        self.runner.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::LocalOutputBuffer;
    use crate::driver::{BoxFuture, Driver};
    use crate::split::{ScheduledSplit, Split};
    use qtask_types::PipelineId as Pid;
    use crate::config::TaskManagerConfig;
    use std::future::ready;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    fn test_config() -> TaskManagerConfig {
        TaskManagerConfig {
            executor_worker_threads: 2,
            task_yield_interval: Duration::from_millis(5),
            split_concurrency_adjustment_interval: Duration::from_secs(3600),
            notification_executor_threads: 1,
            ..TaskManagerConfig::default()
        }
    }

    fn wait_until(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if predicate() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        predicate()
    }

    struct ImmediateDriver {
        finished: bool,
        failure: Option<String>,
    }

    impl Driver for ImmediateDriver {
        fn process_for(&mut self, _duration: Duration) -> BoxFuture {
            self.finished = true;
            Box::pin(ready(()))
        }

        fn is_finished(&self) -> bool {
            self.finished
        }

        fn failure_cause(&self) -> Option<String> {
            self.failure.clone()
        }

        fn close(&mut self) {
            self.finished = true;
        }
    }

    struct SuspendForeverDriver {
        closed: Arc<AtomicBool>,
    }

    impl Driver for SuspendForeverDriver {
        fn process_for(&mut self, _duration: Duration) -> BoxFuture {
            Box::pin(std::future::pending())
        }

        fn is_finished(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Debug)]
    struct TestSplit;
    impl Split for TestSplit {}

    fn scheduled(seq: u64, plan_node: &str) -> ScheduledSplit {
        ScheduledSplit::new(qtask_types::SequenceId::new(seq), PlanNodeId::new(plan_node), Arc::new(TestSplit))
    }

    fn harness() -> (Arc<TaskExecutor>, Arc<NotificationExecutor>) {
        (TaskExecutor::new(test_config()), Arc::new(NotificationExecutor::new(1)))
    }

    #[test]
    fn task_lifecycle_only_plan_finishes_with_empty_buffer() {
        let (executor, notification) = harness();
        let buffer = LocalOutputBuffer::new(1024);
        let factory = Arc::new(DriverFactory::new(
            Pid::new(0),
            false,
            true,
            None,
            None,
            |_ctx| Box::new(ImmediateDriver { finished: false, failure: None }) as Box<dyn Driver>,
        ));
        let plan = TaskPlan::new(vec![factory], vec![]);
        let execution = SqlTaskExecution::new(TaskId::new("q", 0, 0, 0), plan, buffer, executor, notification);

        assert!(wait_until(|| execution.state().is_terminal(), Duration::from_secs(2)));
        assert_eq!(execution.state(), TaskState::Finished);
    }

    #[test]
    fn split_lifecycle_plan_drains_and_finishes() {
        let (executor, notification) = harness();
        let buffer = LocalOutputBuffer::new(1024);
        let factory = Arc::new(DriverFactory::new(
            Pid::new(0),
            true,
            true,
            Some(PlanNodeId::new("scan")),
            None,
            |_ctx| Box::new(ImmediateDriver { finished: false, failure: None }) as Box<dyn Driver>,
        ));
        let plan = TaskPlan::new(vec![factory], vec![PlanNodeId::new("scan")]);
        let execution = SqlTaskExecution::new(TaskId::new("q", 0, 0, 0), plan, buffer, executor, notification);

        let assignment =
            SplitAssignment::new(PlanNodeId::new("scan"), vec![scheduled(1, "scan")], true);
        execution.add_split_assignments(vec![assignment]).unwrap();

        assert!(wait_until(|| execution.state().is_terminal(), Duration::from_secs(2)));
        assert_eq!(execution.state(), TaskState::Finished);
    }

    #[test]
    fn duplicate_split_delivery_creates_only_one_driver() {
        let (executor, notification) = harness();
        let buffer = LocalOutputBuffer::new(1024);
        let factory = Arc::new(DriverFactory::new(
            Pid::new(0),
            true,
            true,
            Some(PlanNodeId::new("scan")),
            None,
            |_ctx| Box::new(ImmediateDriver { finished: false, failure: None }) as Box<dyn Driver>,
        ));
        let plan = TaskPlan::new(vec![factory], vec![PlanNodeId::new("scan")]);
        let execution = SqlTaskExecution::new(TaskId::new("q", 0, 0, 0), plan, buffer, executor, notification);

        let assignment =
            SplitAssignment::new(PlanNodeId::new("scan"), vec![scheduled(1, "scan")], false);
        execution.add_split_assignments(vec![assignment.clone()]).unwrap();
        execution.add_split_assignments(vec![assignment]).unwrap();
        let closing = SplitAssignment::new(PlanNodeId::new("scan"), vec![], true);
        execution.add_split_assignments(vec![closing]).unwrap();

        assert!(wait_until(|| execution.state().is_terminal(), Duration::from_secs(2)));
        assert_eq!(execution.metrics().splits_completed.value(), 1);
    }

    #[test]
    fn driver_failure_fails_the_task_with_its_cause() {
        let (executor, notification) = harness();
        let buffer = LocalOutputBuffer::new(1024);
        let factory = Arc::new(DriverFactory::new(
            Pid::new(0),
            false,
            true,
            None,
            None,
            |_ctx| {
                Box::new(ImmediateDriver {
                    finished: false,
                    failure: Some("disk read error".to_string()),
                }) as Box<dyn Driver>
            },
        ));
        let plan = TaskPlan::new(vec![factory], vec![]);
        let execution = SqlTaskExecution::new(TaskId::new("q", 0, 0, 0), plan, buffer, executor, notification);

        assert!(wait_until(|| execution.state().is_terminal(), Duration::from_secs(2)));
        match execution.state() {
            TaskState::Failed(cause) => assert_eq!(cause.0, "disk read error"),
            other => panic!("expected Failed, got {other}"),
        }
    }

    #[test]
    fn cancel_transitions_immediately_even_with_a_suspended_driver() {
        let (executor, notification) = harness();
        let buffer = LocalOutputBuffer::new(1024);
        let closed = Arc::new(AtomicBool::new(false));
        let closed_clone = closed.clone();
        let factory = Arc::new(DriverFactory::new(
            Pid::new(0),
            false,
            true,
            None,
            None,
            move |_ctx| Box::new(SuspendForeverDriver { closed: closed_clone.clone() }) as Box<dyn Driver>,
        ));
        let plan = TaskPlan::new(vec![factory], vec![]);
        let execution = SqlTaskExecution::new(TaskId::new("q", 0, 0, 0), plan, buffer, executor, notification);

        execution.cancel();
        assert_eq!(execution.state(), TaskState::Canceled);
    }

    #[test]
    fn no_more_splits_reflects_pending_splits_state() {
        let (executor, notification) = harness();
        let buffer = LocalOutputBuffer::new(1024);
        let factory = Arc::new(DriverFactory::new(
            Pid::new(0),
            true,
            true,
            Some(PlanNodeId::new("scan")),
            None,
            |_ctx| Box::new(ImmediateDriver { finished: false, failure: None }) as Box<dyn Driver>,
        ));
        let plan = TaskPlan::new(vec![factory], vec![PlanNodeId::new("scan")]);
        let execution = SqlTaskExecution::new(TaskId::new("q", 0, 0, 0), plan, buffer, executor, notification);

        assert!(execution.no_more_splits().is_empty());
        let assignment = SplitAssignment::new(PlanNodeId::new("scan"), vec![], true);
        execution.add_split_assignments(vec![assignment]).unwrap();
        assert!(execution.no_more_splits().contains(&PlanNodeId::new("scan")));
    }
}
