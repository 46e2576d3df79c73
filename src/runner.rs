//! The single-driver execution unit the executor actually schedules (spec
//! §4.4).

use std::future::{ready, Future};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;

use crate::driver::{BoxFuture, Driver, DriverContext};
use crate::pipeline::DriverFactory;
use crate::split::{ScheduledSplit, SplitAssignment};

struct RunnerState {
    driver: Option<Box<dyn Driver>>,
    closed: bool,
    /// The readiness future returned by the driver's last `process_for`
    /// call, if it has not yet resolved. The executor polls this to
    /// completion before calling `process_for` again for another slice
    /// (spec §4.6.3: a suspended driver is polled for wake, not re-dispatched).
    outstanding: Option<BoxFuture>,
}

/// A single concurrent driver instance, bound to at most one partitioned
/// split.
///
/// Construction is free: the underlying [`Driver`] is built lazily on the
/// first [`Self::process_for`] call, so closing a task before any runner
/// has executed never constructs a single operator (spec §4.4).
pub struct DriverSplitRunner {
    factory: Arc<DriverFactory>,
    split: Option<ScheduledSplit>,
    state: Mutex<RunnerState>,
}

impl DriverSplitRunner {
    /// Creates a runner for `factory`, optionally bound to a partitioned
    /// split. `split` is `Some` only for split-lifecycle factories.
    #[must_use]
    pub fn new(factory: Arc<DriverFactory>, split: Option<ScheduledSplit>) -> Self {
        Self {
            factory,
            split,
            state: Mutex::new(RunnerState {
                driver: None,
                closed: false,
                outstanding: None,
            }),
        }
    }

    /// The bound partitioned split, if any.
    #[must_use]
    pub const fn split(&self) -> Option<&ScheduledSplit> {
        self.split.as_ref()
    }

    /// Runs the underlying driver for up to `duration`.
    ///
    /// On the first call, builds the driver and attaches the bound
    /// partitioned split (if any) and every assignment in
    /// `unpartitioned_splits` before running it, guaranteeing a driver sees
    /// its split before its first `process_for` (spec §5's ordering
    /// guarantee). Returns an already-ready future if the runner is closed.
    pub fn process_for(&self, duration: Duration, unpartitioned_splits: &[SplitAssignment]) -> BoxFuture {
        let mut state = self.state.lock();
        if state.closed {
            return Box::pin(ready(()));
        }
        if state.driver.is_none() {
            let context = DriverContext::new(self.factory.pipeline_id());
            let mut driver = self.factory.build(context);
            if let Some(split) = &self.split {
                let assignment =
                    SplitAssignment::new(split.plan_node_id().clone(), [split.clone()], false);
                driver.update_splits(assignment);
            }
            for assignment in unpartitioned_splits {
                driver.update_splits(assignment.clone());
            }
            state.driver = Some(driver);
        }
        let driver = state.driver.as_mut().expect("driver just initialized above");
        driver.process_for(duration)
    }

    /// Drives this runner one step: if no readiness future is outstanding,
    /// issues a fresh `process_for(duration)` slice; either way, polls the
    /// current readiness future once.
    ///
    /// Returns `Poll::Ready(())` once the driver is ready to be dispatched
    /// for another slice (the caller should check [`Self::is_finished`]
    /// before requeuing); returns `Poll::Pending` if the driver is still
    /// suspended, in which case `cx`'s waker fires when it is worth polling
    /// again. The executor never calls `process_for` a second time while a
    /// readiness future from a previous call is still outstanding.
    pub fn advance(
        &self,
        duration: Duration,
        unpartitioned_splits: &[SplitAssignment],
        cx: &mut Context<'_>,
    ) -> Poll<()> {
        {
            let state = self.state.lock();
            if state.closed {
                return Poll::Ready(());
            }
        }
        let needs_new_slice = self.state.lock().outstanding.is_none();
        if needs_new_slice {
            let fut = self.process_for(duration, unpartitioned_splits);
            let mut state = self.state.lock();
            if state.closed {
                return Poll::Ready(());
            }
            state.outstanding = Some(fut);
        }
        let mut state = self.state.lock();
        let Some(fut) = state.outstanding.as_mut() else {
            return Poll::Ready(());
        };
        match fut.as_mut().poll(cx) {
            Poll::Ready(()) => {
                state.outstanding = None;
                Poll::Ready(())
            }
            Poll::Pending => Poll::Pending,
        }
    }

    /// True once this runner is closed, or its driver reports finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        let state = self.state.lock();
        state.closed || state.driver.as_ref().is_some_and(|d| d.is_finished())
    }

    /// The underlying driver's failure cause, if it finished with one. Only
    /// meaningful once [`Self::is_finished`] is true; a runner that was
    /// closed without ever building a driver has no failure cause.
    #[must_use]
    pub fn failure_cause(&self) -> Option<String> {
        self.state.lock().driver.as_ref().and_then(|d| d.failure_cause())
    }

    /// Closes the runner. Idempotent; closes the underlying driver if one
    /// was built.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        if let Some(driver) = state.driver.as_mut() {
            driver.close();
        }
    }

    /// Pushes a changed unpartitioned split assignment directly to the
    /// underlying driver, if one has been built and its `source_id` matches.
    ///
    /// Used by the conductor's split fan-out (spec §4.5.2) to reach drivers
    /// that are already running: a driver not yet built instead picks up the
    /// latest snapshot when it is constructed, via [`Self::process_for`]'s
    /// `unpartitioned_splits` parameter.
    pub fn push_split_update(&self, assignment: &SplitAssignment) {
        let mut state = self.state.lock();
        if let Some(driver) = state.driver.as_mut() {
            if driver.source_id() == Some(assignment.plan_node_id()) {
                driver.update_splits(assignment.clone());
            }
        }
    }

    /// A short diagnostic string: empty unless bound to a partitioned
    /// split.
    #[must_use]
    pub fn info(&self) -> String {
        self.split
            .as_ref()
            .map(|split| format!("split={}", split.sequence_id()))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qtask_types::PipelineId;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct RecordingDriver {
        built_ran: Arc<AtomicBool>,
        finished: bool,
        closed: Arc<AtomicBool>,
        received_splits: Arc<Mutex<Vec<SplitAssignment>>>,
    }

    impl Driver for RecordingDriver {
        fn update_splits(&mut self, assignment: SplitAssignment) {
            self.received_splits.lock().push(assignment);
        }

        fn process_for(&mut self, _duration: Duration) -> BoxFuture {
            self.built_ran.store(true, Ordering::SeqCst);
            self.finished = true;
            Box::pin(ready(()))
        }

        fn is_finished(&self) -> bool {
            self.finished
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn split(seq: u64) -> ScheduledSplit {
        #[derive(Debug)]
        struct S;
        impl crate::split::Split for S {}
        ScheduledSplit::new(
            qtask_types::SequenceId::new(seq),
            qtask_types::PlanNodeId::new("scan"),
            Arc::new(S),
        )
    }

    #[test]
    fn driver_is_not_built_until_first_process_for() {
        let built_ran = Arc::new(AtomicBool::new(false));
        let built_ran_clone = built_ran.clone();
        let closed = Arc::new(AtomicBool::new(false));
        let received = Arc::new(Mutex::new(Vec::new()));
        let factory = Arc::new(DriverFactory::new(
            PipelineId::new(0),
            true,
            false,
            None,
            None,
            move |_ctx| {
                Box::new(RecordingDriver {
                    built_ran: built_ran_clone.clone(),
                    finished: false,
                    closed: closed.clone(),
                    received_splits: received.clone(),
                }) as Box<dyn Driver>
            },
        ));
        let runner = DriverSplitRunner::new(factory, None);
        assert!(!built_ran.load(Ordering::SeqCst));
        runner.process_for(Duration::from_millis(10), &[]);
        assert!(built_ran.load(Ordering::SeqCst));
    }

    #[test]
    fn bound_split_is_attached_before_first_process_for() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let factory = Arc::new(DriverFactory::new(
            PipelineId::new(0),
            true,
            false,
            Some(qtask_types::PlanNodeId::new("scan")),
            None,
            move |_ctx| {
                Box::new(RecordingDriver {
                    built_ran: Arc::new(AtomicBool::new(false)),
                    finished: false,
                    closed: Arc::new(AtomicBool::new(false)),
                    received_splits: received_clone.clone(),
                }) as Box<dyn Driver>
            },
        ));
        let runner = DriverSplitRunner::new(factory, Some(split(1)));
        runner.process_for(Duration::from_millis(10), &[]);
        assert_eq!(received.lock().len(), 1);
        assert!(!runner.info().is_empty());
    }

    #[test]
    fn closed_runner_returns_ready_future_without_building_driver() {
        let built_ran = Arc::new(AtomicBool::new(false));
        let built_ran_clone = built_ran.clone();
        let factory = Arc::new(DriverFactory::new(
            PipelineId::new(0),
            true,
            false,
            None,
            None,
            move |_ctx| {
                Box::new(RecordingDriver {
                    built_ran: built_ran_clone.clone(),
                    finished: false,
                    closed: Arc::new(AtomicBool::new(false)),
                    received_splits: Arc::new(Mutex::new(Vec::new())),
                }) as Box<dyn Driver>
            },
        ));
        let runner = DriverSplitRunner::new(factory, None);
        runner.close();
        runner.process_for(Duration::from_millis(10), &[]);
        assert!(!built_ran.load(Ordering::SeqCst));
        assert!(runner.is_finished());
    }

    #[test]
    fn close_after_build_closes_underlying_driver() {
        let closed = Arc::new(AtomicBool::new(false));
        let closed_clone = closed.clone();
        let factory = Arc::new(DriverFactory::new(
            PipelineId::new(0),
            true,
            false,
            None,
            None,
            move |_ctx| {
                Box::new(RecordingDriver {
                    built_ran: Arc::new(AtomicBool::new(false)),
                    finished: false,
                    closed: closed_clone.clone(),
                    received_splits: Arc::new(Mutex::new(Vec::new())),
                }) as Box<dyn Driver>
            },
        ));
        let runner = DriverSplitRunner::new(factory, None);
        runner.process_for(Duration::from_millis(10), &[]);
        runner.close();
        assert!(closed.load(Ordering::SeqCst));
    }

    struct SourcedDriver {
        source: qtask_types::PlanNodeId,
        received: Arc<Mutex<Vec<SplitAssignment>>>,
    }

    impl Driver for SourcedDriver {
        fn source_id(&self) -> Option<&qtask_types::PlanNodeId> {
            Some(&self.source)
        }

        fn process_for(&mut self, _duration: Duration) -> BoxFuture {
            Box::pin(ready(()))
        }

        fn is_finished(&self) -> bool {
            false
        }

        fn update_splits(&mut self, assignment: SplitAssignment) {
            self.received.lock().push(assignment);
        }

        fn close(&mut self) {}
    }

    #[test]
    fn push_split_update_reaches_a_built_driver_with_matching_source() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let factory = Arc::new(DriverFactory::new(
            PipelineId::new(0),
            true,
            false,
            None,
            None,
            move |_ctx| {
                Box::new(SourcedDriver {
                    source: qtask_types::PlanNodeId::new("scan"),
                    received: received_clone.clone(),
                }) as Box<dyn Driver>
            },
        ));
        let runner = DriverSplitRunner::new(factory, None);
        runner.process_for(Duration::from_millis(1), &[]);

        let matching = SplitAssignment::new(qtask_types::PlanNodeId::new("scan"), vec![], true);
        runner.push_split_update(&matching);
        assert_eq!(received.lock().len(), 1);

        let other = SplitAssignment::new(qtask_types::PlanNodeId::new("other"), vec![], true);
        runner.push_split_update(&other);
        assert_eq!(received.lock().len(), 1);
    }

    #[test]
    fn info_is_empty_without_a_bound_split() {
        let factory = Arc::new(DriverFactory::new(
            PipelineId::new(0),
            true,
            false,
            None,
            None,
            |_ctx| {
                Box::new(RecordingDriver {
                    built_ran: Arc::new(AtomicBool::new(false)),
                    finished: true,
                    closed: Arc::new(AtomicBool::new(false)),
                    received_splits: Arc::new(Mutex::new(Vec::new())),
                }) as Box<dyn Driver>
            },
        ));
        let runner = DriverSplitRunner::new(factory, None);
        assert!(runner.info().is_empty());
    }

    struct SuspendOnceDriver {
        polls_remaining: u32,
    }

    impl Driver for SuspendOnceDriver {
        fn process_for(&mut self, _duration: Duration) -> BoxFuture {
            let mut remaining = self.polls_remaining;
            Box::pin(std::future::poll_fn(move |cx| {
                if remaining == 0 {
                    Poll::Ready(())
                } else {
                    remaining -= 1;
                    cx.waker().wake_by_ref();
                    Poll::Pending
                }
            }))
        }

        fn is_finished(&self) -> bool {
            false
        }

        fn close(&mut self) {}
    }

    fn noop_waker() -> std::task::Waker {
        struct NoopWaker;
        impl std::task::Wake for NoopWaker {
            fn wake(self: Arc<Self>) {}
        }
        std::task::Waker::from(Arc::new(NoopWaker))
    }

    #[test]
    fn advance_polls_outstanding_future_instead_of_redispatching() {
        let factory = Arc::new(DriverFactory::new(
            PipelineId::new(0),
            true,
            false,
            None,
            None,
            |_ctx| Box::new(SuspendOnceDriver { polls_remaining: 2 }) as Box<dyn Driver>,
        ));
        let runner = DriverSplitRunner::new(factory, None);
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);

        assert_eq!(runner.advance(Duration::from_millis(1), &[], &mut cx), Poll::Pending);
        assert_eq!(runner.advance(Duration::from_millis(1), &[], &mut cx), Poll::Pending);
        assert_eq!(runner.advance(Duration::from_millis(1), &[], &mut cx), Poll::Ready(()));
    }

    struct FailingDriver;
    impl Driver for FailingDriver {
        fn process_for(&mut self, _duration: Duration) -> BoxFuture {
            Box::pin(ready(()))
        }
        fn is_finished(&self) -> bool {
            true
        }
        fn failure_cause(&self) -> Option<String> {
            Some("disk read error".to_string())
        }
        fn close(&mut self) {}
    }

    #[test]
    fn failure_cause_surfaces_from_the_underlying_driver() {
        let factory = Arc::new(DriverFactory::new(
            PipelineId::new(0),
            true,
            false,
            None,
            None,
            |_ctx| Box::new(FailingDriver) as Box<dyn Driver>,
        ));
        let runner = DriverSplitRunner::new(factory, None);
        assert!(runner.failure_cause().is_none());
        runner.process_for(Duration::from_millis(1), &[]);
        assert_eq!(runner.failure_cause().as_deref(), Some("disk read error"));
    }

    #[test]
    fn advance_on_closed_runner_is_immediately_ready() {
        let factory = Arc::new(DriverFactory::new(
            PipelineId::new(0),
            true,
            false,
            None,
            None,
            |_ctx| Box::new(SuspendOnceDriver { polls_remaining: 5 }) as Box<dyn Driver>,
        ));
        let runner = DriverSplitRunner::new(factory, None);
        runner.close();
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert_eq!(runner.advance(Duration::from_millis(1), &[], &mut cx), Poll::Ready(()));
        assert!(runner.is_finished());
    }
}
