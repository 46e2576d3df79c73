//! Shared fixtures for this crate's own unit tests and for the integration
//! suite under `tests/`.
//!
//! Gated behind `cfg(any(test, feature = "test-internals"))` (spec §6's test
//! tooling is ambient, not a feature the distilled spec names): unit test
//! modules pull these in via `cfg(test)` automatically, and the integration
//! tests enable `test-internals` as a dev-dependency feature to see the same
//! fixtures through the crate's public surface.

use std::future::ready;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use qtask_types::{PlanNodeId, SequenceId};

use crate::config::TaskManagerConfig;
use crate::driver::{BoxFuture, Driver};
use crate::executor::TaskExecutor;
use crate::notify::NotificationExecutor;
use crate::split::{ScheduledSplit, Split};

/// A config tuned for fast, deterministic tests: a short yield interval, a
/// concurrency-adjustment cadence long enough to never fire mid-test, and a
/// single-threaded notification dispatcher so callback ordering in
/// assertions is stable.
#[must_use]
pub fn test_config() -> TaskManagerConfig {
    TaskManagerConfig {
        executor_worker_threads: 2,
        task_yield_interval: Duration::from_millis(5),
        split_concurrency_adjustment_interval: Duration::from_secs(3600),
        notification_executor_threads: 1,
        ..TaskManagerConfig::default()
    }
}

/// Polls `predicate` on the calling thread until it returns `true` or
/// `timeout` elapses, returning the final predicate reading.
///
/// Used instead of a listener-based wait because [`crate::execution::SqlTaskExecution::new`]
/// can synchronously drive a task to completion before returning, so a
/// listener registered after construction can miss the transition entirely.
#[must_use]
pub fn wait_until(mut predicate: impl FnMut() -> bool, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    predicate()
}

/// Builds a ready-to-use executor and notification dispatcher pair with
/// [`test_config`].
#[must_use]
pub fn harness() -> (Arc<TaskExecutor>, Arc<NotificationExecutor>) {
    (TaskExecutor::new(test_config()), Arc::new(NotificationExecutor::new(1)))
}

/// A zero-sized [`Split`] marker; only its identity as a scheduled split
/// matters for these fixtures, never its content.
#[derive(Debug)]
pub struct TestSplit;
impl Split for TestSplit {}

/// Builds a [`ScheduledSplit`] for `plan_node` at sequence number `seq`,
/// carrying a [`TestSplit`].
#[must_use]
pub fn scheduled(seq: u64, plan_node: &str) -> ScheduledSplit {
    ScheduledSplit::new(SequenceId::new(seq), PlanNodeId::new(plan_node), Arc::new(TestSplit))
}

/// A driver that finishes the instant it is first polled, optionally
/// carrying a failure cause.
pub struct ImmediateDriver {
    finished: bool,
    failure: Option<String>,
}

impl ImmediateDriver {
    /// A driver that finishes successfully on its first `process_for`.
    #[must_use]
    pub fn ok() -> Self {
        Self { finished: false, failure: None }
    }

    /// A driver that finishes on its first `process_for`, reporting `cause`
    /// as its failure.
    #[must_use]
    pub fn failing(cause: impl Into<String>) -> Self {
        Self { finished: false, failure: Some(cause.into()) }
    }
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

/// A driver that never reports finished on its own; only [`Driver::close`]
/// moves it to `is_finished() == true`. Used to exercise cancellation and
/// abort paths against a driver that is permanently suspended.
pub struct SuspendForeverDriver {
    closed: Arc<AtomicBool>,
}

impl SuspendForeverDriver {
    /// Creates a driver, sharing its closed-flag with the caller so tests
    /// can assert `close()` was actually reached.
    #[must_use]
    pub fn new() -> (Self, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        (Self { closed: closed.clone() }, closed)
    }
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

/// A driver bound to a source plan node: reports `source_id()` and counts
/// the assignments it has been pushed via `update_splits`, finishing once it
/// has seen an assignment latched `no_more_splits`.
pub struct SourcedDriver {
    source: PlanNodeId,
    seen_no_more: bool,
    updates: u32,
}

impl SourcedDriver {
    /// Creates a driver bound to `source`.
    #[must_use]
    pub fn new(source: PlanNodeId) -> Self {
        Self { source, seen_no_more: false, updates: 0 }
    }

    /// How many times `update_splits` has been called.
    #[must_use]
    pub const fn updates(&self) -> u32 {
        self.updates
    }
}

impl Driver for SourcedDriver {
    fn source_id(&self) -> Option<&PlanNodeId> {
        Some(&self.source)
    }

    fn update_splits(&mut self, assignment: crate::split::SplitAssignment) {
        self.updates += 1;
        if assignment.no_more_splits() {
            self.seen_no_more = true;
        }
    }

    fn process_for(&mut self, _duration: Duration) -> BoxFuture {
        Box::pin(ready(()))
    }

    fn is_finished(&self) -> bool {
        self.seen_no_more
    }

    fn close(&mut self) {
        self.seen_no_more = true;
    }
}
