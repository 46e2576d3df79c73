//! Pipelines: the compiled-plan units that produce drivers (spec §3, §4.3).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use qtask_types::{PipelineId, PlanNodeId};

use crate::driver::{Driver, DriverContext};
use crate::runner::DriverSplitRunner;
use crate::split::ScheduledSplit;

/// A factory for the drivers of one pipeline.
///
/// Immutable once installed into a [`crate::execution::SqlTaskExecution`];
/// the closure stored in `build` is expected to close over whatever
/// operator-construction state the planner needs (spec §3's "opaque builder
/// closure").
pub struct DriverFactory {
    pipeline_id: PipelineId,
    is_input: bool,
    is_output: bool,
    source_plan_node: Option<PlanNodeId>,
    driver_instances: Option<u32>,
    build: Box<dyn Fn(DriverContext) -> Box<dyn Driver> + Send + Sync>,
}

impl DriverFactory {
    /// Creates a factory. `driver_instances` is only meaningful for
    /// task-lifecycle pipelines (those with `source_plan_node == None`);
    /// `None` means "exactly one instance" (spec §4.3 default).
    pub fn new(
        pipeline_id: PipelineId,
        is_input: bool,
        is_output: bool,
        source_plan_node: Option<PlanNodeId>,
        driver_instances: Option<u32>,
        build: impl Fn(DriverContext) -> Box<dyn Driver> + Send + Sync + 'static,
    ) -> Self {
        Self {
            pipeline_id,
            is_input,
            is_output,
            source_plan_node,
            driver_instances,
            build: Box::new(build),
        }
    }

    /// The pipeline this factory builds drivers for.
    #[must_use]
    pub const fn pipeline_id(&self) -> PipelineId {
        self.pipeline_id
    }

    /// True if this pipeline reads directly from a source plan node.
    #[must_use]
    pub const fn is_input(&self) -> bool {
        self.is_input
    }

    /// True if this pipeline writes to the task's output buffer.
    #[must_use]
    pub const fn is_output(&self) -> bool {
        self.is_output
    }

    /// The source plan node this pipeline is bound to, if split-lifecycle.
    #[must_use]
    pub const fn source_plan_node(&self) -> Option<&PlanNodeId> {
        self.source_plan_node.as_ref()
    }

    /// True if this factory is driven by incoming splits rather than by
    /// the task-lifecycle bootstrap.
    #[must_use]
    pub const fn is_split_lifecycle(&self) -> bool {
        self.source_plan_node.is_some()
    }

    /// The number of driver instances to create at task start, for
    /// task-lifecycle factories. Defaults to 1 when unspecified.
    #[must_use]
    pub fn effective_driver_instances(&self) -> u32 {
        self.driver_instances.unwrap_or(1)
    }

    /// Builds one driver.
    #[must_use]
    pub fn build(&self, context: DriverContext) -> Box<dyn Driver> {
        (self.build)(context)
    }
}

impl fmt::Debug for DriverFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverFactory")
            .field("pipeline_id", &self.pipeline_id)
            .field("is_input", &self.is_input)
            .field("is_output", &self.is_output)
            .field("source_plan_node", &self.source_plan_node)
            .field("driver_instances", &self.driver_instances)
            .finish_non_exhaustive()
    }
}

/// Binds a [`DriverFactory`] to one of the two lifecycle policies (spec
/// §4.3) and tracks whether it has latched "no more driver runners".
pub struct DriverSplitRunnerFactory {
    factory: Arc<DriverFactory>,
    no_more_driver_runners: AtomicBool,
    closed: AtomicBool,
}

impl DriverSplitRunnerFactory {
    /// Wraps a factory with lifecycle-tracking state.
    #[must_use]
    pub fn new(factory: Arc<DriverFactory>) -> Self {
        Self {
            factory,
            no_more_driver_runners: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// The wrapped factory.
    #[must_use]
    pub fn factory(&self) -> &Arc<DriverFactory> {
        &self.factory
    }

    /// Creates a driver runner bound to an optional partitioned split.
    ///
    /// For split-lifecycle factories, the caller supplies `Some(split)` for
    /// every scheduled split. For task-lifecycle factories, the caller
    /// invokes this `effective_driver_instances()` times with `None` at
    /// task start.
    #[must_use]
    pub fn create_driver_runner(&self, split: Option<ScheduledSplit>) -> DriverSplitRunner {
        DriverSplitRunner::new(self.factory.clone(), split)
    }

    /// Idempotently latches "no more driver runners will ever be created".
    pub fn no_more_driver_runner(&self) {
        self.no_more_driver_runners.store(true, Ordering::Release);
    }

    /// True once [`Self::no_more_driver_runner`] has been called.
    #[must_use]
    pub fn is_no_more_driver_runner(&self) -> bool {
        self.no_more_driver_runners.load(Ordering::Acquire)
    }

    /// Closes this factory if it has latched `no_more_driver_runners` and
    /// has no drivers currently under construction. `pending_creation` is
    /// the caller's current [`crate::status::PerPipelineStatus::pending_creation`]
    /// reading for this pipeline. Returns `true` if this call performed the
    /// close (so the caller only runs close side effects once).
    pub fn close_if_fully_created(&self, pending_creation: i32) -> bool {
        if self.is_no_more_driver_runner() && pending_creation == 0 {
            !self.closed.swap(true, Ordering::AcqRel)
        } else {
            false
        }
    }

    /// True once this factory has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Unconditionally marks this factory closed, regardless of in-flight
    /// driver construction. Used during task teardown, where construction
    /// is abandoned rather than waited out.
    pub fn force_close(&self) {
        self.no_more_driver_runner();
        self.closed.store(true, Ordering::Release);
    }
}

impl fmt::Debug for DriverSplitRunnerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverSplitRunnerFactory")
            .field("pipeline_id", &self.factory.pipeline_id())
            .field("no_more_driver_runners", &self.is_no_more_driver_runner())
            .field("closed", &self.is_closed())
            .finish()
    }
}
