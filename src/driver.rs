//! The driver/operator contract.
//!
//! Operators are opaque to this crate: a `Driver` is "a chain of operators
//! plus a bounded `process_for` method" (spec §2.4), and this crate never
//! looks inside that chain. Concrete operator implementations are an
//! external collaborator (spec §1, out of scope); this module only defines
//! the seam the scheduler drives.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use qtask_types::PlanNodeId;

use crate::split::SplitAssignment;

/// A boxed, type-erased future, following the teacher's `StoredTask`
/// type-erasure pattern (`runtime::stored_task::StoredTask`) rather than
/// making every caller of `Driver` generic over a future type.
pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A single concurrent execution of a pipeline instance.
///
/// Implementors are not required to be `Sync`; the scheduler only ever
/// touches a given `Driver` from one worker thread at a time (enforced by
/// [`crate::runner::DriverSplitRunner`]'s per-runner mutex).
pub trait Driver: Send {
    /// Returns the plan node this driver pulls splits for, if it is a
    /// source pipeline driver. Non-source pipelines return `None`.
    fn source_id(&self) -> Option<&PlanNodeId> {
        None
    }

    /// Applies an accumulated split assignment snapshot for one plan node.
    ///
    /// Must be idempotent: the same assignment (or a strict superset of a
    /// previously delivered one) may be presented more than once, and in any
    /// order relative to assignments for other plan nodes.
    fn update_splits(&mut self, assignment: SplitAssignment) {
        let _ = assignment;
    }

    /// Runs the driver for up to `duration`, then returns a future that
    /// resolves once the driver can make progress again.
    ///
    /// If the driver used the entire slice productively and is immediately
    /// runnable again, the returned future should already be `Ready`. If the
    /// driver is now blocked (on splits, on memory, on a downstream build
    /// side), the future resolves only when that condition clears.
    fn process_for(&mut self, duration: Duration) -> BoxFuture;

    /// True once this driver has no more work to do, ever.
    fn is_finished(&self) -> bool;

    /// The cause of failure, if this driver reached `is_finished() == true`
    /// because of an error rather than exhausting its input. Consulted by
    /// [`crate::runner::DriverSplitRunner`] once the driver reports finished;
    /// a driver that returns `Some` here is reported to the conductor as a
    /// failed runner rather than a completed one.
    fn failure_cause(&self) -> Option<String> {
        None
    }

    /// Releases any resources held by the driver. Must be idempotent.
    fn close(&mut self);
}

impl fmt::Debug for dyn Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("dyn Driver")
            .field("source_id", &self.source_id())
            .field("is_finished", &self.is_finished())
            .finish()
    }
}

/// Context handed to a [`crate::pipeline::DriverFactory`] when it builds a
/// driver.
///
/// Carries the identity the driver needs to report itself (pipeline id) and
/// nothing else — the factory closure supplied by the planner is expected
/// to close over whatever operator-construction state it needs.
#[derive(Debug, Clone)]
pub struct DriverContext {
    pipeline_id: qtask_types::PipelineId,
}

impl DriverContext {
    /// Creates a context for drivers of the given pipeline.
    #[must_use]
    pub const fn new(pipeline_id: qtask_types::PipelineId) -> Self {
        Self { pipeline_id }
    }

    /// The pipeline this driver belongs to.
    #[must_use]
    pub const fn pipeline_id(&self) -> qtask_types::PipelineId {
        self.pipeline_id
    }
}
