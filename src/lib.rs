//! qtask: per-node cooperative task execution engine.
//!
//! This crate is the single-node core of a distributed SQL query engine's
//! task execution layer. Given a compiled fragment of a distributed query
//! plan — an ordered set of operator pipelines plus a destination output
//! buffer — it:
//!
//! - multiplexes thousands of short-lived units of work ("drivers") over a
//!   bounded thread pool with cooperative time-slicing ([`executor`]),
//! - ingests a streaming feed of work units ("splits") from the cluster
//!   coordinator and binds them to pipelines with the correct lifecycle
//!   ([`split`], [`pipeline`]),
//! - propagates completion, cancellation, and failure across the output
//!   buffer, pipelines, and drivers without leaks ([`execution`]),
//! - exposes a clean task-level state machine to the control plane
//!   ([`state_machine`]).
//!
//! # What this crate does *not* do
//!
//! SQL parsing, analysis, and planning; expression evaluation and operator
//! implementations (operators are opaque, see [`driver`]); cluster-wide
//! coordination (stage placement, global scheduling, cross-node retries);
//! the output buffer's wire format and transport. Those are the concern of
//! the surrounding system; this crate only consumes the abstractions it
//! needs from them.
//!
//! # Module map
//!
//! - [`clock`]: monotonic time source, abstracted for deterministic tests.
//! - [`memory`]: process-wide byte accounting with backpressure futures.
//! - [`buffer`]: the abstract output buffer contract this core couples to.
//! - [`driver`]: the minimal operator/driver contract.
//! - [`split`]: splits, scheduled splits, assignments, and their per-plan-node
//!   pending-splits state machine.
//! - [`pipeline`]: driver factories and the split/task-lifecycle policy that
//!   wraps them.
//! - [`runner`]: the single-driver execution unit handed to the executor.
//! - [`status`]: task-wide and per-pipeline driver bookkeeping.
//! - [`state_machine`]: the task-level state machine.
//! - [`executor`]: the cooperative, multi-task thread pool.
//! - [`execution`]: the conductor tying all of the above together.
//! - [`task`]: the external-facing façade (`create_task`, listeners, etc).
//! - [`config`]: tunables.
//! - [`metrics`]: counters and gauges for observability.
//! - [`pressure`]: an atomic headroom gauge used as a concurrency signal.
//! - [`notify`]: the dedicated executor that listener callbacks run on.
//! - [`error`]: the crate's error taxonomy.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod buffer;
pub mod clock;
pub mod config;
pub mod driver;
pub mod error;
pub mod execution;
pub mod executor;
pub mod memory;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod pressure;
pub mod runner;
pub mod split;
pub mod state_machine;
pub mod status;
pub mod task;

#[cfg(any(test, feature = "test-internals"))]
pub mod test_support;

pub use qtask_types::{PipelineId, PlanNodeId, SequenceId, SequenceIdGenerator, TaskId, Weight};

pub use error::{TaskError, TaskResult};
pub use state_machine::TaskState;
pub use task::Task;
