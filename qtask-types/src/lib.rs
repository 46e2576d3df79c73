//! Identifier and value types shared across the `qtask` execution engine.
//!
//! These are the suite-wide "type substrate": small, `Copy` (or cheaply
//! `Clone`), `Send + Sync` wrappers that give the scheduler, the conductor,
//! and the control-plane boundary a single definition of what a task, a
//! pipeline, and a plan node are. Kept dependency-light (`serde` only) so
//! any crate in the workspace can depend on it without pulling in scheduling
//! or I/O machinery.

#![warn(missing_docs)]

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

/// Identifies one attempt of one partition of one stage of one query.
///
/// Immutable once created; carries no scheduling state of its own. Opaque to
/// the core beyond equality, hashing, and display — the control plane is
/// free to encode whatever addressing scheme it likes into the fields.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId {
    query_id: String,
    stage_id: u32,
    partition_id: u32,
    attempt: u32,
}

impl TaskId {
    /// Creates a new task id from its four addressing components.
    #[must_use]
    pub fn new(query_id: impl Into<String>, stage_id: u32, partition_id: u32, attempt: u32) -> Self {
        Self {
            query_id: query_id.into(),
            stage_id,
            partition_id,
            attempt,
        }
    }

    /// The query this task belongs to.
    #[must_use]
    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    /// The stage ordinal within the query's distributed plan.
    #[must_use]
    pub const fn stage_id(&self) -> u32 {
        self.stage_id
    }

    /// The partition (task) ordinal within the stage.
    #[must_use]
    pub const fn partition_id(&self) -> u32 {
        self.partition_id
    }

    /// The attempt number, incremented on a control-plane-driven retry.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.query_id, self.stage_id, self.partition_id, self.attempt
        )
    }
}

/// A dense, small integer identifying a pipeline within a single task.
///
/// Pipeline ids are assigned by the planner in compilation order and are
/// never sparse within a task, which lets the conductor use them as indices
/// into flat per-pipeline bookkeeping tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(u32);

impl PipelineId {
    /// Wraps a raw dense pipeline index.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw dense index.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipeline#{}", self.0)
    }
}

impl From<u32> for PipelineId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Opaque identifier naming a source operator in the compiled plan.
///
/// Two plan nodes with the same id are the same source across the task's
/// lifetime; the core never interprets the contents, only compares them.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanNodeId(String);

impl PlanNodeId {
    /// Wraps a planner-assigned plan node name.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the plan node name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlanNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PlanNodeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PlanNodeId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// A per-plan-node monotonic sequence number assigned by the split producer.
///
/// Sequence ids are never reused within a task's lifetime and order splits
/// for a given plan node; see `SplitAssignment` merge semantics in the
/// `qtask` crate for how this is used to de-duplicate and order delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceId(u64);

impl SequenceId {
    /// Wraps a raw sequence number.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw sequence number.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The smallest possible sequence id, used as an exclusive "nothing
    /// acknowledged yet" watermark.
    pub const MIN: Self = Self(0);
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A process-local generator of strictly increasing [`SequenceId`]s.
///
/// Intended for test harnesses and single-process embedders that produce
/// splits locally; a real cluster coordinator assigns sequence ids on the
/// wire and this type is not on that path.
#[derive(Debug, Default)]
pub struct SequenceIdGenerator {
    next: AtomicU32,
    next_hi: AtomicU32,
}

impl SequenceIdGenerator {
    /// Creates a generator starting after [`SequenceId::MIN`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(0),
            next_hi: AtomicU32::new(0),
        }
    }

    /// Allocates the next sequence id.
    pub fn next(&self) -> SequenceId {
        let lo = u64::from(self.next.fetch_add(1, Ordering::Relaxed));
        if lo == u64::from(u32::MAX) {
            self.next_hi.fetch_add(1, Ordering::Relaxed);
        }
        let hi = u64::from(self.next_hi.load(Ordering::Relaxed));
        SequenceId::new((hi << 32) | (lo + 1))
    }
}

/// A non-negative cost estimate attached to a [`Split`](../qtask/split/trait.Split.html).
///
/// The core never interprets this beyond "bigger means more work"; it is
/// surfaced to the admission/concurrency heuristics as an optional signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Weight(u64);

impl Weight {
    /// Wraps a raw non-negative weight.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The zero weight, used when a split carries no cost estimate.
    pub const ZERO: Self = Self(0);

    /// Returns the raw weight value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_display_format() {
        let id = TaskId::new("q1", 2, 3, 0);
        assert_eq!(id.to_string(), "q1.2.3.0");
        assert_eq!(id.query_id(), "q1");
        assert_eq!(id.stage_id(), 2);
        assert_eq!(id.partition_id(), 3);
        assert_eq!(id.attempt(), 0);
    }

    #[test]
    fn task_id_ordering_is_lexicographic_over_fields() {
        let a = TaskId::new("q1", 0, 0, 0);
        let b = TaskId::new("q1", 0, 0, 1);
        assert!(a < b);
    }

    #[test]
    fn pipeline_id_roundtrip() {
        let p = PipelineId::from(7u32);
        assert_eq!(p.as_u32(), 7);
        assert_eq!(p.to_string(), "pipeline#7");
    }

    #[test]
    fn plan_node_id_from_str() {
        let id: PlanNodeId = "orders_scan".into();
        assert_eq!(id.as_str(), "orders_scan");
    }

    #[test]
    fn sequence_id_generator_strictly_increasing() {
        let gen = SequenceIdGenerator::new();
        let mut prev = SequenceId::MIN;
        for _ in 0..1000 {
            let next = gen.next();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn weight_display_and_zero() {
        assert_eq!(Weight::ZERO.as_u64(), 0);
        assert_eq!(Weight::new(42).to_string(), "42");
    }

    #[test]
    fn task_id_serde_json_roundtrip() {
        let id = TaskId::new("q7", 1, 2, 3);
        let json = serde_json::to_string(&id).unwrap();
        let parsed: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn plan_node_id_serde_transparent() {
        let id = PlanNodeId::new("scan");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"scan\"");
    }
}
