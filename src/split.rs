//! Splits, scheduled splits, split assignments, and the per-plan-node
//! pending-splits state machine (spec §3, §4.2).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use qtask_types::{PlanNodeId, SequenceId, Weight};

use crate::error::{TaskError, TaskResult};

/// An opaque unit of input work for a source operator.
///
/// The core never inspects a split's contents; it only reads `weight()` as
/// an optional cost signal for scheduling heuristics.
pub trait Split: Send + Sync + fmt::Debug {
    /// A non-negative cost estimate. Defaults to [`Weight::ZERO`] for
    /// splits that carry no such estimate.
    fn weight(&self) -> Weight {
        Weight::ZERO
    }
}

/// A split paired with its plan node and the monotonic sequence id the
/// producer assigned it.
///
/// Equality and ordering are defined purely over `(plan_node_id,
/// sequence_id)`: two `ScheduledSplit`s for the same plan node and sequence
/// id are the same split, regardless of the opaque payload, matching the
/// "sequence ids never reused" invariant in spec §3.
#[derive(Clone)]
pub struct ScheduledSplit {
    sequence_id: SequenceId,
    plan_node_id: PlanNodeId,
    split: Arc<dyn Split>,
}

impl ScheduledSplit {
    /// Creates a new scheduled split.
    #[must_use]
    pub fn new(sequence_id: SequenceId, plan_node_id: PlanNodeId, split: Arc<dyn Split>) -> Self {
        Self {
            sequence_id,
            plan_node_id,
            split,
        }
    }

    /// The producer-assigned sequence id.
    #[must_use]
    pub const fn sequence_id(&self) -> SequenceId {
        self.sequence_id
    }

    /// The plan node (source operator) this split feeds.
    #[must_use]
    pub const fn plan_node_id(&self) -> &PlanNodeId {
        &self.plan_node_id
    }

    /// The underlying opaque split payload.
    #[must_use]
    pub fn split(&self) -> &Arc<dyn Split> {
        &self.split
    }
}

impl fmt::Debug for ScheduledSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledSplit")
            .field("sequence_id", &self.sequence_id)
            .field("plan_node_id", &self.plan_node_id)
            .finish_non_exhaustive()
    }
}

impl PartialEq for ScheduledSplit {
    fn eq(&self, other: &Self) -> bool {
        self.sequence_id == other.sequence_id && self.plan_node_id == other.plan_node_id
    }
}
impl Eq for ScheduledSplit {}

impl PartialOrd for ScheduledSplit {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScheduledSplit {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sequence_id.cmp(&other.sequence_id)
    }
}

/// A snapshot of splits known for one plan node, plus whether the producer
/// has declared it done.
///
/// Two assignments for the same plan node merge by union-of-splits (keyed
/// by sequence id, so re-delivery is a no-op) and OR-of-`no_more_splits`
/// (spec §3): once any delivery says "no more", the merged result says so
/// forever, even if a stale duplicate without the flag arrives later.
#[derive(Clone, Debug)]
pub struct SplitAssignment {
    plan_node_id: PlanNodeId,
    splits: BTreeMap<SequenceId, ScheduledSplit>,
    no_more_splits: bool,
}

impl SplitAssignment {
    /// Creates an assignment from a batch of scheduled splits.
    #[must_use]
    pub fn new(
        plan_node_id: PlanNodeId,
        splits: impl IntoIterator<Item = ScheduledSplit>,
        no_more_splits: bool,
    ) -> Self {
        Self {
            plan_node_id,
            splits: splits.into_iter().map(|s| (s.sequence_id(), s)).collect(),
            no_more_splits,
        }
    }

    /// The plan node this assignment targets.
    #[must_use]
    pub const fn plan_node_id(&self) -> &PlanNodeId {
        &self.plan_node_id
    }

    /// True once the producer has declared no further splits for this plan
    /// node will ever arrive.
    #[must_use]
    pub const fn no_more_splits(&self) -> bool {
        self.no_more_splits
    }

    /// The splits currently in this assignment, ordered by sequence id.
    pub fn splits(&self) -> impl Iterator<Item = &ScheduledSplit> {
        self.splits.values()
    }

    /// Merges `other` into `self`: union of splits, OR of `no_more_splits`.
    ///
    /// `other` must target the same plan node; callers (the conductor) are
    /// responsible for routing by plan node before calling this.
    pub fn merge(&mut self, other: &Self) {
        debug_assert_eq!(
            self.plan_node_id, other.plan_node_id,
            "merging split assignments for different plan nodes"
        );
        for (id, split) in &other.splits {
            self.splits.entry(*id).or_insert_with(|| split.clone());
        }
        self.no_more_splits |= other.no_more_splits;
    }

    /// Returns a copy containing only splits with `sequence_id >
    /// max_acknowledged`.
    #[must_use]
    pub fn filtered_after(&self, max_acknowledged: SequenceId) -> Self {
        Self {
            plan_node_id: self.plan_node_id.clone(),
            splits: self
                .splits
                .iter()
                .filter(|(id, _)| **id > max_acknowledged)
                .map(|(id, s)| (*id, s.clone()))
                .collect(),
            no_more_splits: self.no_more_splits,
        }
    }

    /// The highest sequence id present in this assignment, if any.
    #[must_use]
    pub fn max_sequence_id(&self) -> Option<SequenceId> {
        self.splits.keys().next_back().copied()
    }
}

/// The lifecycle state of a per-plan-node pending-splits queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingSplitsState {
    /// Still accepting new splits via `add`.
    Adding,
    /// The producer has declared no more splits; draining continues but no
    /// further writes are accepted.
    NoMore,
    /// Fully drained and cleaned up. Terminal.
    Finished,
}

/// Per-source-plan-node queue of unscheduled splits plus its 3-state
/// mini-FSM (spec §3, §4.2).
#[derive(Debug)]
pub struct PendingSplits {
    plan_node_id: PlanNodeId,
    splits: BTreeMap<SequenceId, ScheduledSplit>,
    state: PendingSplitsState,
}

impl PendingSplits {
    /// Creates an empty, `ADDING`-state queue for the given plan node.
    #[must_use]
    pub fn new(plan_node_id: PlanNodeId) -> Self {
        Self {
            plan_node_id,
            splits: BTreeMap::new(),
            state: PendingSplitsState::Adding,
        }
    }

    /// The plan node this queue tracks.
    #[must_use]
    pub const fn plan_node_id(&self) -> &PlanNodeId {
        &self.plan_node_id
    }

    /// The current FSM state.
    #[must_use]
    pub const fn state(&self) -> PendingSplitsState {
        self.state
    }

    /// Number of splits currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.splits.len()
    }

    /// True if no splits are currently queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.splits.is_empty()
    }

    /// Adds a split, deduplicating by sequence id. Valid only in `ADDING`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::SplitAfterNoMore`] if called outside `ADDING`.
    pub fn add(&mut self, split: ScheduledSplit) -> TaskResult<()> {
        if self.state != PendingSplitsState::Adding {
            return Err(TaskError::SplitAfterNoMore {
                plan_node: self.plan_node_id.clone(),
            });
        }
        self.splits.entry(split.sequence_id()).or_insert(split);
        Ok(())
    }

    /// Merges a whole assignment snapshot in one call, used when ingesting
    /// an incoming `SplitAssignment`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::SplitAfterNoMore`] if new splits are presented
    /// after this queue already reached `NO_MORE`/`FINISHED` state *and*
    /// those splits were not already known.
    pub fn merge_assignment(&mut self, assignment: &SplitAssignment) -> TaskResult<()> {
        for split in assignment.splits() {
            if self.splits.contains_key(&split.sequence_id()) {
                continue;
            }
            if self.state != PendingSplitsState::Adding {
                return Err(TaskError::SplitAfterNoMore {
                    plan_node: self.plan_node_id.clone(),
                });
            }
            self.splits.insert(split.sequence_id(), split.clone());
        }
        if assignment.no_more_splits() {
            self.set_no_more();
        }
        Ok(())
    }

    /// Idempotent `ADDING -> NO_MORE` transition.
    pub fn set_no_more(&mut self) {
        if self.state == PendingSplitsState::Adding {
            self.state = PendingSplitsState::NoMore;
        }
    }

    /// Returns and clears the currently queued splits, in sequence-id
    /// order. Legal in `ADDING` or `NO_MORE`.
    ///
    /// # Panics
    ///
    /// Panics if called after `FINISHED` — draining a finished queue is a
    /// programmer error, not a recoverable condition.
    pub fn drain(&mut self) -> Vec<ScheduledSplit> {
        assert_ne!(
            self.state,
            PendingSplitsState::Finished,
            "drain() called on a FINISHED pending-splits queue for {}",
            self.plan_node_id
        );
        std::mem::take(&mut self.splits).into_values().collect()
    }

    /// Transitions to `FINISHED`. Requires `NO_MORE` and an empty queue.
    ///
    /// # Panics
    ///
    /// Panics if the preconditions are violated; this mirrors spec §4.2's
    /// "violating any precondition is a programmer error and must fail
    /// loudly".
    pub fn mark_cleaned_up(&mut self) {
        assert_eq!(
            self.state,
            PendingSplitsState::NoMore,
            "mark_cleaned_up() requires NO_MORE state for {}",
            self.plan_node_id
        );
        assert!(
            self.splits.is_empty(),
            "mark_cleaned_up() requires an empty queue for {}",
            self.plan_node_id
        );
        self.state = PendingSplitsState::Finished;
    }
}
