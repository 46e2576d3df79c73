//! Scenario 1 (spec §8): a single source plan node draining five splits to
//! a clean finish.

use std::sync::Arc;
use std::time::Duration;

use qtask::buffer::LocalOutputBuffer;
use qtask::driver::Driver;
use qtask::execution::TaskPlan;
use qtask::pipeline::DriverFactory;
use qtask::split::SplitAssignment;
use qtask::task::Task;
use qtask::test_support::{harness, scheduled, wait_until, ImmediateDriver};
use qtask::TaskState;
use qtask_types::{PipelineId, PlanNodeId, TaskId};

#[test]
fn five_splits_drain_through_flushing_to_finished() {
    let (executor, notification) = harness();
    let registry = Task::new(executor, notification);

    let plan_node = PlanNodeId::new("scan");
    let factory = Arc::new(DriverFactory::new(
        PipelineId::new(0),
        true,
        true,
        Some(plan_node.clone()),
        None,
        |_ctx| Box::new(ImmediateDriver::ok()) as Box<dyn Driver>,
    ));
    let plan = TaskPlan::new(vec![factory], vec![plan_node.clone()]);
    let buffer = LocalOutputBuffer::new(1024);
    let task_id = TaskId::new("q", 0, 0, 0);
    let execution = registry.create_task(task_id.clone(), plan, buffer).unwrap();

    assert_eq!(execution.state(), TaskState::Running);

    let splits: Vec<_> = (1..=5).map(|seq| scheduled(seq, "scan")).collect();
    let assignment = SplitAssignment::new(plan_node.clone(), splits, true);
    registry.add_split_assignments(&task_id, vec![assignment]).unwrap();

    assert!(wait_until(|| execution.state().is_terminal(), Duration::from_secs(2)));
    assert_eq!(execution.state(), TaskState::Finished);
    assert!(registry.get_no_more_splits(&task_id).unwrap().contains(&plan_node));
    assert_eq!(execution.metrics().splits_completed.value(), 5);
    assert_eq!(execution.metrics().splits_failed.value(), 0);
}
