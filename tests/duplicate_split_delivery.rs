//! Scenario 2 (spec §8): the same assignment delivered twice must not
//! create duplicate drivers.

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
fn redelivering_the_same_assignment_creates_each_split_driver_once() {
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

    let splits = vec![scheduled(1, "scan"), scheduled(2, "scan")];
    let assignment = SplitAssignment::new(plan_node.clone(), splits, false);
    registry.add_split_assignments(&task_id, vec![assignment.clone()]).unwrap();
    registry.add_split_assignments(&task_id, vec![assignment]).unwrap();

    let closing = SplitAssignment::new(plan_node, vec![], true);
    registry.add_split_assignments(&task_id, vec![closing]).unwrap();

    assert!(wait_until(|| execution.state().is_terminal(), Duration::from_secs(2)));
    assert_eq!(execution.state(), TaskState::Finished);
    assert_eq!(execution.metrics().splits_completed.value(), 2);
}
