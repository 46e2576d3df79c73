//! Scenario 6 (spec §8): once every driver has completed and the buffer is
//! draining (FLUSHING), a buffer failure must fail the task with that
//! cause rather than leave it stuck in FLUSHING.

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

const FAILURE_CAUSE: &str = "consumer disconnected mid-flush";

#[test]
fn buffer_failure_while_flushing_fails_the_task_with_its_cause() {
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
    // Leave a page undrained so no_more_pages() lands on NO_MORE_PAGES
    // (not a direct finish), giving the buffer a window to fail instead
    // of completing drain on its own.
    let buffer = LocalOutputBuffer::new(1024);
    buffer.add_page(64);
    let task_id = TaskId::new("q", 0, 0, 0);
    let execution = registry.create_task(task_id.clone(), plan, buffer.clone()).unwrap();

    let splits = vec![scheduled(1, "scan")];
    let assignment = SplitAssignment::new(plan_node, splits, true);
    registry.add_split_assignments(&task_id, vec![assignment]).unwrap();

    assert!(wait_until(|| execution.state() == TaskState::Flushing, Duration::from_secs(2)));

    buffer.fail(FAILURE_CAUSE);

    assert!(wait_until(|| execution.state().is_terminal(), Duration::from_secs(2)));
    match execution.state() {
        TaskState::Failed(cause) => assert_eq!(cause.0, FAILURE_CAUSE),
        other => panic!("expected Failed, got {other:?}"),
    }
}
