//! Scenario 3 (spec §8): canceling after some splits have completed must
//! stop the task at CANCELED and keep it there.

use std::sync::Arc;
use std::time::Duration;

use qtask::buffer::LocalOutputBuffer;
use qtask::driver::{BoxFuture, Driver};
use qtask::execution::TaskPlan;
use qtask::pipeline::DriverFactory;
use qtask::split::SplitAssignment;
use qtask::task::Task;
use qtask::test_support::{scheduled, wait_until};
use qtask::TaskState;
use qtask_types::{PipelineId, PlanNodeId, TaskId};

/// Finishes on its first `process_for`, after a short sleep so 100 of
/// these admitted only a handful at a time give the test a window to
/// observe partial progress before canceling.
struct SlowDriver {
    finished: bool,
}

impl Driver for SlowDriver {
    fn process_for(&mut self, _duration: Duration) -> BoxFuture {
        std::thread::sleep(Duration::from_millis(3));
        self.finished = true;
        Box::pin(std::future::ready(()))
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn close(&mut self) {
        self.finished = true;
    }
}

#[test]
fn cancel_after_partial_completion_settles_at_canceled() {
    let config = qtask::config::TaskManagerConfig {
        executor_worker_threads: 4,
        notification_executor_threads: 1,
        initial_splits_per_node: 4,
        split_concurrency_adjustment_interval: Duration::from_secs(3600),
        ..qtask::config::TaskManagerConfig::default()
    };
    let executor = qtask::executor::TaskExecutor::new(config);
    let notification = Arc::new(qtask::notify::NotificationExecutor::new(1));
    let registry = Task::new(executor, notification);

    let plan_node = PlanNodeId::new("scan");
    let factory = Arc::new(DriverFactory::new(
        PipelineId::new(0),
        true,
        true,
        Some(plan_node.clone()),
        None,
        |_ctx| Box::new(SlowDriver { finished: false }) as Box<dyn Driver>,
    ));
    let plan = TaskPlan::new(vec![factory], vec![plan_node.clone()]);
    let buffer = LocalOutputBuffer::new(1024 * 1024);
    let task_id = TaskId::new("q", 0, 0, 0);
    let execution = registry.create_task(task_id.clone(), plan, buffer).unwrap();

    let splits: Vec<_> = (1..=100).map(|seq| scheduled(seq, "scan")).collect();
    let assignment = SplitAssignment::new(plan_node, splits, true);
    registry.add_split_assignments(&task_id, vec![assignment]).unwrap();

    assert!(wait_until(
        || execution.metrics().splits_completed.value() >= 10,
        Duration::from_secs(5)
    ));
    registry.cancel(&task_id);

    assert!(wait_until(|| execution.state().is_terminal(), Duration::from_secs(2)));
    assert_eq!(execution.state(), TaskState::Canceled);

    let completed_at_cancel = execution.metrics().splits_completed.value();
    assert!(completed_at_cancel < 100, "task should not have been allowed to drain all 100 splits");

    // First terminal state wins: a later fail() must not overwrite CANCELED.
    execution.fail("too late");
    assert_eq!(execution.state(), TaskState::Canceled);
}
