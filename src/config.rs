//! Tunables for the task executor and conductor.
//!
//! Every configuration option named in spec §6 lives on
//! [`TaskManagerConfig`]. Defaults are chosen to be safe for a single
//! embedded task manager in a test process; a production deployment is
//! expected to override them from its own configuration system.

use std::time::Duration;

/// Tunables shared by every task registered with a [`crate::executor::TaskExecutor`].
#[derive(Debug, Clone, PartialEq)]
pub struct TaskManagerConfig {
    /// Starting concurrent-driver cap per task.
    ///
    /// Bounds concurrency when a task is new, protecting against pathological
    /// startup bursts (e.g. a task whose first split batch contains
    /// thousands of splits).
    pub initial_splits_per_node: u32,

    /// Hard upper bound on concurrent drivers per task, regardless of how
    /// much the concurrency-adjustment heuristic would like to raise it.
    pub max_drivers_per_task: u32,

    /// Cadence of the up/down concurrency-cap heuristic.
    pub split_concurrency_adjustment_interval: Duration,

    /// Upper bound on one `process_for` call; the scheduler never hands a
    /// driver a longer slice than this.
    pub task_yield_interval: Duration,

    /// Number of threads backing the dedicated notification executor that
    /// runs state-machine listeners and completion callbacks.
    pub notification_executor_threads: usize,

    /// Number of worker threads in the cooperative scheduler's thread pool.
    pub executor_worker_threads: usize,

    /// Output-buffer utilization below which the concurrency-adjustment
    /// heuristic raises a task's cap.
    pub low_utilization_watermark: f64,

    /// Output-buffer utilization above which the concurrency-adjustment
    /// heuristic lowers a task's cap.
    pub high_utilization_watermark: f64,
}

impl TaskManagerConfig {
    /// Validates that the configuration is internally consistent.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated constraint.
    pub fn validate(&self) -> Result<(), String> {
        if self.initial_splits_per_node == 0 {
            return Err("initial_splits_per_node must be at least 1".to_string());
        }
        if self.max_drivers_per_task < self.initial_splits_per_node {
            return Err("max_drivers_per_task must be >= initial_splits_per_node".to_string());
        }
        if self.executor_worker_threads == 0 {
            return Err("executor_worker_threads must be at least 1".to_string());
        }
        if self.notification_executor_threads == 0 {
            return Err("notification_executor_threads must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.low_utilization_watermark) {
            return Err("low_utilization_watermark must be in [0.0, 1.0]".to_string());
        }
        if !(0.0..=1.0).contains(&self.high_utilization_watermark) {
            return Err("high_utilization_watermark must be in [0.0, 1.0]".to_string());
        }
        if self.low_utilization_watermark >= self.high_utilization_watermark {
            return Err(
                "low_utilization_watermark must be below high_utilization_watermark".to_string(),
            );
        }
        Ok(())
    }

    /// Loads a configuration from a TOML string, falling back to defaults
    /// for any field the document omits.
    ///
    /// # Errors
    ///
    /// Returns an error if the document fails to parse or the resulting
    /// configuration fails [`Self::validate`].
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(contents: &str) -> Result<Self, String> {
        #[derive(serde::Deserialize, Default)]
        #[serde(default)]
        struct Partial {
            initial_splits_per_node: Option<u32>,
            max_drivers_per_task: Option<u32>,
            split_concurrency_adjustment_interval_ms: Option<u64>,
            task_yield_interval_ms: Option<u64>,
            notification_executor_threads: Option<usize>,
            executor_worker_threads: Option<usize>,
            low_utilization_watermark: Option<f64>,
            high_utilization_watermark: Option<f64>,
        }

        let partial: Partial = toml::from_str(contents).map_err(|e| e.to_string())?;
        let defaults = Self::default();
        let config = Self {
            initial_splits_per_node: partial
                .initial_splits_per_node
                .unwrap_or(defaults.initial_splits_per_node),
            max_drivers_per_task: partial
                .max_drivers_per_task
                .unwrap_or(defaults.max_drivers_per_task),
            split_concurrency_adjustment_interval: partial
                .split_concurrency_adjustment_interval_ms
                .map_or(defaults.split_concurrency_adjustment_interval, Duration::from_millis),
            task_yield_interval: partial
                .task_yield_interval_ms
                .map_or(defaults.task_yield_interval, Duration::from_millis),
            notification_executor_threads: partial
                .notification_executor_threads
                .unwrap_or(defaults.notification_executor_threads),
            executor_worker_threads: partial
                .executor_worker_threads
                .unwrap_or(defaults.executor_worker_threads),
            low_utilization_watermark: partial
                .low_utilization_watermark
                .unwrap_or(defaults.low_utilization_watermark),
            high_utilization_watermark: partial
                .high_utilization_watermark
                .unwrap_or(defaults.high_utilization_watermark),
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a TOML file on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or fails to parse.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
        Self::from_toml_str(&contents)
    }
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(4);
        Self {
            initial_splits_per_node: 4,
            max_drivers_per_task: 32,
            split_concurrency_adjustment_interval: Duration::from_secs(1),
            task_yield_interval: Duration::from_millis(1000),
            notification_executor_threads: 2,
            executor_worker_threads: cores,
            low_utilization_watermark: 0.5,
            high_utilization_watermark: 0.8,
        }
    }
}
