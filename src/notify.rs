//! The dedicated notification executor.
//!
//! Per spec §5, `add_split_assignments` and the task-completion check must
//! never run on a worker thread, and state-machine/output-buffer listeners
//! must not run while their owner's lock is held. This module is the thread
//! pool those callbacks get dispatched onto, kept deliberately separate from
//! [`crate::executor::TaskExecutor`]'s worker pool so a slow listener can
//! never starve driver scheduling.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct Shared {
    queue: Mutex<VecDeque<Job>>,
    condvar: Condvar,
    shutdown: Mutex<bool>,
}

/// A small fixed-size pool that runs submitted closures off the calling
/// thread, in submission order per worker (not globally ordered across
/// workers).
pub struct NotificationExecutor {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl NotificationExecutor {
    /// Spawns `threads` worker threads waiting on an internal queue.
    ///
    /// # Panics
    ///
    /// Panics if `threads` is zero.
    #[must_use]
    pub fn new(threads: usize) -> Self {
        assert!(threads > 0, "NotificationExecutor requires at least one thread");
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            shutdown: Mutex::new(false),
        });
        let handles = (0..threads)
            .map(|index| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("qtask-notify-{index}"))
                    .spawn(move || Self::worker_loop(&shared))
                    .expect("failed to spawn notification executor thread")
            })
            .collect();
        Self {
            shared,
            handles: Mutex::new(handles),
        }
    }

    fn worker_loop(shared: &Shared) {
        loop {
            let mut queue = shared.queue.lock().expect("notification queue lock poisoned");
            loop {
                if let Some(job) = queue.pop_front() {
                    drop(queue);
                    job();
                    break;
                }
                if *shared.shutdown.lock().expect("shutdown flag lock poisoned") {
                    return;
                }
                queue = shared
                    .condvar
                    .wait(queue)
                    .expect("notification queue condvar wait poisoned");
            }
        }
    }

    /// Submits a closure to run on the next available worker thread.
    pub fn spawn(&self, job: impl FnOnce() + Send + 'static) {
        let mut queue = self.shared.queue.lock().expect("notification queue lock poisoned");
        queue.push_back(Box::new(job));
        drop(queue);
        self.shared.condvar.notify_one();
    }

    /// Number of jobs currently queued (not yet picked up by a worker).
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().expect("notification queue lock poisoned").len()
    }
}

impl Drop for NotificationExecutor {
    fn drop(&mut self) {
        *self.shared.shutdown.lock().expect("shutdown flag lock poisoned") = true;
        self.shared.condvar.notify_all();
        for handle in self.handles.get_mut().expect("handles lock poisoned").drain(..) {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for NotificationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationExecutor")
            .field("queue_len", &self.queue_len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn runs_submitted_jobs() {
        let executor = NotificationExecutor::new(2);
        let (tx, rx) = mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            executor.spawn(move || tx.send(i).unwrap());
        }
        drop(tx);
        let mut received: Vec<i32> = rx.iter().collect();
        received.sort_unstable();
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn jobs_run_off_the_calling_thread() {
        let executor = NotificationExecutor::new(1);
        let calling_thread = std::thread::current().id();
        let (tx, rx) = mpsc::channel();
        executor.spawn(move || tx.send(std::thread::current().id()).unwrap());
        let job_thread = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(calling_thread, job_thread);
    }

    #[test]
    fn concurrent_submissions_all_complete() {
        let executor = Arc::new(NotificationExecutor::new(4));
        let count = Arc::new(AtomicUsize::new(0));
        let mut threads = Vec::new();
        for _ in 0..4 {
            let executor = executor.clone();
            let count = count.clone();
            threads.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    let count = count.clone();
                    executor.spawn(move || {
                        count.fetch_add(1, Ordering::Relaxed);
                    });
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }
        // Dropping joins every worker thread, which drains the queue first.
        let executor = Arc::try_unwrap(executor).expect("no other owner should remain");
        drop(executor);
        assert_eq!(count.load(Ordering::Relaxed), 200);
    }
}
