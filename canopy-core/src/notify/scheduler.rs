//! Flush Scheduling
//!
//! The notifier never decides *when* deferred work runs; it hands a flush
//! task to a [`FlushScheduler`]. The contract is "run this after the
//! current synchronous unit of work", and each host defines what that unit
//! is:
//!
//! - [`ManualScheduler`] queues tasks until the host calls
//!   [`ManualScheduler::run_pending`], typically once per event-loop turn.
//! - [`TokioScheduler`] spawns each task on a tokio runtime, which runs it
//!   once the current task yields.
//!
//! Tasks are always run in the order they were scheduled.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// A deferred flush.
pub type FlushTask = Box<dyn FnOnce() + Send>;

/// Runs flush tasks after the current unit of work.
pub trait FlushScheduler: Send + Sync {
    fn schedule(&self, task: FlushTask);
}

/// Queues tasks until the host drains them.
#[derive(Default)]
pub struct ManualScheduler {
    queue: Mutex<VecDeque<FlushTask>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every queued task, including tasks queued by the tasks
    /// themselves. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // Release the lock before running: tasks schedule more tasks.
            let next = self.queue.lock().pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Number of queued tasks.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl FlushScheduler for ManualScheduler {
    fn schedule(&self, task: FlushTask) {
        self.queue.lock().push_back(task);
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

/// Spawns each flush as a task on a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

impl TokioScheduler {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the caller is running on, if any.
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

impl FlushScheduler for TokioScheduler {
    fn schedule(&self, task: FlushTask) {
        self.handle.spawn(async move { task() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn manual_scheduler_defers_until_drained() {
        let scheduler = ManualScheduler::new();
        let runs = Arc::new(AtomicI32::new(0));

        let counter = runs.clone();
        scheduler.schedule(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(scheduler.pending(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        assert_eq!(scheduler.run_pending(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn manual_scheduler_runs_in_order_including_requeued() {
        let scheduler = Arc::new(ManualScheduler::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let inner_scheduler = scheduler.clone();
        let first_order = order.clone();
        scheduler.schedule(Box::new(move || {
            first_order.lock().push(1);
            let nested_order = first_order.clone();
            inner_scheduler.schedule(Box::new(move || nested_order.lock().push(3)));
        }));
        let second_order = order.clone();
        scheduler.schedule(Box::new(move || second_order.lock().push(2)));

        assert_eq!(scheduler.run_pending(), 3);
        assert_eq!(*order.lock(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn tokio_scheduler_runs_after_yield() {
        let scheduler = TokioScheduler::current().expect("inside a runtime");
        let runs = Arc::new(AtomicI32::new(0));

        let counter = runs.clone();
        scheduler.schedule(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        for _ in 0..10 {
            tokio::task::yield_now().await;
            if runs.load(Ordering::SeqCst) == 1 {
                break;
            }
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
