//! Fixed-size worker pool over a closed job queue.
//!
//! All jobs are enqueued up front and the sender is dropped, so workers see
//! the queue close once it drains. `run` returns only after every worker has
//! exited; callers rely on that join as the barrier between phases.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use parking_lot::Mutex;

use super::control::BatchControl;

/// Default number of concurrent workers.
pub const DEFAULT_POOL_SIZE: usize = 10;

/// Bounded pool of OS threads.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    size: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

impl WorkerPool {
    /// Create a pool of `size` workers (minimum 1).
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `work` over every job and wait for all workers to exit.
    ///
    /// Before each job a worker passes the control checkpoint: it blocks while
    /// the batch is paused and abandons the remaining queue once cancelled.
    /// Returns the number of jobs that were executed.
    pub fn run<T, F>(&self, jobs: Vec<T>, control: &BatchControl, work: F) -> usize
    where
        T: Send,
        F: Fn(T) + Sync,
    {
        if jobs.is_empty() {
            return 0;
        }

        let workers = self.size.min(jobs.len());
        let (sender, receiver) = mpsc::channel();
        for job in jobs {
            // The receiver is alive until the scope below ends.
            let _ = sender.send(job);
        }
        drop(sender);

        let queue = Mutex::new(receiver);
        let executed = AtomicUsize::new(0);

        thread::scope(|scope| {
            for worker in 0..workers {
                let queue = &queue;
                let executed = &executed;
                let work = &work;
                scope.spawn(move || loop {
                    if !control.checkpoint() {
                        tracing::debug!(worker, "worker stopping: batch cancelled");
                        break;
                    }

                    let job = match queue.lock().recv() {
                        Ok(job) => job,
                        Err(_) => break,
                    };

                    work(job);
                    executed.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        executed.into_inner()
    }
}
