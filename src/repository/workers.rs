// src/repository/workers.rs

//! Bounded worker pool for download tasks
//!
//! Tasks are pushed onto a `flume` queue which is closed before any worker
//! starts; N scoped threads drain it and exit once it is empty. Outcomes
//! are gathered under a mutex so a failing task never disturbs the others.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Shared cancellation flag
///
/// Clones observe the same flag. Once cancelled, workers stop taking new
/// tasks; in-flight downloads notice it between chunks.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    cancelled: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Error::Cancelled)` once cancelled
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early with `Err(Error::Cancelled)`
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

/// Granularity at which [`Cancellation::sleep`] notices a cancel
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Outcome of a pool run
#[derive(Debug)]
pub struct WorkerReport<T, R> {
    /// Tasks that finished, with their results
    pub completed: Vec<(T, R)>,
    /// Tasks whose worker returned an error
    pub failed: Vec<(T, Error)>,
    /// Tasks never started because the run was cancelled
    pub skipped: Vec<T>,
}

impl<T, R> WorkerReport<T, R> {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }
}

/// Fixed number of worker threads over a closed task queue
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `worker` over every task, returning once all workers have exited
    pub fn run<T, R, F>(&self, tasks: Vec<T>, cancel: &Cancellation, worker: F) -> WorkerReport<T, R>
    where
        T: Send,
        R: Send,
        F: Fn(&T) -> Result<R> + Sync,
    {
        let total = tasks.len();
        let (sender, receiver) = flume::unbounded();
        for task in tasks {
            // The receiver lives until the end of this function
            let _ = sender.send(task);
        }
        drop(sender);

        let completed = Mutex::new(Vec::with_capacity(total));
        let failed = Mutex::new(Vec::new());
        let workers = self.concurrency.min(total);
        debug!("Running {} tasks on {} workers", total, workers);

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| {
                    while !cancel.is_cancelled() {
                        let Ok(task) = receiver.recv() else {
                            break;
                        };
                        match worker(&task) {
                            Ok(result) => completed.lock().push((task, result)),
                            Err(e) => failed.lock().push((task, e)),
                        }
                    }
                });
            }
        });

        let skipped: Vec<T> = receiver.drain().collect();
        if !skipped.is_empty() {
            warn!("{} tasks skipped after cancellation", skipped.len());
        }

        WorkerReport {
            completed: completed.into_inner(),
            failed: failed.into_inner(),
            skipped,
        }
    }
}
