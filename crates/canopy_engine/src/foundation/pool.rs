//! Worker pool for fan-out/join dispatch
//!
//! The update scheduler, the render registry and the time wheel all need the
//! same primitive: run a set of independent jobs in parallel and wait for every
//! one of them before moving on. [`WorkerPool::scatter`] is that barrier. A
//! panicking job is reported as a [`TaskPanic`] in its result slot; the worker
//! survives and the remaining jobs still run.

use crossbeam_channel::{bounded, unbounded, Sender};
use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static ON_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// A job panicked instead of returning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskPanic {
    message: String,
}

impl TaskPanic {
    /// Create a panic report with the given message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Panic message, if the payload was a string
    pub fn message(&self) -> &str {
        &self.message
    }

    fn from_payload(payload: &(dyn Any + Send)) -> Self {
        if let Some(message) = payload.downcast_ref::<&str>() {
            Self::new(*message)
        } else if let Some(message) = payload.downcast_ref::<String>() {
            Self::new(message.clone())
        } else {
            Self::new("non-string panic payload")
        }
    }
}

impl fmt::Display for TaskPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task panicked: {}", self.message)
    }
}

impl std::error::Error for TaskPanic {}

/// Run `job`, converting a panic into a [`TaskPanic`]
pub fn run_guarded<T, F>(job: F) -> Result<T, TaskPanic>
where
    F: FnOnce() -> T,
{
    panic::catch_unwind(AssertUnwindSafe(job)).map_err(|payload| TaskPanic::from_payload(payload.as_ref()))
}

/// Fixed-size thread pool for parallel execution
pub struct WorkerPool {
    workers: Vec<Worker>,
    sender: Option<Sender<Job>>,
}

impl WorkerPool {
    /// Create a pool with `size` workers (0 = one per available core)
    pub fn new(size: usize) -> Self {
        let size = if size == 0 {
            thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            size
        };

        let (sender, receiver) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(size);

        for id in 0..size {
            let receiver = receiver.clone();
            let spawned = thread::Builder::new()
                .name(format!("canopy-worker-{id}"))
                .spawn(move || {
                    ON_WORKER.with(|flag| flag.set(true));
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                });
            match spawned {
                Ok(thread) => workers.push(Worker { id, thread: Some(thread) }),
                Err(err) => log::warn!("Failed to spawn worker {}: {}", id, err),
            }
        }

        log::debug!("Worker pool started with {} threads", workers.len());

        Self {
            workers,
            sender: Some(sender),
        }
    }

    /// Number of worker threads
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Whether the calling thread is one of this process's pool workers
    pub fn on_worker_thread() -> bool {
        ON_WORKER.with(Cell::get)
    }

    /// Run every job and wait for all of them
    ///
    /// Results come back in submission order. Jobs run inline on the calling
    /// thread when there is nothing to parallelize, when the pool has no
    /// workers, or when the caller is itself a pool worker (a worker blocking
    /// on its own pool could otherwise starve it).
    pub fn scatter<T, F>(&self, jobs: Vec<F>) -> Vec<Result<T, TaskPanic>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let sender = match &self.sender {
            Some(sender) if jobs.len() > 1 && !self.workers.is_empty() && !Self::on_worker_thread() => sender,
            _ => return jobs.into_iter().map(run_guarded).collect(),
        };

        let count = jobs.len();
        let (result_tx, result_rx) = bounded(count);

        for (index, job) in jobs.into_iter().enumerate() {
            let result_tx = result_tx.clone();
            let wrapped: Job = Box::new(move || {
                let result = run_guarded(job);
                // The receiver only disappears if the caller itself unwound.
                let _ = result_tx.send((index, result));
            });
            if let Err(rejected) = sender.send(wrapped) {
                (rejected.into_inner())();
            }
        }
        drop(result_tx);

        let mut slots: Vec<Option<Result<T, TaskPanic>>> = (0..count).map(|_| None).collect();
        for (index, result) in result_rx.iter() {
            slots[index] = Some(result);
        }

        slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(TaskPanic::new("job dropped before it ran"))))
            .collect()
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool").field("workers", &self.workers.len()).finish()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel ends every worker's recv loop.
        self.sender.take();
        if Self::on_worker_thread() {
            // Dropped from inside a job: joining would wait on ourselves.
            return;
        }
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    log::warn!("Worker {} exited abnormally", worker.id);
                }
            }
        }
    }
}

struct Worker {
    id: usize,
    thread: Option<thread::JoinHandle<()>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_scatter_preserves_submission_order() {
        let pool = WorkerPool::new(4);
        let jobs: Vec<_> = (0..16).map(|i| move || i * 2).collect();
        let results: Vec<_> = pool.scatter(jobs).into_iter().map(Result::unwrap).collect();
        assert_eq!(results, (0..16).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_panicking_job_does_not_abort_siblings() {
        let pool = WorkerPool::new(2);
        let completed = Arc::new(AtomicUsize::new(0));
        let jobs: Vec<Box<dyn FnOnce() + Send>> = (0..5)
            .map(|i| {
                let completed = Arc::clone(&completed);
                Box::new(move || {
                    if i == 2 {
                        panic!("job two failed");
                    }
                    completed.fetch_add(1, Ordering::SeqCst);
                }) as Box<dyn FnOnce() + Send>
            })
            .collect();

        let results = pool.scatter(jobs);
        assert_eq!(completed.load(Ordering::SeqCst), 4);
        assert_eq!(results[2], Err(TaskPanic::new("job two failed")));
        assert!(results.iter().enumerate().all(|(i, r)| i == 2 || r.is_ok()));
    }

    #[test]
    fn test_nested_scatter_runs_inline() {
        let pool = Arc::new(WorkerPool::new(1));
        let inner_pool = Arc::clone(&pool);
        let outer: Vec<Box<dyn FnOnce() -> i32 + Send>> = vec![
            Box::new(move || {
                let inner: Vec<_> = (0..3).map(|i| move || i + 1).collect();
                inner_pool.scatter(inner).into_iter().map(Result::unwrap).sum::<i32>()
            }),
            Box::new(|| 0),
        ];
        let results = pool.scatter(outer);
        assert_eq!(results[0], Ok(6));
    }
}
