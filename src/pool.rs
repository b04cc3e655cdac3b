//! Executors for asynchronous handler delivery
//!
//! All executors implement [`Executor`], a fire-and-forget `submit` for
//! zero-argument tasks:
//!
//! - **Inline** — runs the task on the submitting thread
//! - **WorkerPool** — fixed set of long-lived workers draining a bounded
//!   queue; `submit` blocks while the queue is full
//! - **ThreadPerTask** — one new thread per submission, unbounded
//!   concurrency, caller beware

use crate::error::{DispatchError, Result};
use crossbeam_channel::{Receiver, Sender};
use std::any::Any;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// Default bounded queue capacity for [`WorkerPool`]
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// A unit of work submitted to an executor
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Execution strategy for asynchronously delivered handlers
pub trait Executor: Send + Sync {
    /// Schedule a task. No completion signal is given.
    fn submit(&self, task: Task) -> Result<()>;

    /// Executor name (e.g., "inline", "pool", "thread-per-task")
    fn name(&self) -> &str;
}

/// Number of workers used when none is configured
pub fn available_workers() -> usize {
    thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Runs every task to completion on the submitting thread
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl Executor for Inline {
    fn submit(&self, task: Task) -> Result<()> {
        task();
        Ok(())
    }

    fn name(&self) -> &str {
        "inline"
    }
}

/// Fixed-size worker pool over a bounded task queue
///
/// Workers live until [`WorkerPool::shutdown`] (or drop), after which
/// queued tasks are drained before the workers exit.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    capacity: usize,
}

impl WorkerPool {
    /// Spawn `workers` threads draining a queue of `capacity` tasks
    pub fn new(workers: usize, capacity: usize) -> Result<Self> {
        if workers == 0 {
            return Err(DispatchError::Config(
                "Worker pool needs at least one worker".to_string(),
            ));
        }
        if capacity == 0 {
            return Err(DispatchError::Config(
                "Worker pool queue capacity must be greater than zero".to_string(),
            ));
        }

        let (sender, receiver) = crossbeam_channel::bounded::<Task>(capacity);
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let tasks = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("dispatch-worker-{}", index))
                .spawn(move || run_worker(index, tasks))
                .map_err(|e| DispatchError::Spawn(e.to_string()))?;
            handles.push(handle);
        }

        tracing::info!(workers, capacity, "Worker pool started");

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
            worker_count: workers,
            capacity,
        })
    }

    /// One worker per available core, default queue capacity
    pub fn with_defaults() -> Result<Self> {
        Self::new(available_workers(), DEFAULT_QUEUE_CAPACITY)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tasks queued but not yet picked up by a worker
    pub fn pending(&self) -> usize {
        lock(&self.sender).as_ref().map_or(0, Sender::len)
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.sender).is_none()
    }

    /// Close the queue, let workers drain it, and join them
    ///
    /// Idempotent. When called from one of the pool's own workers, that
    /// worker is left to exit on its own.
    pub fn shutdown(&self) {
        let Some(sender) = lock(&self.sender).take() else {
            return;
        };
        drop(sender);

        let handles = std::mem::take(&mut *lock(&self.workers));
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::warn!("Worker thread terminated abnormally");
            }
        }

        tracing::info!(workers = self.worker_count, "Worker pool shut down");
    }
}

impl Executor for WorkerPool {
    fn submit(&self, task: Task) -> Result<()> {
        let sender = lock(&self.sender)
            .clone()
            .ok_or(DispatchError::PoolClosed)?;
        // Blocks while the queue is full
        sender.send(task).map_err(|_| DispatchError::PoolClosed)
    }

    fn name(&self) -> &str {
        "pool"
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("worker_count", &self.worker_count)
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn run_worker(index: usize, tasks: Receiver<Task>) {
    for task in tasks.iter() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            tracing::error!(
                worker = index,
                panic = %panic_message(payload.as_ref()),
                "Dispatched task panicked"
            );
        }
    }
    tracing::debug!(worker = index, "Worker exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Spawns a fresh thread for every submitted task
#[derive(Debug, Default)]
pub struct ThreadPerTask {
    spawned: AtomicU64,
}

impl ThreadPerTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total threads spawned so far
    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }
}

impl Executor for ThreadPerTask {
    fn submit(&self, task: Task) -> Result<()> {
        let n = self.spawned.fetch_add(1, Ordering::Relaxed);
        thread::Builder::new()
            .name(format!("dispatch-task-{}", n))
            .spawn(task)
            .map(drop)
            .map_err(|e| DispatchError::Spawn(e.to_string()))
    }

    fn name(&self) -> &str {
        "thread-per-task"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_inline_runs_on_caller_thread() {
        let caller = thread::current().id();
        let (tx, rx) = mpsc::channel();
        Inline
            .submit(Box::new(move || tx.send(thread::current().id()).unwrap()))
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), caller);
    }

    #[test]
    fn test_pool_rejects_zero_sizes() {
        assert!(matches!(
            WorkerPool::new(0, 8),
            Err(DispatchError::Config(_))
        ));
        assert!(matches!(
            WorkerPool::new(2, 0),
            Err(DispatchError::Config(_))
        ));
    }

    #[test]
    fn test_pool_runs_every_task_once() {
        let pool = WorkerPool::new(4, 16).unwrap();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..500 {
            let c = Arc::clone(&count);
            pool.submit(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        pool.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 500);
    }

    #[test]
    fn test_pool_runs_on_named_workers() {
        let pool = WorkerPool::new(1, 4).unwrap();
        let (tx, rx) = mpsc::channel();
        pool.submit(Box::new(move || {
            tx.send(thread::current().name().map(str::to_string)).unwrap();
        }))
        .unwrap();

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(name.as_deref(), Some("dispatch-worker-0"));
    }

    #[test]
    fn test_submit_blocks_when_queue_full() {
        let pool = Arc::new(WorkerPool::new(1, 1).unwrap());
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let (started_tx, started_rx) = mpsc::channel::<()>();

        // Occupy the only worker
        pool.submit(Box::new(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        }))
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Fill the queue
        pool.submit(Box::new(|| {})).unwrap();
        assert_eq!(pool.pending(), 1);

        let (done_tx, done_rx) = mpsc::channel::<()>();
        let submitter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                pool.submit(Box::new(|| {})).unwrap();
                done_tx.send(()).unwrap();
            })
        };

        assert!(done_rx.recv_timeout(Duration::from_millis(200)).is_err());

        release_tx.send(()).unwrap();
        done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        submitter.join().unwrap();
    }

    #[test]
    fn test_panicking_task_keeps_worker_alive() {
        let pool = WorkerPool::new(1, 4).unwrap();
        pool.submit(Box::new(|| panic!("boom"))).unwrap();

        let (tx, rx) = mpsc::channel();
        pool.submit(Box::new(move || tx.send(()).unwrap())).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = WorkerPool::new(2, 4).unwrap();
        pool.shutdown();
        pool.shutdown();

        assert!(pool.is_closed());
        assert!(matches!(
            pool.submit(Box::new(|| {})),
            Err(DispatchError::PoolClosed)
        ));
    }

    #[test]
    fn test_shutdown_drains_queue() {
        let pool = WorkerPool::new(1, 64).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..64 {
            let c = Arc::clone(&count);
            pool.submit(Box::new(move || {
                thread::sleep(Duration::from_micros(50));
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        drop(pool);
        assert_eq!(count.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn test_thread_per_task_spawns_each_time() {
        let executor = ThreadPerTask::new();
        let (tx, rx) = mpsc::channel();
        for _ in 0..3 {
            let tx = tx.clone();
            executor
                .submit(Box::new(move || {
                    tx.send(thread::current().name().map(str::to_string))
                        .unwrap();
                }))
                .unwrap();
        }

        let mut names: Vec<_> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["dispatch-task-0", "dispatch-task-1", "dispatch-task-2"]);
        assert_eq!(executor.spawned(), 3);
    }

    #[test]
    fn test_available_workers_is_positive() {
        assert!(available_workers() >= 1);
        assert_eq!(WorkerPool::with_defaults().unwrap().capacity(), DEFAULT_QUEUE_CAPACITY);
    }
}
