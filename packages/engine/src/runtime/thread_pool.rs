// packages/engine/src/runtime/thread_pool.rs
//! Bounded work-queue thread pool
//!
//! A fixed set of OS worker threads pulls boxed jobs from a FIFO guarded by
//! one mutex and three condition variables:
//!
//! - `not_empty`: work became available (or shutdown was requested)
//! - `not_full`: a slot freed up for a blocked producer
//! - `empty`: the queue drained and every worker is idle
//!
//! # Lifecycle
//!
//! ```text
//! running ──destroy()──> draining ──(queue empty)──> shutdown ──> joined
//!    │                      │
//!    add_work() accepted    add_work() rejected (Closed)
//! ```
//!
//! Jobs always run with the queue lock released. A job must not enqueue into
//! its own pool under the blocking policy if the queue can be full, and must
//! not call `join_no_exit` or `destroy` on it; both deadlock.

use crate::observability::metric_names;
use crate::utils::errors::{EngineError, Result};
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

/// A unit of work; the closure owns whatever argument it needs
pub type Job = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    /// 0 for threads that are not pool workers
    static WORKER_ID: Cell<usize> = const { Cell::new(0) };
}

/// Why a job was not queued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Queue at capacity and the pool does not block producers
    QueueFull,

    /// Pool is draining or shut down
    Closed,
}

/// Admission outcome of [`ThreadPool::add_work`]
///
/// Rejection is an expected overload/teardown outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    Queued,
    Rejected(RejectReason),
}

impl WorkStatus {
    pub fn is_queued(&self) -> bool {
        matches!(self, WorkStatus::Queued)
    }
}

struct QueueState {
    jobs: VecDeque<Job>,

    /// Busy flag per worker, indexed by `worker id - 1`
    working: Vec<bool>,

    /// Spawned and not yet joined
    live_workers: usize,

    /// No new jobs accepted
    queue_closed: bool,

    /// Workers should exit
    shutdown: bool,
}

impl QueueState {
    fn busy_workers(&self) -> usize {
        self.working.iter().filter(|busy| **busy).count()
    }

    fn all_idle(&self) -> bool {
        !self.working.iter().any(|busy| *busy)
    }
}

struct Shared {
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
    empty: Condvar,
    max_queue_size: usize,
    do_not_block_when_full: bool,
}

/// Fixed-size pool of worker threads fed from a bounded FIFO
///
/// Dropping the pool drains the queue and joins every worker.
pub struct ThreadPool {
    shared: Arc<Shared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ThreadPool {
    /// Spawn `num_workers` threads serving a queue of `max_queue_size` jobs
    ///
    /// With `do_not_block_when_full`, `add_work` on a full queue returns
    /// `Rejected(QueueFull)` instead of waiting for space.
    pub fn new(
        num_workers: usize,
        max_queue_size: usize,
        do_not_block_when_full: bool,
    ) -> Result<Self> {
        if num_workers == 0 {
            return Err(EngineError::PoolCreationFailed(
                "at least one worker thread is required".to_string(),
            ));
        }
        if max_queue_size == 0 {
            return Err(EngineError::PoolCreationFailed(
                "queue capacity must be at least 1".to_string(),
            ));
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                jobs: VecDeque::with_capacity(max_queue_size.min(4096)),
                working: vec![false; num_workers],
                live_workers: 0,
                queue_closed: false,
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            empty: Condvar::new(),
            max_queue_size,
            do_not_block_when_full,
        });

        let pool = Self {
            shared,
            handles: Mutex::new(Vec::with_capacity(num_workers)),
        };

        for id in 1..=num_workers {
            let shared = Arc::clone(&pool.shared);
            let spawned = thread::Builder::new()
                .name(format!("pool-worker-{}", id))
                .spawn(move || worker_loop(shared, id));

            match spawned {
                Ok(handle) => {
                    pool.handles.lock().push(handle);
                    pool.shared.state.lock().live_workers += 1;
                }
                Err(e) => {
                    error!("Failed to spawn worker thread {}: {}", id, e);
                    if let Err(cleanup) = pool.destroy(false) {
                        warn!("Cleanup after failed pool creation: {}", cleanup);
                    }
                    return Err(EngineError::PoolCreationFailed(format!(
                        "could not spawn worker {}: {}",
                        id, e
                    )));
                }
            }
        }

        info!(
            "Thread pool started: {} workers, queue capacity {}, {}",
            num_workers,
            max_queue_size,
            if do_not_block_when_full {
                "rejecting when full"
            } else {
                "blocking when full"
            }
        );

        Ok(pool)
    }

    /// Id of the calling pool worker (1-based), or 0 for any other thread
    pub fn current_worker_id() -> usize {
        WORKER_ID.with(Cell::get)
    }

    /// Enqueue a job at the tail of the FIFO
    ///
    /// Returns `Ok(Queued)` on success, `Ok(Rejected(_))` when the job was
    /// dropped by admission control, and `Err` for an internal fault.
    pub fn add_work<F>(&self, job: F) -> Result<WorkStatus>
    where
        F: FnOnce() + Send + 'static,
    {
        let shared = &*self.shared;
        let mut state = shared.state.lock();

        if state.queue_closed || state.shutdown {
            return Ok(rejected(RejectReason::Closed));
        }
        if state.live_workers == 0 {
            return Err(EngineError::ThreadPool(
                "no worker threads are running".to_string(),
            ));
        }

        while state.jobs.len() >= shared.max_queue_size {
            if shared.do_not_block_when_full {
                trace!("Queue full, shedding job");
                return Ok(rejected(RejectReason::QueueFull));
            }
            shared.not_full.wait(&mut state);
            if state.queue_closed || state.shutdown {
                return Ok(rejected(RejectReason::Closed));
            }
        }

        state.jobs.push_back(Box::new(job));
        shared.not_empty.notify_all();
        drop(state);

        metrics::counter!(metric_names::JOBS_QUEUED).increment(1);
        Ok(WorkStatus::Queued)
    }

    /// Block until the queue is empty and no worker is running a job
    ///
    /// The workers stay alive for further work.
    pub fn join_no_exit(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        while !(state.jobs.is_empty() && state.all_idle()) {
            if state.live_workers == 0 {
                return Err(EngineError::ThreadPool(format!(
                    "{} queued jobs but no worker threads to run them",
                    state.jobs.len()
                )));
            }
            self.shared.empty.wait(&mut state);
        }
        Ok(())
    }

    /// Join every worker thread and reset the worker count to zero
    ///
    /// Does not request shutdown itself; call after shutdown was requested
    /// or this blocks until it is.
    pub fn join(&self) -> Result<()> {
        let handles = std::mem::take(&mut *self.handles.lock());
        let current = thread::current().id();
        let mut panicked = 0;

        for handle in handles {
            if handle.thread().id() == current {
                warn!("Pool joined from one of its own workers; detaching it");
                continue;
            }
            if handle.join().is_err() {
                panicked += 1;
            }
        }

        self.shared.state.lock().live_workers = 0;

        if panicked > 0 {
            Err(EngineError::ThreadPool(format!(
                "{} worker threads panicked",
                panicked
            )))
        } else {
            Ok(())
        }
    }

    /// Close the queue, optionally drain it, then stop and join the workers
    ///
    /// Idempotent: a pool that is already closing returns `Ok(())`. With
    /// `wait_to_finish == false`, jobs still queued are dropped unrun.
    pub fn destroy(&self, wait_to_finish: bool) -> Result<()> {
        let on_worker = self.is_worker_thread();

        {
            let mut state = self.shared.state.lock();
            if state.queue_closed || state.shutdown {
                return Ok(());
            }
            state.queue_closed = true;
            debug!(
                "Closing thread pool with {} queued jobs (wait: {})",
                state.jobs.len(),
                wait_to_finish
            );

            if wait_to_finish && on_worker {
                warn!("Pool destroyed from its own worker; not waiting for drain");
            } else if wait_to_finish {
                while !state.jobs.is_empty() && state.live_workers > 0 {
                    self.shared.empty.wait(&mut state);
                }
            }

            state.shutdown = true;
            self.shared.not_empty.notify_all();
            self.shared.not_full.notify_all();
        }

        let joined = self.join();

        let leftover = {
            let mut state = self.shared.state.lock();
            let leftover = std::mem::take(&mut state.jobs);
            self.shared.empty.notify_all();
            leftover
        };
        if !leftover.is_empty() {
            warn!("Discarded {} queued jobs at shutdown", leftover.len());
        }
        drop(leftover);

        info!("Thread pool shut down");
        joined
    }

    /// Snapshot of the queue and worker state
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            num_workers: state.live_workers,
            queued: state.jobs.len(),
            busy_workers: state.busy_workers(),
            max_queue_size: self.shared.max_queue_size,
            closed: state.queue_closed || state.shutdown,
        }
    }

    fn is_worker_thread(&self) -> bool {
        let current = thread::current().id();
        self.handles
            .lock()
            .iter()
            .any(|handle| handle.thread().id() == current)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if let Err(e) = self.destroy(true) {
            warn!("Thread pool shutdown reported an error: {}", e);
        }
    }
}

fn rejected(reason: RejectReason) -> WorkStatus {
    metrics::counter!(metric_names::JOBS_REJECTED).increment(1);
    WorkStatus::Rejected(reason)
}

fn worker_loop(shared: Arc<Shared>, id: usize) {
    WORKER_ID.with(|cell| cell.set(id));
    trace!("Worker {} started", id);
    let slot = id - 1;

    loop {
        let job = {
            let mut state = shared.state.lock();

            while state.jobs.is_empty() && !state.shutdown {
                state.working[slot] = false;
                if state.all_idle() {
                    shared.empty.notify_all();
                }
                shared.not_empty.wait(&mut state);
            }

            if state.shutdown {
                state.working[slot] = false;
                break;
            }

            let Some(job) = state.jobs.pop_front() else {
                continue;
            };
            state.working[slot] = true;

            // Queue was full before this pop
            if !shared.do_not_block_when_full && state.jobs.len() + 1 == shared.max_queue_size {
                shared.not_full.notify_all();
            }
            job
        };

        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            error!("Job panicked on worker {}", id);
        }
        metrics::counter!(metric_names::JOBS_COMPLETED).increment(1);
    }

    trace!("Worker {} exiting", id);
}

/// Thread pool statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub num_workers: usize,
    pub queued: usize,
    pub busy_workers: usize,
    pub max_queue_size: usize,
    pub closed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, unbounded};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Occupy the single worker until the returned sender is used or dropped
    fn block_worker(pool: &ThreadPool) -> crossbeam_channel::Sender<()> {
        let (started_tx, started_rx) = bounded::<()>(1);
        let (gate_tx, gate_rx) = bounded::<()>(0);
        let status = pool
            .add_work(move || {
                started_tx.send(()).unwrap();
                let _ = gate_rx.recv();
            })
            .unwrap();
        assert_eq!(status, WorkStatus::Queued);
        started_rx.recv().unwrap();
        gate_tx
    }

    #[test]
    fn test_pool_creation() {
        let pool = ThreadPool::new(4, 16, false).unwrap();
        let stats = pool.stats();
        assert_eq!(stats.num_workers, 4);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.max_queue_size, 16);
        assert!(!stats.closed);
    }

    #[test]
    fn test_invalid_sizes_fail() {
        assert!(matches!(
            ThreadPool::new(0, 10, false),
            Err(EngineError::PoolCreationFailed(_))
        ));
        assert!(matches!(
            ThreadPool::new(2, 0, false),
            Err(EngineError::PoolCreationFailed(_))
        ));
    }

    #[test]
    fn test_single_worker_is_fifo() {
        let pool = ThreadPool::new(1, 100, false).unwrap();
        let (tx, rx) = unbounded();

        for i in 0..50 {
            let tx = tx.clone();
            pool.add_work(move || tx.send(i).unwrap()).unwrap();
        }
        pool.destroy(true).unwrap();
        drop(tx);

        let order: Vec<i32> = rx.iter().collect();
        assert_eq!(order, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_non_blocking_pool_sheds_when_full() {
        let pool = ThreadPool::new(1, 2, true).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        let gate = block_worker(&pool);

        for _ in 0..2 {
            let ran = Arc::clone(&ran);
            let status = pool
                .add_work(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            assert_eq!(status, WorkStatus::Queued);
        }

        let status = pool.add_work(|| {}).unwrap();
        assert_eq!(status, WorkStatus::Rejected(RejectReason::QueueFull));

        gate.send(()).unwrap();
        pool.destroy(true).unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_blocking_pool_waits_for_space() {
        let pool = Arc::new(ThreadPool::new(1, 1, false).unwrap());
        let gate = block_worker(&pool);
        assert!(pool.add_work(|| {}).unwrap().is_queued());

        let returned = Arc::new(AtomicBool::new(false));
        let producer = {
            let pool = Arc::clone(&pool);
            let returned = Arc::clone(&returned);
            thread::spawn(move || {
                let status = pool.add_work(|| {}).unwrap();
                returned.store(true, Ordering::SeqCst);
                status
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!returned.load(Ordering::SeqCst));

        gate.send(()).unwrap();
        assert_eq!(producer.join().unwrap(), WorkStatus::Queued);
        pool.join_no_exit().unwrap();
    }

    #[test]
    fn test_join_no_exit_drains_and_keeps_workers() {
        let pool = ThreadPool::new(4, 8, false).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.add_work(move || {
                thread::sleep(Duration::from_micros(200));
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.join_no_exit().unwrap();

        let stats = pool.stats();
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.busy_workers, 0);
        assert_eq!(stats.num_workers, 4);
        assert_eq!(counter.load(Ordering::SeqCst), 100);

        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.add_work(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.join_no_exit().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 110);
    }

    #[test]
    fn test_join_no_exit_on_idle_pool_returns() {
        let pool = ThreadPool::new(2, 4, false).unwrap();
        pool.join_no_exit().unwrap();
    }

    #[test]
    fn test_destroy_runs_every_job_exactly_once() {
        let pool = ThreadPool::new(3, 10, false).unwrap();
        let counts: Arc<Vec<AtomicUsize>> = Arc::new((0..200).map(|_| AtomicUsize::new(0)).collect());

        for i in 0..200 {
            let counts = Arc::clone(&counts);
            pool.add_work(move || {
                counts[i].fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.destroy(true).unwrap();

        assert!(counts.iter().all(|c| c.load(Ordering::SeqCst) == 1));
        assert_eq!(pool.stats().num_workers, 0);
    }

    #[test]
    fn test_destroy_is_idempotent_and_closes_queue() {
        let pool = ThreadPool::new(2, 4, false).unwrap();
        pool.destroy(true).unwrap();
        pool.destroy(true).unwrap();
        pool.destroy(false).unwrap();

        let status = pool.add_work(|| {}).unwrap();
        assert_eq!(status, WorkStatus::Rejected(RejectReason::Closed));
        assert!(pool.stats().closed);
    }

    #[test]
    fn test_destroy_without_wait_discards_queued_jobs() {
        let pool = Arc::new(ThreadPool::new(1, 8, false).unwrap());
        let ran = Arc::new(AtomicUsize::new(0));
        let gate = block_worker(&pool);

        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            pool.add_work(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        // Let the blocked job finish only once shutdown has been requested
        let releaser = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                while !pool.stats().closed {
                    thread::sleep(Duration::from_millis(1));
                }
                gate.send(()).unwrap();
            })
        };

        pool.destroy(false).unwrap();
        releaser.join().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(pool.stats().queued, 0);
    }

    #[test]
    fn test_panicking_job_does_not_kill_worker() {
        let pool = ThreadPool::new(1, 4, false).unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        pool.add_work(|| panic!("job failure")).unwrap();
        let counter = Arc::clone(&ran);
        pool.add_work(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        pool.join_no_exit().unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(pool.stats().num_workers, 1);
    }

    #[test]
    fn test_worker_ids() {
        assert_eq!(ThreadPool::current_worker_id(), 0);

        let pool = ThreadPool::new(2, 4, false).unwrap();
        let (tx, rx) = unbounded();
        for _ in 0..4 {
            let tx = tx.clone();
            pool.add_work(move || tx.send(ThreadPool::current_worker_id()).unwrap())
                .unwrap();
        }
        pool.destroy(true).unwrap();
        drop(tx);

        for id in rx.iter() {
            assert!((1..=2).contains(&id));
        }
    }
}
