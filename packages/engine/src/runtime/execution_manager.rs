// packages/engine/src/runtime/execution_manager.rs
//! Scheduling context shared by the pipeline stages
//!
//! The manager owns at most one [`ThreadPool`]. Until threading is configured
//! every call degrades to serial behaviour: scheduled work runs inline in the
//! caller's thread and named locks are skipped entirely, since there is no
//! concurrency to guard against.
//!
//! Named mutexes are created on first use and keyed by their full name, so
//! two differently named critical sections never share a lock.

use crate::observability::metric_names;
use crate::runtime::thread_pool::{PoolStats, ThreadPool, WorkStatus};
use crate::utils::config::{ThreadingConfig, DEFAULT_NUM_THREADS, DEFAULT_QUEUE_CAPACITY_PER_THREAD};
use crate::utils::errors::{EngineError, Result};
use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Held lock on a named mutex; unlocks on drop
pub struct NamedMutexGuard {
    _guard: ArcMutexGuard<RawMutex, ()>,
}

impl NamedMutexGuard {
    /// Release the lock now
    pub fn unlock(self) {}
}

/// Process-wide scheduling context
pub struct ExecutionManager {
    /// Worker pool, `None` while running serially
    pool: RwLock<Option<Arc<ThreadPool>>>,

    /// Queue slots per worker for pools created by this manager
    queue_capacity_per_thread: usize,

    /// Named critical sections
    mutexes: DashMap<String, Arc<Mutex<()>>>,
}

impl Default for ExecutionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionManager {
    /// Create a manager with no thread pool (serial execution)
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY_PER_THREAD)
    }

    /// Create a serial manager whose pools get `per_thread` queue slots per worker
    pub fn with_queue_capacity(per_thread: usize) -> Self {
        Self {
            pool: RwLock::new(None),
            queue_capacity_per_thread: per_thread.max(1),
            mutexes: DashMap::new(),
        }
    }

    /// Create a manager and start its pool as the configuration asks
    pub fn from_config(config: &ThreadingConfig) -> Result<Self> {
        let manager = Self::with_queue_capacity(config.queue_capacity_per_thread);
        if config.enabled {
            manager.set_number_of_threads(config.num_threads)?;
        } else {
            info!("Threading disabled, scheduled work runs inline");
        }
        Ok(manager)
    }

    /// Start a blocking pool with `num_threads` workers (0 = default of 4)
    ///
    /// An existing pool is drained and replaced. Fails if the workers cannot
    /// be created, leaving any previous pool in place.
    pub fn set_number_of_threads(&self, num_threads: usize) -> Result<()> {
        let num_threads = if num_threads == 0 {
            DEFAULT_NUM_THREADS
        } else {
            num_threads
        };
        let capacity = num_threads
            .checked_mul(self.queue_capacity_per_thread)
            .ok_or_else(|| {
                EngineError::PoolCreationFailed(format!(
                    "queue capacity for {} threads overflows",
                    num_threads
                ))
            })?;

        let pool = Arc::new(ThreadPool::new(num_threads, capacity, false)?);
        let previous = self.pool.write().replace(pool);

        if let Some(previous) = previous {
            debug!("Draining previous thread pool before replacing it");
            previous.destroy(true)?;
        }

        info!(
            "Execution manager using {} threads (queue capacity {})",
            num_threads, capacity
        );
        Ok(())
    }

    fn current_pool(&self) -> Option<Arc<ThreadPool>> {
        self.pool.read().clone()
    }

    /// True once a thread pool is configured
    pub fn is_threaded(&self) -> bool {
        self.pool.read().is_some()
    }

    /// Worker count of the current pool, 0 when serial
    pub fn num_threads(&self) -> usize {
        self.current_pool()
            .map(|pool| pool.stats().num_workers)
            .unwrap_or(0)
    }

    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.current_pool().map(|pool| pool.stats())
    }

    /// Run `job` on the pool, or inline when no pool is configured
    ///
    /// Blocks while the queue is full.
    pub fn schedule_work<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(pool) = self.current_pool() else {
            metrics::counter!(metric_names::INLINE_JOBS).increment(1);
            job();
            return Ok(());
        };

        match pool.add_work(job)? {
            WorkStatus::Queued => Ok(()),
            WorkStatus::Rejected(reason) => Err(EngineError::WorkRejected(format!(
                "thread pool refused the job ({:?})",
                reason
            ))),
        }
    }

    /// Wait for all scheduled work to finish; the pool stays up
    pub fn finish_work(&self) -> Result<()> {
        match self.current_pool() {
            Some(pool) => pool.join_no_exit(),
            None => Ok(()),
        }
    }

    /// Lock the mutex named `key`, creating it on first use
    ///
    /// Returns `None` without locking whenever no pool is installed: before
    /// the first `set_number_of_threads`, and again after `shutdown`, which
    /// also clears the registry. Work scheduled after shutdown runs inline on
    /// the caller.
    pub fn mutex_lock(&self, key: &str) -> Option<NamedMutexGuard> {
        if !self.is_threaded() {
            return None;
        }

        let mutex = {
            let entry = self
                .mutexes
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())));
            Arc::clone(entry.value())
        };

        Some(NamedMutexGuard {
            _guard: mutex.lock_arc(),
        })
    }

    /// Release a guard obtained from [`mutex_lock`](Self::mutex_lock)
    pub fn mutex_unlock(&self, guard: Option<NamedMutexGuard>) {
        if let Some(guard) = guard {
            guard.unlock();
        }
    }

    /// Remove the mutex named `key` from the registry
    ///
    /// Holders of an outstanding guard keep their lock until they drop it.
    pub fn mutex_destroy(&self, key: &str) -> bool {
        if !self.is_threaded() {
            return false;
        }
        self.mutexes.remove(key).is_some()
    }

    /// Run `f` inside the critical section named `key`
    pub fn with_named_lock<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        let _guard = self.mutex_lock(key);
        f()
    }

    /// Number of named mutexes currently registered
    pub fn named_mutex_count(&self) -> usize {
        self.mutexes.len()
    }

    /// Drain and stop the pool; later work runs inline
    pub fn shutdown(&self) -> Result<()> {
        let pool = self.pool.write().take();
        self.mutexes.clear();

        match pool {
            Some(pool) => {
                info!("Shutting down execution manager");
                pool.destroy(true)
            }
            None => Ok(()),
        }
    }
}

impl Drop for ExecutionManager {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Execution manager shutdown failed: {}", e);
        }
    }
}
