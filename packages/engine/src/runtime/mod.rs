// packages/engine/src/runtime/mod.rs
//! Work scheduling runtime
//!
//! This module provides the execution environment for per-domain work:
//!
//! - **Thread Pool**: fixed worker threads fed from a bounded FIFO
//! - **Execution Manager**: scheduling facade and named-mutex registry
//!
//! # Architecture
//!
//! ```text
//!  schedule_work(job) ──> ExecutionManager ──(no pool)──> job() inline
//!                               │
//!                            add_work
//!                               ▼
//!                 ┌──────── bounded FIFO ────────┐
//!                 │  job  job  job  ...  (max)   │  not_full / not_empty
//!                 └──────────────────────────────┘
//!                   ▲          ▲          ▲
//!               worker 1   worker 2   worker N      empty ──> finish_work()
//! ```

pub mod execution_manager;
pub mod thread_pool;

// Re-export commonly used types
pub use execution_manager::{ExecutionManager, NamedMutexGuard};
pub use thread_pool::{Job, PoolStats, RejectReason, ThreadPool, WorkStatus};
