// packages/engine/src/lib.rs
//! Domain Engine Library
//!
//! Core components for pruning and scheduling per-domain work over a mesh
//! that has been decomposed into many domains, possibly across ranks.
//!
//! # Architecture
//!
//! The engine is structured into a few modules:
//!
//! - **index**: bounding-box interval tree over domains and the collective
//!   used to merge per-rank extents
//! - **runtime**: bounded work-queue thread pool and the execution manager
//! - **observability**: tracing subscriber setup and metric names
//! - **utils**: configuration and error types
//!
//! # Example
//!
//! ```
//! use domain_engine::{ExecutionManager, IntervalTree};
//!
//! let mut tree = IntervalTree::new(2, 2).unwrap();
//! tree.add_domain(0, &[0.0, 1.0, 0.0, 1.0]).unwrap();
//! tree.add_domain(1, &[1.0, 2.0, 0.0, 1.0]).unwrap();
//! tree.calculate(false).unwrap();
//!
//! let manager = ExecutionManager::new();
//! for domain in tree.domains_in_range(&[1.5, 0.0], &[1.8, 1.0]).unwrap() {
//!     manager.schedule_work(move || assert_eq!(domain, 1)).unwrap();
//! }
//! manager.finish_work().unwrap();
//! ```

// Public module exports
pub mod index;
pub mod observability;
pub mod runtime;
pub mod utils;

// Re-export commonly used types
pub use index::{Communicator, IntervalTree, LocalComm, SerialComm};
pub use runtime::{ExecutionManager, ThreadPool, WorkStatus};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Build metadata exported by `build.rs`
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub version: &'static str,
    /// Short commit hash, or `unknown` outside a git checkout
    pub git_hash: &'static str,
    /// Seconds since the Unix epoch
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }

    /// Build time as Unix seconds, if the build script could read the clock
    pub fn build_time_secs(&self) -> Option<u64> {
        self.build_timestamp.parse().ok().filter(|secs| *secs > 0)
    }
}
