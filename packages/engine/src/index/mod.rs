// packages/engine/src/index/mod.rs
//! Spatial domain-decomposition index
//!
//! - **Interval Tree**: balanced bounding-box tree over mesh domains
//! - **Geometry**: box predicates (hyperplane, range, ray, segment, point)
//! - **Communicator**: sum all-reduce used to merge per-rank extents
//!
//! # Architecture
//!
//! ```text
//!  rank 0            rank 1            rank R-1
//!  add_domain(own)   add_domain(own)   add_domain(own)
//!       │                 │                 │
//!       └──────── all_reduce_sum ───────────┘
//!                         │
//!               construct_tree + set_intervals
//!                         │
//!      domains_in_range / domains_for_equation / domains_on_ray ...
//! ```

pub mod communicator;
pub mod geometry;
pub mod interval_tree;

pub use communicator::{Communicator, LocalComm, SerialComm};
pub use interval_tree::IntervalTree;

#[cfg(feature = "mpi-support")]
pub use communicator::MpiComm;
