// packages/engine/src/index/communicator.rs
//! Collective communication for distributed index builds
//!
//! The interval tree needs exactly one collective: an element-wise sum
//! all-reduce over a flat `f64` buffer, after which every rank holds the
//! same result. Three backends are provided:
//!
//! - [`SerialComm`]: a single rank, the reduction is a no-op
//! - [`LocalComm`]: several ranks inside one process, one per thread
//! - `MpiComm` (feature `mpi-support`): a real MPI world communicator

use crate::utils::errors::{EngineError, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use tracing::{trace, warn};

/// Minimal collective interface consumed by the index
pub trait Communicator {
    /// Rank of the calling process within the group
    fn rank(&self) -> usize;

    /// Number of ranks in the group
    fn size(&self) -> usize;

    /// True when more than one rank takes part
    fn is_distributed(&self) -> bool {
        self.size() > 1
    }

    /// Sum `buffer` element-wise across all ranks, in place
    fn all_reduce_sum(&self, buffer: &mut [f64]) -> Result<()>;
}

/// Single-rank communicator
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialComm;

impl Communicator for SerialComm {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_reduce_sum(&self, _buffer: &mut [f64]) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Rendezvous {
    /// Partial sum for the reduction in progress
    accum: Vec<f64>,

    /// Ranks that have contributed to the current generation
    arrived: usize,

    /// Completed reductions so far
    generation: u64,

    /// Result of the last completed reduction
    result: Arc<Vec<f64>>,

    /// Set once any rank fails; every later collective on the group fails
    failed: Option<String>,
}

#[derive(Debug)]
struct LocalGroup {
    size: usize,
    state: Mutex<Rendezvous>,
    done: Condvar,
}

/// In-process communicator; each rank lives on its own thread
///
/// Every rank must call [`Communicator::all_reduce_sum`] the same number of
/// times with buffers of the same length, as with MPI collectives.
#[derive(Debug, Clone)]
pub struct LocalComm {
    rank: usize,
    group: Arc<LocalGroup>,
}

impl LocalComm {
    /// Create `size` connected ranks (0..size)
    pub fn group(size: usize) -> Vec<LocalComm> {
        let group = Arc::new(LocalGroup {
            size,
            state: Mutex::new(Rendezvous::default()),
            done: Condvar::new(),
        });

        (0..size)
            .map(|rank| LocalComm {
                rank,
                group: Arc::clone(&group),
            })
            .collect()
    }

    /// Fail the group: ranks waiting in a reduction, and every later call,
    /// return `CommunicationFailed` with `reason`
    ///
    /// A rank that hits an error outside the collective calls this so its
    /// peers do not wait for a contribution that will never arrive.
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let mut state = self.group.state.lock();
        warn!("Rank {} aborting communicator group: {}", self.rank, reason);
        self.group.poison(&mut state, reason);
    }
}

impl LocalGroup {
    fn poison(&self, state: &mut Rendezvous, reason: String) {
        if state.failed.is_none() {
            state.failed = Some(reason);
        }
        state.accum.clear();
        state.arrived = 0;
        self.done.notify_all();
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.group.size
    }

    fn all_reduce_sum(&self, buffer: &mut [f64]) -> Result<()> {
        let group = &self.group;
        let mut state = group.state.lock();
        if let Some(reason) = &state.failed {
            return Err(EngineError::CommunicationFailed(reason.clone()));
        }
        let generation = state.generation;

        if state.arrived == 0 {
            state.accum = vec![0.0; buffer.len()];
        } else if state.accum.len() != buffer.len() {
            let reason = format!(
                "rank {} contributed {} values, expected {}",
                self.rank,
                buffer.len(),
                state.accum.len()
            );
            group.poison(&mut state, reason.clone());
            return Err(EngineError::CommunicationFailed(reason));
        }

        for (acc, value) in state.accum.iter_mut().zip(buffer.iter()) {
            *acc += *value;
        }
        state.arrived += 1;
        trace!(
            "Rank {} joined reduction {} ({}/{})",
            self.rank,
            generation,
            state.arrived,
            group.size
        );

        if state.arrived == group.size {
            let accum = std::mem::take(&mut state.accum);
            state.result = Arc::new(accum);
            state.arrived = 0;
            state.generation += 1;
            group.done.notify_all();
        } else {
            while state.generation == generation {
                if let Some(reason) = &state.failed {
                    return Err(EngineError::CommunicationFailed(reason.clone()));
                }
                group.done.wait(&mut state);
            }
        }

        // A newer result cannot replace this one until every rank,
        // including this one, has joined the next reduction.
        buffer.copy_from_slice(&state.result);
        Ok(())
    }
}

#[cfg(feature = "mpi-support")]
pub use self::mpi_backend::MpiComm;

#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::Communicator;
    use crate::utils::errors::Result;
    use mpi::collective::SystemOperation;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::Communicator as _;
    use mpi::traits::*;

    /// MPI world communicator
    pub struct MpiComm {
        world: SimpleCommunicator,
    }

    impl MpiComm {
        /// Wrap an existing communicator (usually `universe.world()`)
        pub fn new(world: SimpleCommunicator) -> Self {
            Self { world }
        }
    }

    impl Communicator for MpiComm {
        fn rank(&self) -> usize {
            self.world.rank() as usize
        }

        fn size(&self) -> usize {
            self.world.size() as usize
        }

        fn all_reduce_sum(&self, buffer: &mut [f64]) -> Result<()> {
            let local = buffer.to_vec();
            self.world
                .all_reduce_into(&local[..], buffer, SystemOperation::sum());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_serial_is_not_distributed() {
        let comm = SerialComm;
        let mut buffer = vec![1.0, 2.0];
        comm.all_reduce_sum(&mut buffer).unwrap();
        assert_eq!(buffer, vec![1.0, 2.0]);
        assert!(!comm.is_distributed());
    }

    #[test]
    fn test_local_group_sums_across_ranks() {
        let comms = LocalComm::group(4);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let mut buffer = vec![0.0; 4];
                    buffer[comm.rank()] = (comm.rank() + 1) as f64;
                    comm.all_reduce_sum(&mut buffer).unwrap();
                    buffer
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
        }
    }

    #[test]
    fn test_local_group_supports_repeated_reductions() {
        let comms = LocalComm::group(3);
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let mut totals = Vec::new();
                    for round in 0..5 {
                        let mut buffer = vec![(round * 10 + comm.rank()) as f64];
                        comm.all_reduce_sum(&mut buffer).unwrap();
                        totals.push(buffer[0]);
                    }
                    totals
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), vec![3.0, 33.0, 63.0, 93.0, 123.0]);
        }
    }

    #[test]
    fn test_single_rank_group_returns_immediately() {
        let comm = LocalComm::group(1).pop().unwrap();
        let mut buffer = vec![2.5];
        comm.all_reduce_sum(&mut buffer).unwrap();
        assert_eq!(buffer, vec![2.5]);
        assert!(!comm.is_distributed());
    }

    #[test]
    fn test_length_mismatch_fails_every_rank() {
        let (tx, rx) = crossbeam_channel::unbounded();
        for comm in LocalComm::group(2) {
            let tx = tx.clone();
            thread::spawn(move || {
                let mut buffer = vec![1.0; 4 - comm.rank()];
                let _ = tx.send((comm.rank(), comm.all_reduce_sum(&mut buffer)));
            });
        }
        drop(tx);

        for _ in 0..2 {
            let (rank, result) = rx
                .recv_timeout(Duration::from_secs(5))
                .expect("rank blocked after a peer failed");
            assert!(
                matches!(result, Err(EngineError::CommunicationFailed(_))),
                "rank {} returned {:?}",
                rank,
                result
            );
        }
    }

    #[test]
    fn test_abort_releases_waiting_ranks() {
        let mut comms = LocalComm::group(3);
        let failing = comms.pop().unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        for comm in comms {
            let tx = tx.clone();
            thread::spawn(move || {
                let mut buffer = vec![1.0];
                let _ = tx.send(comm.all_reduce_sum(&mut buffer));
            });
        }
        drop(tx);

        failing.abort("rank 2 could not read its domains");
        for _ in 0..2 {
            let result = rx
                .recv_timeout(Duration::from_secs(5))
                .expect("rank blocked after abort");
            assert!(matches!(result, Err(EngineError::CommunicationFailed(_))));
        }

        // The group stays failed
        let mut buffer = vec![1.0];
        assert!(matches!(
            failing.all_reduce_sum(&mut buffer),
            Err(EngineError::CommunicationFailed(reason)) if reason.contains("could not read")
        ));
    }

    #[cfg(feature = "mpi-support")]
    #[test]
    fn test_mpi_comm_is_a_communicator() {
        fn assert_communicator<C: Communicator>() {}
        assert_communicator::<MpiComm>();
    }
}
