//! Collective communication primitives for a fixed worker group.
//!
//! The selection algorithms are written against the [`Communicator`] trait,
//! which carries exactly the four collectives they need: a group-wide sum
//! reduction, a fixed-size count gather, a variable-length value gather and
//! a broadcast. [`LocalComm`] implements the trait for a group of threads
//! inside one process; a message-passing backend (e.g. MPI) belongs to the
//! caller and only has to implement the same trait.

use crate::error::Result;

pub mod local;

pub use local::LocalComm;

/// Rank of the worker that performs centralized work (sample aggregation,
/// gathered selection) inside a collective round.
pub const COORDINATOR: usize = 0;

/// Per-worker counts and placement offsets for a variable-length gather.
///
/// The coordinator builds the layout from the counts it received through
/// [`Communicator::gather_counts`]; each worker's data lands at its
/// displacement in the concatenated pool.
#[derive(Debug, Clone)]
pub struct GatherLayout {
    counts: Vec<u32>,
    displs: Vec<u32>,
    total: usize,
}

impl GatherLayout {
    pub fn from_counts(counts: Vec<u32>) -> Self {
        let mut displs = Vec::with_capacity(counts.len());
        let mut total: u64 = 0;
        for &c in &counts {
            displs.push(total as u32);
            total += u64::from(c);
        }
        Self {
            counts,
            displs,
            total: total as usize,
        }
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    pub fn displacements(&self) -> &[u32] {
        &self.displs
    }

    /// Total number of elements across the group.
    pub fn total(&self) -> usize {
        self.total
    }
}

/// Collective operations over a fixed-size process group.
///
/// Every method is a synchronization barrier: a worker blocks until all
/// group members have entered the same call. The contract is symmetric
/// use: all workers issue the same sequence of collectives with matching
/// arguments. Asymmetric use is a usage error and may deadlock or fail
/// with [`Error::Comm`](crate::Error::Comm); it is never recovered from.
pub trait Communicator {
    /// This worker's identity, `0 <= rank < size`.
    fn rank(&self) -> usize;

    /// Number of workers in the group.
    fn size(&self) -> usize;

    /// Group-wide sum reduction; every worker receives the total.
    fn sum(&self, value: u64) -> Result<u64>;

    /// Gather one 32-bit count per worker. Returns `Some(counts)` indexed
    /// by rank at [`COORDINATOR`], `None` elsewhere.
    fn gather_counts(&self, count: u32) -> Result<Option<Vec<u32>>>;

    /// Variable-length gather of doubles. The coordinator passes the
    /// layout it computed from the gathered counts and receives the
    /// concatenated pool; all other workers pass `None` and receive `None`.
    fn gather_values(&self, values: &[f64], layout: Option<&GatherLayout>)
        -> Result<Option<Vec<f64>>>;

    /// Broadcast one double from the coordinator. The coordinator passes
    /// `Some(value)`; every worker returns the coordinator's value.
    fn broadcast(&self, value: Option<f64>) -> Result<f64>;

    /// Whether this worker is the designated coordinator.
    fn is_coordinator(&self) -> bool {
        self.rank() == COORDINATOR
    }
}
