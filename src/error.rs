use thiserror::Error;

/// Errors reported by distributed selection and its collective substrate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("quantile fraction {0} is outside [0, 1]")]
    InvalidQuantile(f64),

    #[error("dataset is empty")]
    EmptyDataset,

    #[error("rank {rank} is out of range for {total} elements")]
    RankOutOfRange { rank: u64, total: u64 },

    /// A partition or bracket invariant failed. Continuing would return a
    /// wrong value with no signal, so the whole computation aborts.
    #[error("selection protocol violated: {0}")]
    Protocol(String),

    #[error("collective communication failed: {0}")]
    Comm(String),
}

pub type Result<T> = std::result::Result<T, Error>;
