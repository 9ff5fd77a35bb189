//! Exact quantiles over data partitioned across a worker group.
//!
//! Every worker calls [`select::quantile`] with its local buffer and the
//! group cooperates through the [`comm::Communicator`] collectives; each
//! worker receives the exact k-th order statistic of the union of all
//! buffers. Small datasets are gathered and selected in one place; large
//! ones are narrowed by sampled pivot brackets whose correctness is
//! re-verified with exact counting at every step.

pub mod comm;
pub mod error;
pub mod select;

pub use comm::{Communicator, GatherLayout, LocalComm, COORDINATOR};
pub use error::{Error, Result};
pub use select::{median, nth_element, quantile, quantile_with, select_nth, SelectConfig};
