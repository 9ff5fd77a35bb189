pub mod bracket;
pub mod distributed;
pub mod nth_element;

/// Tuning parameters for distributed selection.
#[derive(Debug, Clone)]
pub struct SelectConfig {
    /// Live-total switch point between the sampled refinement strategy and
    /// the exact gather-and-select base case.
    pub threshold: u64,
    /// Cross-group sample size target for each bracket estimation, spread
    /// evenly across workers.
    pub sample_budget: u64,
}

impl Default for SelectConfig {
    fn default() -> Self {
        Self {
            threshold: 10_000_000,
            sample_budget: 100_000,
        }
    }
}

pub use bracket::pivot_bracket;
pub use distributed::{gather_select, median, quantile, quantile_with, select_nth};
pub use nth_element::nth_element;
