use log::debug;
use rand::Rng;

use crate::comm::{Communicator, GatherLayout};
use crate::error::{Error, Result};
use crate::select::nth_element::nth_element;

/// Estimates a value bracket `(k1_val, k2_val)` expected to contain the
/// k-th order statistic of the live global dataset.
///
/// Every worker draws up to `sample_budget / group_size` values uniformly
/// with replacement from its buffer; the coordinator pools the samples,
/// rescales `k` into sample space, widens it by the error margin
/// `sqrt(total_sample * ln(current_total))` and selects the two bracket
/// values from the pool. The bracket is an estimate only; callers must
/// re-verify it by exact counting before trusting it.
///
/// All workers receive the identical pair. The sampling source is caller
/// supplied so a fixed seed reproduces the exact bracket.
pub fn pivot_bracket<C, R>(
    comm: &C,
    local: &[f64],
    current_total: u64,
    k: u64,
    sample_budget: u64,
    rng: &mut R,
) -> Result<(f64, f64)>
where
    C: Communicator,
    R: Rng,
{
    let per_worker = (sample_budget / comm.size() as u64).max(1);
    let my_sample_size = per_worker.min(local.len() as u64) as usize;
    let mut sample = Vec::with_capacity(my_sample_size);
    for _ in 0..my_sample_size {
        let index = rng.gen_range(0..local.len());
        sample.push(local[index]);
    }

    let count = u32::try_from(sample.len())
        .map_err(|_| Error::Protocol("sample does not fit a 32-bit gather count".into()))?;
    let counts = comm.gather_counts(count)?;
    let layout = counts.map(GatherLayout::from_counts);
    let pool = comm.gather_values(&sample, layout.as_ref())?;

    let bracket = match pool {
        Some(mut pool) => {
            if pool.is_empty() {
                return Err(Error::Protocol(
                    "bracket estimation over an empty global sample".into(),
                ));
            }
            let total_sample = pool.len();
            debug!("total sample size: {}", total_sample);
            let local_k = ((k as f64) * (total_sample as f64) / (current_total as f64)) as usize;
            let margin = ((total_sample as f64) * (current_total as f64).ln()).sqrt();
            let k1 = (((local_k as f64) - margin).max(0.0) as usize).min(total_sample - 1);
            let k2 = (((local_k as f64) + margin) as usize).min(total_sample - 1);
            let k1_val = nth_element(&mut pool, k1);
            let k2_val = nth_element(&mut pool, k2);
            debug!(
                "sample ranks: {} {} bracket: {} {}",
                k1, k2, k1_val, k2_val
            );
            Some((k1_val, k2_val))
        }
        None => None,
    };

    let k1_val = comm.broadcast(bracket.map(|b| b.0))?;
    let k2_val = comm.broadcast(bracket.map(|b| b.1))?;
    Ok((k1_val, k2_val))
}
