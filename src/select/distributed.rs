//! Distributed exact selection over a worker group.
//!
//! Every worker runs the same control path; the group cooperates only
//! through [`Communicator`] collectives, so every collective call below is
//! a group-wide barrier and the call sequence is identical on all workers.

use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;

use crate::comm::{Communicator, GatherLayout};
use crate::error::{Error, Result};
use crate::select::bracket::pivot_bracket;
use crate::select::nth_element::nth_element;
use crate::select::SelectConfig;

/// Computes the exact quantile `q` of the dataset partitioned across the
/// worker group, with the default configuration and a per-rank seeded
/// sampling source.
///
/// `local` is this worker's share, `total_size` the group-wide element
/// count and `q` a fraction in `[0, 1]` mapping to rank
/// `floor(q * total_size)` (clamped to the maximum for `q = 1.0`). Every
/// worker must make the same call with identical `total_size` and `q`, and
/// every worker receives the same value.
///
/// # Examples
///
/// ```
/// use dselect::{quantile, LocalComm};
///
/// let parts = [vec![1.0, 4.0, 7.0], vec![2.0, 5.0, 8.0, 10.0], vec![3.0, 6.0, 9.0]];
/// let comms = LocalComm::group(parts.len());
/// let medians = std::thread::scope(|scope| {
///     let handles: Vec<_> = comms
///         .into_iter()
///         .zip(&parts)
///         .map(|(comm, part)| scope.spawn(move || quantile(&comm, part, 10, 0.5).unwrap()))
///         .collect();
///     handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
/// });
/// assert_eq!(medians, vec![6.0, 6.0, 6.0]);
/// ```
pub fn quantile<C: Communicator>(comm: &C, local: &[f64], total_size: u64, q: f64) -> Result<f64> {
    let mut rng = ChaCha20Rng::seed_from_u64(comm.rank() as u64);
    quantile_with(comm, local, total_size, q, &SelectConfig::default(), &mut rng)
}

/// [`quantile`] with explicit tuning parameters and sampling source.
pub fn quantile_with<C, R>(
    comm: &C,
    local: &[f64],
    total_size: u64,
    q: f64,
    config: &SelectConfig,
    rng: &mut R,
) -> Result<f64>
where
    C: Communicator,
    R: Rng,
{
    if !(0.0..=1.0).contains(&q) {
        return Err(Error::InvalidQuantile(q));
    }
    if total_size == 0 {
        return Err(Error::EmptyDataset);
    }
    // q = 1.0 maps to the maximum, not one past the end
    let k = ((q * total_size as f64) as u64).min(total_size - 1);
    select_nth(comm, local.to_vec(), k, config, rng)
}

/// Exact median of the partitioned dataset.
pub fn median<C: Communicator>(comm: &C, local: &[f64], total_size: u64) -> Result<f64> {
    quantile(comm, local, total_size, 0.5)
}

/// Selects the exact k-th order statistic (0-indexed) of the dataset
/// partitioned across the worker group.
///
/// Refinement loop: reduce the live total; below `config.threshold` hand
/// off to [`gather_select`]; otherwise estimate a pivot bracket, count the
/// three comparison classes exactly, and keep only the class containing
/// rank `k`. The owned buffer is replaced wholesale each level and the
/// live total strictly shrinks, so the gather base case is always reached.
pub fn select_nth<C, R>(
    comm: &C,
    mut local: Vec<f64>,
    mut k: u64,
    config: &SelectConfig,
    rng: &mut R,
) -> Result<f64>
where
    C: Communicator,
    R: Rng,
{
    loop {
        let current_total = comm.sum(local.len() as u64)?;
        debug!("total size: {} k: {}", current_total, k);
        if current_total == 0 {
            return Err(Error::EmptyDataset);
        }
        if k >= current_total {
            return Err(Error::RankOutOfRange {
                rank: k,
                total: current_total,
            });
        }
        if current_total < config.threshold {
            return gather_select(comm, &local, k);
        }

        let (k1_val, k2_val) =
            pivot_bracket(comm, &local, current_total, k, config.sample_budget, rng)?;
        debug!("k1_val: {} k2_val: {}", k1_val, k2_val);

        // class edges are half-open: below < k1_val, middle in [k1_val,
        // k2_val), above >= k2_val; identical comparisons on every worker
        let local_below = local.par_iter().filter(|&&v| v < k1_val).count() as u64;
        let local_middle = local
            .par_iter()
            .filter(|&&v| v >= k1_val && v < k2_val)
            .count() as u64;
        let local_above = local.par_iter().filter(|&&v| v >= k2_val).count() as u64;
        let below = comm.sum(local_below)?;
        let middle = comm.sum(local_middle)?;
        let above = comm.sum(local_above)?;
        debug!("class sizes: {} {} {}", below, middle, above);

        if below + middle + above != current_total {
            return Err(Error::Protocol(format!(
                "class sizes {below} + {middle} + {above} disagree with the live total {current_total}"
            )));
        }
        // the top class already covers every rank from k to the end, so
        // k2_val itself occupies rank k
        if above > current_total - k {
            return Ok(k2_val);
        }
        if below >= k {
            return Err(Error::Protocol(format!(
                "rank {k} escaped the bracket: {below} elements sit below it"
            )));
        }

        // rank k survives in the bracketed or the top class; keep that
        // class and drop everything ranked before it
        let kept: Vec<f64> = if k < below + middle {
            debug!("keeping the bracketed class");
            k -= below;
            local
                .par_iter()
                .copied()
                .filter(|&v| v >= k1_val && v < k2_val)
                .collect()
        } else {
            debug!("keeping the class above the bracket");
            k -= below + middle;
            local.par_iter().copied().filter(|&v| v >= k2_val).collect()
        };
        local = kept;
    }
}

/// Exact selection base case: gather every worker's buffer onto the
/// coordinator, select rank `k` there and broadcast the value.
pub fn gather_select<C: Communicator>(comm: &C, local: &[f64], k: u64) -> Result<f64> {
    let count = u32::try_from(local.len())
        .map_err(|_| Error::Protocol("local buffer does not fit a 32-bit gather count".into()))?;
    let counts = comm.gather_counts(count)?;
    let layout = counts.map(GatherLayout::from_counts);
    let pool = comm.gather_values(local, layout.as_ref())?;
    let result = match pool {
        Some(mut pool) => {
            debug!("gathered {} values for exact selection", pool.len());
            if k as usize >= pool.len() {
                return Err(Error::RankOutOfRange {
                    rank: k,
                    total: pool.len() as u64,
                });
            }
            Some(nth_element(&mut pool, k as usize))
        }
        None => None,
    };
    comm.broadcast(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalComm;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use std::thread;

    fn run_quantile(parts: &[Vec<f64>], q: f64, config: &SelectConfig) -> Vec<Result<f64>> {
        let total: u64 = parts.iter().map(|p| p.len() as u64).sum();
        let comms = LocalComm::group(parts.len());
        thread::scope(|scope| {
            let handles: Vec<_> = comms
                .into_iter()
                .zip(parts)
                .map(|(comm, part)| {
                    scope.spawn(move || {
                        let mut rng = ChaCha20Rng::seed_from_u64(comm.rank() as u64);
                        quantile_with(&comm, part, total, q, config, &mut rng)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }

    fn unwrap_agreed(results: Vec<Result<f64>>) -> f64 {
        let values: Vec<f64> = results.into_iter().map(|r| r.unwrap()).collect();
        for &v in &values[1..] {
            assert_eq!(v, values[0], "workers disagree on the result");
        }
        values[0]
    }

    fn reference_rank(data: &[f64], q: f64) -> f64 {
        let mut sorted = data.to_vec();
        sorted.sort_by(f64::total_cmp);
        let k = ((q * sorted.len() as f64) as usize).min(sorted.len() - 1);
        sorted[k]
    }

    fn deal(data: &[f64], workers: usize) -> Vec<Vec<f64>> {
        let mut parts = vec![Vec::new(); workers];
        for (i, &v) in data.iter().enumerate() {
            parts[i % workers].push(v);
        }
        parts
    }

    #[test]
    fn test_median_of_ten_split_three_ways() {
        let parts = [
            vec![1.0, 4.0, 7.0],
            vec![2.0, 5.0, 8.0, 10.0],
            vec![3.0, 6.0, 9.0],
        ];
        let result = unwrap_agreed(run_quantile(&parts, 0.5, &SelectConfig::default()));
        assert_eq!(result, 6.0);
    }

    #[test]
    fn test_minimum_with_empty_peer_buffers() {
        let parts = [vec![5.0, 1.0, 3.0], vec![], vec![]];
        let result = unwrap_agreed(run_quantile(&parts, 0.0, &SelectConfig::default()));
        assert_eq!(result, 1.0);
    }

    #[test]
    fn test_group_size_invariance() {
        let mut data: Vec<f64> = (0..100).map(f64::from).collect();
        data.shuffle(&mut StdRng::seed_from_u64(3));
        let expected = reference_rank(&data, 0.3);
        for workers in [1, 2, 17, 256] {
            let parts = deal(&data, workers);
            let result = unwrap_agreed(run_quantile(&parts, 0.3, &SelectConfig::default()));
            assert_eq!(result, expected, "group of {workers} disagrees");
        }
    }

    #[test]
    fn test_maximally_unbalanced_partition() {
        let mut rng = StdRng::seed_from_u64(17);
        let data: Vec<f64> = (0..500).map(|_| rng.gen_range(-1e3..1e3)).collect();
        for q in [0.0, 0.25, 0.5, 0.75, 1.0] {
            let parts = vec![Vec::new(), Vec::new(), data.clone(), Vec::new()];
            let result = unwrap_agreed(run_quantile(&parts, q, &SelectConfig::default()));
            assert_eq!(result, reference_rank(&data, q));
        }
    }

    #[test]
    fn test_large_case_refinement_path() {
        let mut data: Vec<f64> = (0..4096).map(f64::from).collect();
        data.shuffle(&mut StdRng::seed_from_u64(29));
        let config = SelectConfig {
            threshold: 64,
            sample_budget: 256,
        };
        for q in [0.37, 0.5, 0.81] {
            let parts = deal(&data, 4);
            let result = unwrap_agreed(run_quantile(&parts, q, &config));
            assert_eq!(result, reference_rank(&data, q));
        }
    }

    #[test]
    fn test_threshold_boundary_both_paths_agree() {
        let mut data: Vec<f64> = (0..100).map(f64::from).collect();
        data.shuffle(&mut StdRng::seed_from_u64(41));
        let expected = reference_rank(&data, 0.5);
        // total == threshold takes the refinement path, total < threshold
        // the gather path
        for threshold in [100, 101] {
            let config = SelectConfig {
                threshold,
                sample_budget: 64,
            };
            let parts = deal(&data, 2);
            let result = unwrap_agreed(run_quantile(&parts, 0.5, &config));
            assert_eq!(result, expected, "threshold {threshold} disagrees");
        }
    }

    #[test]
    fn test_repeated_runs_return_identical_values() {
        let mut data: Vec<f64> = (0..2048).map(|i| f64::from(i) * 0.5).collect();
        data.shuffle(&mut StdRng::seed_from_u64(53));
        let config = SelectConfig {
            threshold: 128,
            sample_budget: 256,
        };
        let parts = deal(&data, 3);
        let first = unwrap_agreed(run_quantile(&parts, 0.62, &config));
        let second = unwrap_agreed(run_quantile(&parts, 0.62, &config));
        assert_eq!(first, second);
    }

    #[test]
    fn test_quantile_one_returns_maximum() {
        let parts = [vec![3.0, 9.0], vec![5.0, 2.0]];
        let result = unwrap_agreed(run_quantile(&parts, 1.0, &SelectConfig::default()));
        assert_eq!(result, 9.0);
    }

    #[test]
    fn test_median_helper() {
        let comms = LocalComm::group(1);
        let comm = &comms[0];
        assert_eq!(median(comm, &[4.0, 1.0, 8.0, 2.0, 6.0], 5).unwrap(), 4.0);
    }

    #[test]
    fn test_rejects_quantile_outside_unit_interval() {
        let comms = LocalComm::group(1);
        let comm = &comms[0];
        assert!(matches!(
            quantile(comm, &[1.0], 1, 1.5),
            Err(Error::InvalidQuantile(_))
        ));
        assert!(matches!(
            quantile(comm, &[1.0], 1, f64::NAN),
            Err(Error::InvalidQuantile(_))
        ));
    }

    #[test]
    fn test_rejects_empty_dataset() {
        let parts = [vec![], vec![]];
        for result in run_quantile(&parts, 0.5, &SelectConfig::default()) {
            assert!(matches!(result, Err(Error::EmptyDataset)));
        }
    }

    #[test]
    fn test_select_nth_rejects_out_of_range_rank() {
        let comms = LocalComm::group(1);
        let comm = &comms[0];
        let mut rng = ChaCha20Rng::seed_from_u64(0);
        let result = select_nth(
            comm,
            vec![1.0, 2.0, 3.0],
            5,
            &SelectConfig::default(),
            &mut rng,
        );
        assert!(matches!(
            result,
            Err(Error::RankOutOfRange { rank: 5, total: 3 })
        ));
    }
}
