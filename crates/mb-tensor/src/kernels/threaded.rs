use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use tracing::debug;

use crate::error::Result;

/// Rows handed to each worker when `n` rows are split across `workers`,
/// keeping every range a multiple of `row_multiple` except possibly the last.
///
/// Never yields more ranges than workers.
pub fn rows_per_worker(n: usize, workers: usize, row_multiple: usize) -> usize {
    let units = n.div_ceil(row_multiple);
    let workers = workers.clamp(1, units.max(1));
    units.div_ceil(workers) * row_multiple
}

/// Split the rows of `c` into disjoint ranges and run `body(first_row, rows)`
/// for each on a dedicated pool of at most `workers` threads.
///
/// Returns once every range has been processed; each range is written by
/// exactly one task.
pub(crate) fn for_each_row_range<F>(
    c: &mut [f64],
    n: usize,
    workers: usize,
    row_multiple: usize,
    body: F,
) -> Result<()>
where
    F: Fn(usize, &mut [f64]) + Send + Sync,
{
    if n == 0 {
        return Ok(());
    }
    let rows = rows_per_worker(n, workers, row_multiple);
    let threads = n.div_ceil(rows);
    debug!(n, workers, threads, rows_per_worker = rows, "partitioning output rows");

    let pool = ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("mb-worker-{}", i))
        .build()?;
    pool.install(|| {
        c.par_chunks_mut(rows * n)
            .enumerate()
            .for_each(|(chunk, c_rows)| body(chunk * rows, c_rows));
    });
    Ok(())
}

/// Multithreaded `c = a * b`: rows of `c` are split across `workers`.
///
/// Each worker computes its rows with the same triple loop as
/// [`matmul_naive`](super::naive::matmul_naive), so results match it exactly.
pub fn matmul_mt(a: &[f64], b: &[f64], c: &mut [f64], n: usize, workers: usize) -> Result<()> {
    debug_assert_eq!(a.len(), n * n);
    debug_assert_eq!(b.len(), n * n);
    debug_assert_eq!(c.len(), n * n);

    for_each_row_range(c, n, workers, 1, |first_row, c_rows| {
        for (r, c_row) in c_rows.chunks_exact_mut(n).enumerate() {
            let a_row = &a[(first_row + r) * n..(first_row + r + 1) * n];
            for (j, out) in c_row.iter_mut().enumerate() {
                let mut sum = 0.0f64;
                for k in 0..n {
                    sum += a_row[k] * b[k * n + j];
                }
                *out = sum;
            }
        }
    })
}
