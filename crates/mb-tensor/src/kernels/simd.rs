//! Width-4 vectorized kernels.
//!
//! `b` is packed into an aligned block holding `b^T`, so both operands of
//! every dot product are contiguous rows. [`matmul_simd_dot`] computes each
//! output entry with its own dot product; [`matmul_simd`] produces 2x2 register
//! blocks that share loads across two rows of `a` and two rows of `b^T`.
//! With AVX the lanes are `__m256d` registers; without it a portable path
//! keeps four scalar lanes summed in the same order.
//!
//! Aligned loads are used only when `a` starts on a 32-byte boundary and `n`
//! is a multiple of 4 (so every row starts on one too). Otherwise loads are
//! unaligned and the `n % 4` tail of each row is finished in scalar code.

use crate::aligned::{AlignedBlock, Alignment};
use crate::error::Result;

use super::naive::transpose_into;
use super::threaded::for_each_row_range;

const LANES: usize = 4;

/// Pack `b^T` into a 32-byte aligned block.
pub fn pack_transposed(b: &[f64], n: usize) -> AlignedBlock<f64> {
    let mut bt = AlignedBlock::allocate(n * n, Alignment::AVX);
    transpose_into(b, bt.as_mut_slice(), n);
    bt
}

/// Vectorized single-threaded `c = a * b`.
pub fn matmul_simd(a: &[f64], b: &[f64], c: &mut [f64], n: usize) {
    debug_assert_eq!(a.len(), n * n);
    debug_assert_eq!(b.len(), n * n);
    debug_assert_eq!(c.len(), n * n);

    let bt = pack_transposed(b, n);
    let dot = Dot::select(a, n);
    compute_rows(dot, a, bt.as_slice(), c, 0, n);
}

/// Vectorized `c = a * b`, one width-4 dot product per output entry.
pub fn matmul_simd_dot(a: &[f64], b: &[f64], c: &mut [f64], n: usize) {
    debug_assert_eq!(a.len(), n * n);
    debug_assert_eq!(b.len(), n * n);
    debug_assert_eq!(c.len(), n * n);

    let bt = pack_transposed(b, n);
    let dot = Dot::select(a, n);
    dot_rows(dot, a, bt.as_slice(), c, n);
}

/// Vectorized `c = a * b` with output rows split across `workers`.
///
/// Ranges are whole 2-row blocks, so results are identical to
/// [`matmul_simd`] for every worker count.
pub fn matmul_simd_mt(
    a: &[f64],
    b: &[f64],
    c: &mut [f64],
    n: usize,
    workers: usize,
) -> Result<()> {
    debug_assert_eq!(a.len(), n * n);
    debug_assert_eq!(b.len(), n * n);
    debug_assert_eq!(c.len(), n * n);

    let bt = pack_transposed(b, n);
    let dot = Dot::select(a, n);
    let bt = bt.as_slice();
    for_each_row_range(c, n, workers, 2, |first_row, c_rows| {
        compute_rows(dot, a, bt, c_rows, first_row, n);
    })
}

/// Fill `c_rows` (rows `first_row..` of the output) from `a` and packed `bt`.
fn compute_rows(
    dot: Dot,
    a: &[f64],
    bt: &[f64],
    c_rows: &mut [f64],
    first_row: usize,
    n: usize,
) {
    if n == 0 {
        return;
    }
    let rows = c_rows.len() / n;
    let mut r = 0;
    while r + 1 < rows {
        let (i0, i1) = (first_row + r, first_row + r + 1);
        let a0 = &a[i0 * n..(i0 + 1) * n];
        let a1 = &a[i1 * n..(i1 + 1) * n];
        let mut j = 0;
        while j + 1 < n {
            let b0 = &bt[j * n..(j + 1) * n];
            let b1 = &bt[(j + 1) * n..(j + 2) * n];
            let [c00, c01, c10, c11] = dot.block_2x2(a0, a1, b0, b1);
            c_rows[r * n + j] = c00;
            c_rows[r * n + j + 1] = c01;
            c_rows[(r + 1) * n + j] = c10;
            c_rows[(r + 1) * n + j + 1] = c11;
            j += 2;
        }
        if j < n {
            let b0 = &bt[j * n..(j + 1) * n];
            c_rows[r * n + j] = dot.dot(a0, b0);
            c_rows[(r + 1) * n + j] = dot.dot(a1, b0);
        }
        r += 2;
    }
    if r < rows {
        let i = first_row + r;
        let a0 = &a[i * n..(i + 1) * n];
        for j in 0..n {
            c_rows[r * n + j] = dot.dot(a0, &bt[j * n..(j + 1) * n]);
        }
    }
}

fn dot_rows(dot: Dot, a: &[f64], bt: &[f64], c: &mut [f64], n: usize) {
    if n == 0 {
        return;
    }
    for (a_row, c_row) in a.chunks_exact(n).zip(c.chunks_exact_mut(n)) {
        for (out, bt_row) in c_row.iter_mut().zip(bt.chunks_exact(n)) {
            *out = dot.dot(a_row, bt_row);
        }
    }
}

/// Selected dot-product implementation for one kernel call.
#[derive(Debug, Clone, Copy)]
struct Dot {
    avx: bool,
    aligned: bool,
}

impl Dot {
    fn select(a: &[f64], n: usize) -> Self {
        Dot {
            avx: avx_available(),
            aligned: n % LANES == 0 && Alignment::AVX.is_aligned(a.as_ptr() as usize),
        }
    }

    fn dot(self, u: &[f64], v: &[f64]) -> f64 {
        #[cfg(target_arch = "x86_64")]
        if self.avx {
            // SAFETY: AVX was detected at runtime; `aligned` is only set when
            // every row handed in starts on a 32-byte boundary.
            return unsafe { avx::dot(u, v, self.aligned) };
        }
        portable::dot(u, v)
    }

    fn block_2x2(self, u0: &[f64], u1: &[f64], v0: &[f64], v1: &[f64]) -> [f64; 4] {
        #[cfg(target_arch = "x86_64")]
        if self.avx {
            // SAFETY: as in `dot`.
            return unsafe { avx::block_2x2(u0, u1, v0, v1, self.aligned) };
        }
        portable::block_2x2(u0, u1, v0, v1)
    }
}

fn avx_available() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        is_x86_feature_detected!("avx")
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

mod portable {
    use super::LANES;

    fn finish(acc: [f64; LANES], u: &[f64], v: &[f64], body: usize) -> f64 {
        let mut sum = (acc[0] + acc[2]) + (acc[1] + acc[3]);
        for k in body..u.len() {
            sum += u[k] * v[k];
        }
        sum
    }

    pub fn dot(u: &[f64], v: &[f64]) -> f64 {
        let body = u.len() - u.len() % LANES;
        let mut acc = [0.0f64; LANES];
        for (cu, cv) in u[..body].chunks_exact(LANES).zip(v[..body].chunks_exact(LANES)) {
            for l in 0..LANES {
                acc[l] += cu[l] * cv[l];
            }
        }
        finish(acc, u, v, body)
    }

    pub fn block_2x2(u0: &[f64], u1: &[f64], v0: &[f64], v1: &[f64]) -> [f64; 4] {
        [dot(u0, v0), dot(u0, v1), dot(u1, v0), dot(u1, v1)]
    }
}

#[cfg(target_arch = "x86_64")]
mod avx {
    use std::arch::x86_64::*;

    use super::LANES;

    #[inline]
    #[target_feature(enable = "avx")]
    unsafe fn load(p: *const f64, aligned: bool) -> __m256d {
        if aligned {
            _mm256_load_pd(p)
        } else {
            _mm256_loadu_pd(p)
        }
    }

    #[inline]
    #[target_feature(enable = "avx")]
    unsafe fn hsum(v: __m256d) -> f64 {
        let lo = _mm256_castpd256_pd128(v);
        let hi = _mm256_extractf128_pd(v, 1);
        let pair = _mm_add_pd(lo, hi);
        let high = _mm_unpackhi_pd(pair, pair);
        _mm_cvtsd_f64(_mm_add_sd(pair, high))
    }

    fn tail(u: &[f64], v: &[f64], body: usize) -> f64 {
        (body..u.len()).fold(0.0, |s, k| s + u[k] * v[k])
    }

    /// # Safety
    /// AVX must be available. `u` and `v` have equal length; with `aligned`
    /// both start on a 32-byte boundary.
    #[target_feature(enable = "avx")]
    pub unsafe fn dot(u: &[f64], v: &[f64], aligned: bool) -> f64 {
        let body = u.len() - u.len() % LANES;
        let mut acc = _mm256_setzero_pd();
        let mut k = 0;
        while k < body {
            let x = load(u.as_ptr().add(k), aligned);
            let y = load(v.as_ptr().add(k), aligned);
            acc = _mm256_add_pd(acc, _mm256_mul_pd(x, y));
            k += LANES;
        }
        hsum(acc) + tail(u, v, body)
    }

    /// Four dot products `[u0.v0, u0.v1, u1.v0, u1.v1]` sharing loads.
    ///
    /// # Safety
    /// As for [`dot`], for all four slices.
    #[target_feature(enable = "avx")]
    pub unsafe fn block_2x2(
        u0: &[f64],
        u1: &[f64],
        v0: &[f64],
        v1: &[f64],
        aligned: bool,
    ) -> [f64; 4] {
        let len = u0.len();
        let body = len - len % LANES;
        let mut acc00 = _mm256_setzero_pd();
        let mut acc01 = _mm256_setzero_pd();
        let mut acc10 = _mm256_setzero_pd();
        let mut acc11 = _mm256_setzero_pd();
        let mut k = 0;
        while k < body {
            let x0 = load(u0.as_ptr().add(k), aligned);
            let x1 = load(u1.as_ptr().add(k), aligned);
            let y0 = load(v0.as_ptr().add(k), aligned);
            let y1 = load(v1.as_ptr().add(k), aligned);
            acc00 = _mm256_add_pd(acc00, _mm256_mul_pd(x0, y0));
            acc01 = _mm256_add_pd(acc01, _mm256_mul_pd(x0, y1));
            acc10 = _mm256_add_pd(acc10, _mm256_mul_pd(x1, y0));
            acc11 = _mm256_add_pd(acc11, _mm256_mul_pd(x1, y1));
            k += LANES;
        }
        [
            hsum(acc00) + tail(u0, v0, body),
            hsum(acc01) + tail(u0, v1, body),
            hsum(acc10) + tail(u1, v0, body),
            hsum(acc11) + tail(u1, v1, body),
        ]
    }
}
