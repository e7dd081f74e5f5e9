/// Reference triple loop: `c[i][j] = sum_k a[i][k] * b[k][j]`.
///
/// All three slices are row-major `n * n`. Every entry of `c` is assigned,
/// whatever it held before.
pub fn matmul_naive(a: &[f64], b: &[f64], c: &mut [f64], n: usize) {
    debug_assert_eq!(a.len(), n * n);
    debug_assert_eq!(b.len(), n * n);
    debug_assert_eq!(c.len(), n * n);

    for i in 0..n {
        for j in 0..n {
            let mut sum = 0.0f64;
            for k in 0..n {
                sum += a[i * n + k] * b[k * n + j];
            }
            c[i * n + j] = sum;
        }
    }
}

/// `c = a * b^T`.
///
/// Row `j` of `b` is column `j` of `b^T`, so every entry is a dot product of
/// two rows and `b` is read in its stored layout; callers hand `b` over
/// untransposed.
pub fn matmul_transpose_fused(a: &[f64], b: &[f64], c: &mut [f64], n: usize) {
    debug_assert_eq!(a.len(), n * n);
    debug_assert_eq!(b.len(), n * n);
    debug_assert_eq!(c.len(), n * n);

    for i in 0..n {
        let a_row = &a[i * n..(i + 1) * n];
        for j in 0..n {
            let b_row = &b[j * n..(j + 1) * n];
            let mut sum = 0.0f64;
            for k in 0..n {
                sum += a_row[k] * b_row[k];
            }
            c[i * n + j] = sum;
        }
    }
}

/// Row-major transpose of an `n * n` matrix into `out`.
pub fn transpose_into(src: &[f64], out: &mut [f64], n: usize) {
    debug_assert_eq!(src.len(), n * n);
    debug_assert_eq!(out.len(), n * n);

    for i in 0..n {
        for j in 0..n {
            out[j * n + i] = src[i * n + j];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: [f64; 4] = [1.0, 2.0, 3.0, 4.0];
    const B: [f64; 4] = [5.0, 6.0, 7.0, 8.0];

    #[test]
    fn test_naive_2x2() {
        let mut c = [f64::NAN; 4];
        matmul_naive(&A, &B, &mut c, 2);
        assert_eq!(c, [19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_naive_identity() {
        let id = [1.0, 0.0, 0.0, 1.0];
        let mut c = [0.0; 4];
        matmul_naive(&id, &A, &mut c, 2);
        assert_eq!(c, A);
    }

    #[test]
    fn test_transpose_fused_2x2() {
        let mut c = [f64::NAN; 4];
        matmul_transpose_fused(&A, &B, &mut c, 2);
        assert_eq!(c, [17.0, 23.0, 39.0, 53.0]);
    }

    #[test]
    fn test_transpose_fused_matches_naive_on_transposed_b() {
        let n = 3;
        let a: Vec<f64> = (0..9).map(|v| v as f64 * 0.5).collect();
        let b: Vec<f64> = (0..9).map(|v| 9.0 - v as f64).collect();
        let mut bt = vec![0.0; 9];
        transpose_into(&b, &mut bt, n);

        let mut fused = vec![0.0; 9];
        let mut reference = vec![0.0; 9];
        matmul_transpose_fused(&a, &b, &mut fused, n);
        matmul_naive(&a, &bt, &mut reference, n);
        assert_eq!(fused, reference);

        let mut plain = vec![0.0; 9];
        matmul_naive(&a, &b, &mut plain, n);
        assert_ne!(fused, plain);
    }

    #[test]
    fn test_empty() {
        let mut c: [f64; 0] = [];
        matmul_naive(&[], &[], &mut c, 0);
        matmul_transpose_fused(&[], &[], &mut c, 0);
    }
}
