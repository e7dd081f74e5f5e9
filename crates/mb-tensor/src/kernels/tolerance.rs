//! Tolerance-based comparison of kernel outputs.
//!
//! Variants may sum the `n` terms of each entry in different orders, so
//! their outputs are compared against a bound that grows with `n` rather
//! than a fixed epsilon.

/// Largest absolute value in `xs`, 0 for an empty slice.
pub fn max_abs(xs: &[f64]) -> f64 {
    xs.iter().fold(0.0f64, |m, v| m.max(v.abs()))
}

/// Largest element-wise absolute difference. NaN entries and length
/// mismatches compare as infinitely far apart.
pub fn max_abs_diff(actual: &[f64], expected: &[f64]) -> f64 {
    if actual.len() != expected.len() {
        return f64::INFINITY;
    }
    actual
        .iter()
        .zip(expected)
        .map(|(x, y)| {
            let d = (x - y).abs();
            if d.is_nan() {
                f64::INFINITY
            } else {
                d
            }
        })
        .fold(0.0, f64::max)
}

/// Allowed difference between two summation orders of an `n`-term dot
/// product whose terms have absolute values summing to at most `magnitude`.
///
/// Each order is within `n * eps/2 * magnitude` of the exact result, so two
/// orders differ by at most twice that; the bound is doubled again for slack.
pub fn tolerance(n: usize, magnitude: f64) -> f64 {
    2.0 * n as f64 * f64::EPSILON * magnitude
}

/// [`tolerance`] for the product of two `n * n` matrices.
pub fn product_tolerance(a: &[f64], b: &[f64], n: usize) -> f64 {
    tolerance(n, n as f64 * max_abs(a) * max_abs(b))
}

#[cfg(test)]
pub(crate) fn assert_close(actual: &[f64], expected: &[f64], n: usize) {
    let diff = max_abs_diff(actual, expected);
    let tol = tolerance(n, max_abs(expected));
    assert!(diff <= tol, "max difference {} exceeds tolerance {}", diff, tol);
}
