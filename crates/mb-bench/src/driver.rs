//! Drives each configured variant through one timed invocation.

use std::time::Instant;

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info};

use mb_tensor::kernels::naive::{matmul_naive, transpose_into};
use mb_tensor::kernels::tolerance::{max_abs_diff, product_tolerance};
use mb_tensor::{align, DeviceQueue, KernelTable, Product, Shape, Tensor, Variant};

use crate::config::{BenchConfig, VariantSpec};
use crate::error::{BenchError, Result};
use crate::report::{BenchReport, BenchResult};

/// Random `n * n` matrix with entries uniform in `[0, 1)`.
pub fn random_matrix(rng: &mut StdRng, n: usize) -> Tensor {
    let dist = Uniform::new(0.0f64, 1.0);
    let data: Vec<f64> = dist.sample_iter(rng).take(n * n).collect();
    Tensor::from_f64(data, Shape::square(n))
}

pub struct Driver<'t> {
    config: BenchConfig,
    table: &'t KernelTable,
}

impl Driver<'static> {
    /// Driver over the process-wide kernel table.
    pub fn new(config: BenchConfig) -> Result<Self> {
        Driver::with_table(config, KernelTable::global())
    }
}

impl<'t> Driver<'t> {
    /// Driver that binds every call through `table`.
    pub fn with_table(config: BenchConfig, table: &'t KernelTable) -> Result<Self> {
        config.validate()?;
        Ok(Driver { config, table })
    }

    pub fn run(&self) -> Result<BenchReport> {
        self.run_with(|_| {})
    }

    /// Run every configured variant in order, calling `on_result` as soon as
    /// each one has been timed.
    ///
    /// Stops at the first failing call; results already produced have been
    /// passed to `on_result` by then.
    pub fn run_with<F: FnMut(&BenchResult)>(&self, mut on_result: F) -> Result<BenchReport> {
        let n = self.config.size;
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let a = random_matrix(&mut rng, n);
        let b = random_matrix(&mut rng, n);

        // Only `a` is aligned; `b` is handed over as allocated.
        let a = align(&a, self.config.alignment()?);
        info!(
            n,
            copied = !a.is_aliased(),
            variants = self.config.variants.len(),
            "inputs ready"
        );

        let table = self.table;
        let mut references = References::default();
        let mut report = BenchReport {
            size: n,
            results: Vec::with_capacity(self.config.variants.len()),
        };
        for spec in &self.config.variants {
            let label = spec.label();
            let mut c = Tensor::empty(Shape::square(n));
            let call = table.bind(spec.variant, &a, &b, &mut c, spec.workers)?;
            debug!(label = %label, workers = ?call.workers(), "invoking");

            let start = Instant::now();
            call.invoke()?;
            let seconds = start.elapsed().as_secs_f64();
            info!(label = %label, seconds, "variant finished");

            let result = BenchResult { label, seconds };
            on_result(&result);
            if self.config.verify {
                references.check(spec, &a, &b, &c, &result.label)?;
            }
            report.results.push(result);
        }

        if self
            .config
            .variants
            .iter()
            .any(|s| s.variant == Variant::Device)
        {
            DeviceQueue::shutdown_global()?;
        }
        Ok(report)
    }
}

/// Naive reference products, computed on first use.
#[derive(Default)]
struct References {
    ab: Option<Vec<f64>>,
    abt: Option<Vec<f64>>,
}

impl References {
    fn check(
        &mut self,
        spec: &VariantSpec,
        a: &Tensor,
        b: &Tensor,
        c: &Tensor,
        label: &str,
    ) -> Result<()> {
        let n = a.shape().dim(0);
        let (a, b, c) = (a.data_f64()?, b.data_f64()?, c.data_f64()?);
        let expected = match spec.variant.descriptor().product {
            Product::AB => self.ab.get_or_insert_with(|| {
                let mut out = vec![0.0; n * n];
                matmul_naive(a, b, &mut out, n);
                out
            }),
            Product::ABt => self.abt.get_or_insert_with(|| {
                let mut bt = vec![0.0; n * n];
                transpose_into(b, &mut bt, n);
                let mut out = vec![0.0; n * n];
                matmul_naive(a, &bt, &mut out, n);
                out
            }),
        };
        check_output(label, c, expected, product_tolerance(a, b, n))
    }
}

/// Compare `actual` with `expected` within `tolerance`.
pub fn check_output(label: &str, actual: &[f64], expected: &[f64], tolerance: f64) -> Result<()> {
    let diff = max_abs_diff(actual, expected);
    if diff > tolerance {
        return Err(BenchError::Verification {
            label: label.to_string(),
            diff,
            tolerance,
        });
    }
    debug!(label, diff, tolerance, "output verified");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use approx::assert_abs_diff_eq;
    use mb_tensor::TensorError;

    fn config(variants: &[&str]) -> BenchConfig {
        BenchConfig {
            size: 12,
            seed: Some(42),
            variants: variants.iter().map(|v| v.parse().unwrap()).collect(),
            verify: true,
            ..BenchConfig::default()
        }
    }

    #[test]
    fn test_random_matrix_range_and_seed() {
        let a = random_matrix(&mut StdRng::seed_from_u64(9), 10);
        let b = random_matrix(&mut StdRng::seed_from_u64(9), 10);
        let data = a.data_f64().unwrap();
        assert_eq!(data, b.data_f64().unwrap());
        assert!(data.iter().all(|&v| (0.0..1.0).contains(&v)));
        let mean = data.iter().sum::<f64>() / data.len() as f64;
        assert_abs_diff_eq!(mean, 0.5, epsilon = 0.15);
    }

    #[test]
    fn test_one_result_per_variant_in_order() {
        let variants = ["naive", "transpose", "mt:3", "simd", "simd-mt:2"];
        let driver = Driver::new(config(&variants)).unwrap();
        let mut seen = Vec::new();
        let report = driver.run_with(|r| seen.push(r.label.clone())).unwrap();
        let labels: Vec<&str> = report.results.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, variants);
        assert_eq!(seen, labels);
        assert!(report.results.iter().all(|r| r.seconds >= 0.0));
    }

    #[test]
    fn test_device_variant() {
        let driver = Driver::new(config(&["device"])).unwrap();
        let report = driver.run().unwrap();
        assert_eq!(report.len(), 1);
    }

    #[test]
    fn test_check_output() {
        let expected = [1.0, 2.0, 3.0];
        check_output("x", &[1.0, 2.0, 3.0 + 1e-12], &expected, 1e-9).unwrap();
        let err = check_output("x", &[1.0, 2.5, 3.0], &expected, 1e-9).unwrap_err();
        assert!(matches!(err, BenchError::Verification { ref label, .. } if label == "x"));
    }

    fn failing_entry(
        _: &[f64],
        _: &[f64],
        _: &mut [f64],
        _: usize,
        _: Option<usize>,
    ) -> mb_tensor::Result<()> {
        Err(TensorError::Device("kernel launch failed".to_string()))
    }

    static SIMD_CALLS: AtomicUsize = AtomicUsize::new(0);

    fn counting_entry(
        _: &[f64],
        _: &[f64],
        _: &mut [f64],
        _: usize,
        _: Option<usize>,
    ) -> mb_tensor::Result<()> {
        SIMD_CALLS.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    #[test]
    fn test_stops_at_first_failing_variant() {
        let table = KernelTable::new()
            .with_entry(Variant::Multithreaded, failing_entry)
            .with_entry(Variant::Simd, counting_entry);
        let driver = Driver::with_table(config(&["naive", "mt:2", "simd"]), &table).unwrap();

        let mut seen = Vec::new();
        let err = driver.run_with(|r| seen.push(r.label.clone())).unwrap_err();
        assert!(matches!(err, BenchError::Tensor(TensorError::Device(_))));
        assert_eq!(seen, ["naive"]);
        assert_eq!(SIMD_CALLS.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_zero_size() {
        let mut cfg = config(&["naive", "mt:2"]);
        cfg.size = 0;
        let report = Driver::new(cfg).unwrap().run().unwrap();
        assert_eq!(report.len(), 2);
    }
}
