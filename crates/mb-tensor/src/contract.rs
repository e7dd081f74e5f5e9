//! The call contract every kernel variant is invoked through.
//!
//! Each [`Variant`] has a static [`KernelDescriptor`] naming its parameters,
//! what each parameter must satisfy and what the call computes. The
//! [`KernelTable`] pairs descriptors with entry points once per process;
//! [`KernelTable::bind`] checks a concrete call against the descriptor and
//! only then hands back a [`BoundCall`] that can be issued.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use tracing::debug;

use crate::aligned::Alignment;
use crate::dtype::DType;
use crate::error::{Result, TensorError};
use crate::kernels;
use crate::tensor::Tensor;

/// One implementation of the N x N product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variant {
    Naive,
    TransposeFused,
    Multithreaded,
    Device,
    Simd,
    SimdDot,
    SimdMultithreaded,
}

impl Variant {
    pub const ALL: [Variant; 7] = [
        Variant::Naive,
        Variant::TransposeFused,
        Variant::Multithreaded,
        Variant::Device,
        Variant::Simd,
        Variant::SimdDot,
        Variant::SimdMultithreaded,
    ];

    /// Short name used on the command line and in reports.
    pub fn label(self) -> &'static str {
        match self {
            Variant::Naive => "naive",
            Variant::TransposeFused => "transpose",
            Variant::Multithreaded => "mt",
            Variant::Device => "device",
            Variant::Simd => "simd",
            Variant::SimdDot => "simd-dot",
            Variant::SimdMultithreaded => "simd-mt",
        }
    }

    pub fn descriptor(self) -> &'static KernelDescriptor {
        &DESCRIPTORS[self as usize]
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Variant {
    type Err = TensorError;

    fn from_str(s: &str) -> Result<Self> {
        Variant::ALL
            .into_iter()
            .find(|v| v.label() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Variant::ALL.iter().map(|v| v.label()).collect();
                TensorError::Other(format!(
                    "unknown kernel variant `{}` (expected one of: {})",
                    s,
                    known.join(", ")
                ))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRole {
    /// Read-only N x N matrix.
    Input,
    /// Write-only N x N matrix, fully overwritten.
    Output,
    /// The shared dimension N.
    Size,
    /// Worker thread count.
    Workers,
}

/// What a matrix parameter's memory must satisfy at the call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentRequirement {
    /// Base address must be a multiple of the alignment.
    Required(Alignment),
    NotRequired,
    /// Passed exactly as stored: the kernel transposes or packs it itself,
    /// so the caller must neither pre-transpose nor re-align it.
    MustNotPreTransform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub role: ParamRole,
    /// Element type for matrix parameters.
    pub dtype: Option<DType>,
    pub requirement: AlignmentRequirement,
}

/// The product a variant computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Product {
    /// `C = A * B`
    AB,
    /// `C = A * B^T`
    ABt,
}

/// How a call behaves with respect to the caller's thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocking {
    Synchronous,
    /// Returns after all internal workers have joined.
    InternallyParallel,
    /// Returns after the device has finished and results are copied back.
    DeviceRoundTrip,
}

/// Static description of one variant's call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelDescriptor {
    pub variant: Variant,
    /// Exported C symbol.
    pub symbol: &'static str,
    pub params: &'static [ParamSpec],
    pub product: Product,
    pub blocking: Blocking,
    /// Output rows are partitioned in multiples of this many rows.
    pub row_multiple: usize,
}

impl KernelDescriptor {
    pub fn param(&self, name: &str) -> Option<&'static ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn takes_workers(&self) -> bool {
        self.params.iter().any(|p| p.role == ParamRole::Workers)
    }

    /// Alignment demanded of `name`, if any.
    pub fn required_alignment(&self, name: &str) -> Option<Alignment> {
        match self.param(name)?.requirement {
            AlignmentRequirement::Required(alignment) => Some(alignment),
            _ => None,
        }
    }

    /// Largest useful worker count for an `n * n` call.
    pub fn max_workers(&self, n: usize) -> usize {
        (n / self.row_multiple).max(1)
    }
}

const fn matrix(
    name: &'static str,
    role: ParamRole,
    requirement: AlignmentRequirement,
) -> ParamSpec {
    ParamSpec {
        name,
        role,
        dtype: Some(DType::F64),
        requirement,
    }
}

const fn scalar(name: &'static str, role: ParamRole) -> ParamSpec {
    ParamSpec {
        name,
        role,
        dtype: None,
        requirement: AlignmentRequirement::NotRequired,
    }
}

const A_ANY: ParamSpec = matrix("a", ParamRole::Input, AlignmentRequirement::NotRequired);
const A_AVX: ParamSpec = matrix(
    "a",
    ParamRole::Input,
    AlignmentRequirement::Required(Alignment::AVX),
);
const B_ANY: ParamSpec = matrix("b", ParamRole::Input, AlignmentRequirement::NotRequired);
const B_AS_STORED: ParamSpec = matrix(
    "b",
    ParamRole::Input,
    AlignmentRequirement::MustNotPreTransform,
);
const RES: ParamSpec = matrix("res", ParamRole::Output, AlignmentRequirement::NotRequired);
const SIZE: ParamSpec = scalar("size", ParamRole::Size);
const WORKERS: ParamSpec = scalar("thread_count", ParamRole::Workers);

static DESCRIPTORS: [KernelDescriptor; 7] = [
    KernelDescriptor {
        variant: Variant::Naive,
        symbol: "mb_matmul_naive",
        params: &[A_ANY, B_ANY, RES, SIZE],
        product: Product::AB,
        blocking: Blocking::Synchronous,
        row_multiple: 1,
    },
    KernelDescriptor {
        variant: Variant::TransposeFused,
        symbol: "mb_matmul_transpose_fused",
        params: &[A_AVX, B_AS_STORED, RES, SIZE],
        product: Product::ABt,
        blocking: Blocking::Synchronous,
        row_multiple: 1,
    },
    KernelDescriptor {
        variant: Variant::Multithreaded,
        symbol: "mb_matmul_mt",
        params: &[A_ANY, B_ANY, RES, SIZE, WORKERS],
        product: Product::AB,
        blocking: Blocking::InternallyParallel,
        row_multiple: 1,
    },
    KernelDescriptor {
        variant: Variant::Device,
        symbol: "mb_matmul_device",
        params: &[A_AVX, B_AS_STORED, RES, SIZE],
        product: Product::AB,
        blocking: Blocking::DeviceRoundTrip,
        row_multiple: 1,
    },
    KernelDescriptor {
        variant: Variant::Simd,
        symbol: "mb_matmul_simd",
        params: &[A_AVX, B_AS_STORED, RES, SIZE],
        product: Product::AB,
        blocking: Blocking::Synchronous,
        row_multiple: 2,
    },
    KernelDescriptor {
        variant: Variant::SimdDot,
        symbol: "mb_matmul_simd_dot",
        params: &[A_AVX, B_AS_STORED, RES, SIZE],
        product: Product::AB,
        blocking: Blocking::Synchronous,
        row_multiple: 1,
    },
    KernelDescriptor {
        variant: Variant::SimdMultithreaded,
        symbol: "mb_matmul_simd_mt",
        params: &[A_AVX, B_AS_STORED, RES, SIZE, WORKERS],
        product: Product::AB,
        blocking: Blocking::InternallyParallel,
        row_multiple: 2,
    },
];

/// Entry point shared by every variant: `(a, b, res, size, workers)`.
pub type KernelFn = fn(&[f64], &[f64], &mut [f64], usize, Option<usize>) -> Result<()>;

fn workers_of(variant: Variant, workers: Option<usize>) -> Result<usize> {
    workers.ok_or(TensorError::InvalidWorkerCount {
        variant: variant.label(),
        reason: "a worker count is required".to_string(),
    })
}

fn naive_entry(a: &[f64], b: &[f64], c: &mut [f64], n: usize, _: Option<usize>) -> Result<()> {
    kernels::matmul_naive(a, b, c, n);
    Ok(())
}

fn transpose_entry(a: &[f64], b: &[f64], c: &mut [f64], n: usize, _: Option<usize>) -> Result<()> {
    kernels::matmul_transpose_fused(a, b, c, n);
    Ok(())
}

fn mt_entry(a: &[f64], b: &[f64], c: &mut [f64], n: usize, w: Option<usize>) -> Result<()> {
    kernels::matmul_mt(a, b, c, n, workers_of(Variant::Multithreaded, w)?)
}

fn device_entry(a: &[f64], b: &[f64], c: &mut [f64], n: usize, _: Option<usize>) -> Result<()> {
    kernels::matmul_device(a, b, c, n)
}

fn simd_entry(a: &[f64], b: &[f64], c: &mut [f64], n: usize, _: Option<usize>) -> Result<()> {
    kernels::matmul_simd(a, b, c, n);
    Ok(())
}

fn simd_dot_entry(a: &[f64], b: &[f64], c: &mut [f64], n: usize, _: Option<usize>) -> Result<()> {
    kernels::matmul_simd_dot(a, b, c, n);
    Ok(())
}

fn simd_mt_entry(a: &[f64], b: &[f64], c: &mut [f64], n: usize, w: Option<usize>) -> Result<()> {
    kernels::matmul_simd_mt(a, b, c, n, workers_of(Variant::SimdMultithreaded, w)?)
}

/// Descriptor and entry point for one variant.
#[derive(Debug, Clone, Copy)]
pub struct KernelEntry {
    pub descriptor: &'static KernelDescriptor,
    pub entry: KernelFn,
}

/// Interface table from variant to kernel, built once per process.
#[derive(Debug)]
pub struct KernelTable {
    entries: Vec<KernelEntry>,
}

static TABLE: OnceLock<KernelTable> = OnceLock::new();

impl Default for KernelTable {
    fn default() -> Self {
        KernelTable::new()
    }
}

impl KernelTable {
    /// A table of the built-in kernels. Most callers want [`global`](Self::global).
    pub fn new() -> Self {
        let entries = Variant::ALL
            .iter()
            .map(|&variant| {
                let entry: KernelFn = match variant {
                    Variant::Naive => naive_entry,
                    Variant::TransposeFused => transpose_entry,
                    Variant::Multithreaded => mt_entry,
                    Variant::Device => device_entry,
                    Variant::Simd => simd_entry,
                    Variant::SimdDot => simd_dot_entry,
                    Variant::SimdMultithreaded => simd_mt_entry,
                };
                KernelEntry {
                    descriptor: variant.descriptor(),
                    entry,
                }
            })
            .collect();
        debug!(variants = Variant::ALL.len(), "kernel table built");
        KernelTable { entries }
    }

    pub fn global() -> &'static KernelTable {
        TABLE.get_or_init(KernelTable::new)
    }

    /// Replace the entry point of `variant`, keeping its descriptor.
    pub fn with_entry(mut self, variant: Variant, entry: KernelFn) -> Self {
        self.entries[variant as usize].entry = entry;
        self
    }

    pub fn entry(&self, variant: Variant) -> &KernelEntry {
        &self.entries[variant as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = &KernelEntry> {
        self.entries.iter()
    }

    /// Check a call on tensors against `variant`'s descriptor and prepare it.
    ///
    /// All three matrices must be 2-D, square, f64, row-major contiguous and
    /// share N; the remaining checks are those of
    /// [`bind_slices`](Self::bind_slices).
    ///
    /// # Errors
    /// Returns the first violated condition. Nothing is executed.
    pub fn bind<'a>(
        &self,
        variant: Variant,
        a: &'a Tensor,
        b: &'a Tensor,
        c: &'a mut Tensor,
        workers: Option<usize>,
    ) -> Result<BoundCall<'a>> {
        let n = check_matrix("a", a)?;
        for (param, tensor) in [("b", b), ("res", &*c)] {
            let side = check_matrix(param, tensor)?;
            if side != n {
                return Err(TensorError::DimensionMismatch {
                    param,
                    expected: n,
                    got: side,
                });
            }
        }
        let a = a.f64_window("a")?;
        let b = b.f64_window("b")?;
        let c = c.f64_window_mut("res")?;
        self.bind_slices(variant, a, b, c, n, workers)
    }

    /// Check a call on raw row-major `n * n` slices and prepare it.
    ///
    /// Every slice must hold exactly `n * n` elements, and those the
    /// descriptor marks as requiring alignment must start on that boundary.
    /// A worker count must be given (and be at least 1) exactly for the
    /// variants that take one; counts larger than the partitionable rows are
    /// clamped.
    pub fn bind_slices<'a>(
        &self,
        variant: Variant,
        a: &'a [f64],
        b: &'a [f64],
        c: &'a mut [f64],
        n: usize,
        workers: Option<usize>,
    ) -> Result<BoundCall<'a>> {
        let KernelEntry { descriptor, entry } = *self.entry(variant);
        let len = n
            .checked_mul(n)
            .ok_or_else(|| TensorError::Other(format!("matrix size {} overflows", n)))?;
        for (param, addr, got) in [
            ("a", a.as_ptr() as usize, a.len()),
            ("b", b.as_ptr() as usize, b.len()),
            ("res", c.as_ptr() as usize, c.len()),
        ] {
            if got != len {
                return Err(TensorError::ShapeMismatch {
                    expected: vec![len],
                    got: vec![got],
                });
            }
            if let Some(alignment) = descriptor.required_alignment(param) {
                if len > 0 && !alignment.is_aligned(addr) {
                    return Err(TensorError::Misaligned {
                        param,
                        addr,
                        alignment: alignment.get(),
                    });
                }
            }
        }
        let workers = check_workers(descriptor, n, workers)?;

        debug!(variant = %variant, n, ?workers, symbol = descriptor.symbol, "bound kernel call");
        Ok(BoundCall {
            descriptor,
            entry,
            a,
            b,
            c,
            n,
            workers,
        })
    }
}

/// Validate one matrix parameter and return its side length.
fn check_matrix(param: &'static str, t: &Tensor) -> Result<usize> {
    if t.dtype() != DType::F64 {
        return Err(TensorError::DTypeMismatch {
            param,
            expected: DType::F64,
            got: t.dtype(),
        });
    }
    let n = t.shape().square_side().ok_or_else(|| TensorError::NotSquare {
        param,
        dims: t.shape().dims().to_vec(),
    })?;
    if !t.is_contiguous() {
        return Err(TensorError::NotContiguous {
            param,
            strides: t.strides().to_vec(),
        });
    }
    Ok(n)
}

fn check_workers(
    descriptor: &KernelDescriptor,
    n: usize,
    workers: Option<usize>,
) -> Result<Option<usize>> {
    let variant = descriptor.variant.label();
    match (descriptor.takes_workers(), workers) {
        (false, None) => Ok(None),
        (false, Some(_)) => Err(TensorError::InvalidWorkerCount {
            variant,
            reason: "this variant does not take a worker count".to_string(),
        }),
        (true, None) => Err(TensorError::InvalidWorkerCount {
            variant,
            reason: "a worker count is required".to_string(),
        }),
        (true, Some(0)) => Err(TensorError::InvalidWorkerCount {
            variant,
            reason: "must be at least 1".to_string(),
        }),
        (true, Some(w)) => {
            let max = descriptor.max_workers(n);
            if w > max {
                debug!(variant, requested = w, clamped = max, "clamping worker count");
            }
            Ok(Some(w.min(max)))
        }
    }
}

/// A validated call, ready to issue exactly once.
#[derive(Debug)]
pub struct BoundCall<'a> {
    descriptor: &'static KernelDescriptor,
    entry: KernelFn,
    a: &'a [f64],
    b: &'a [f64],
    c: &'a mut [f64],
    n: usize,
    workers: Option<usize>,
}

impl BoundCall<'_> {
    pub fn descriptor(&self) -> &'static KernelDescriptor {
        self.descriptor
    }

    /// Worker count after clamping.
    pub fn workers(&self) -> Option<usize> {
        self.workers
    }

    pub fn size(&self) -> usize {
        self.n
    }

    /// Issue the call. Returns once the output is fully written.
    pub fn invoke(self) -> Result<()> {
        (self.entry)(self.a, self.b, self.c, self.n, self.workers)
    }
}

/// Bind through the global table and invoke.
pub fn call(
    variant: Variant,
    a: &Tensor,
    b: &Tensor,
    c: &mut Tensor,
    workers: Option<usize>,
) -> Result<()> {
    KernelTable::global().bind(variant, a, b, c, workers)?.invoke()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aligned::AlignedBlock;
    use crate::shape::Shape;
    use crate::storage::CpuStorage;

    fn aligned(data: Vec<f64>, n: usize) -> Tensor {
        let (buf, offset) = AlignedBlock::copy_from(&data, Alignment::AVX).into_parts();
        Tensor::from_window(CpuStorage::F64(buf), offset, Shape::square(n)).unwrap()
    }

    fn misaligned(n: usize) -> Tensor {
        let (buf, offset) = AlignedBlock::<f64>::allocate(n * n + 1, Alignment::AVX).into_parts();
        Tensor::from_window(CpuStorage::F64(buf), offset + 1, Shape::square(n)).unwrap()
    }

    fn example() -> (Tensor, Tensor) {
        (
            aligned(vec![1.0, 2.0, 3.0, 4.0], 2),
            Tensor::from_f64(vec![5.0, 6.0, 7.0, 8.0], Shape::square(2)),
        )
    }

    fn workers_for(variant: Variant) -> Option<usize> {
        variant.descriptor().takes_workers().then_some(2)
    }

    #[test]
    fn test_labels_round_trip() {
        for v in Variant::ALL {
            assert_eq!(v.label().parse::<Variant>().unwrap(), v);
            assert_eq!(v.to_string(), v.label());
        }
        assert!("opencl".parse::<Variant>().is_err());
    }

    #[test]
    fn test_descriptor_table() {
        for v in Variant::ALL {
            assert_eq!(v.descriptor().variant, v);
            assert_eq!(KernelTable::global().entry(v).descriptor.variant, v);
        }
        let fused = Variant::TransposeFused.descriptor();
        assert_eq!(fused.product, Product::ABt);
        assert_eq!(fused.required_alignment("a"), Some(Alignment::AVX));
        assert_eq!(
            fused.param("b").unwrap().requirement,
            AlignmentRequirement::MustNotPreTransform
        );
        assert!(Variant::ALL
            .iter()
            .filter(|v| **v != Variant::TransposeFused)
            .all(|v| v.descriptor().product == Product::AB));
        assert_eq!(Variant::Naive.descriptor().required_alignment("a"), None);
        assert_eq!(Variant::SimdMultithreaded.descriptor().symbol, "mb_matmul_simd_mt");
        assert!(Variant::Multithreaded.descriptor().takes_workers());
        assert!(!Variant::Simd.descriptor().takes_workers());
        let dot = Variant::SimdDot.descriptor();
        assert_eq!(dot.symbol, "mb_matmul_simd_dot");
        assert_eq!(dot.required_alignment("a"), Some(Alignment::AVX));
        assert_eq!(dot.required_alignment("b"), None);
        assert!(!dot.takes_workers());
        assert_eq!("simd-dot".parse::<Variant>().unwrap(), Variant::SimdDot);
    }

    #[test]
    fn test_table_is_built_once() {
        assert!(std::ptr::eq(KernelTable::global(), KernelTable::global()));
        assert_eq!(KernelTable::global().iter().count(), Variant::ALL.len());
    }

    fn zero_entry(_: &[f64], _: &[f64], c: &mut [f64], _: usize, _: Option<usize>) -> Result<()> {
        c.fill(0.0);
        Ok(())
    }

    #[test]
    fn test_with_entry_replaces_only_the_entry_point() {
        let table = KernelTable::new().with_entry(Variant::Naive, zero_entry);
        assert_eq!(
            table.entry(Variant::Naive).descriptor,
            Variant::Naive.descriptor()
        );
        let (a, b) = example();
        let mut c = Tensor::empty(Shape::square(2));
        table.bind(Variant::Naive, &a, &b, &mut c, None).unwrap().invoke().unwrap();
        assert_eq!(c.data_f64().unwrap(), &[0.0; 4]);
        assert!(matches!(
            table.bind(Variant::Simd, &misaligned(2), &b, &mut c, None),
            Err(TensorError::Misaligned { .. })
        ));
    }

    #[test]
    fn test_every_variant_on_2x2_example() {
        let (a, b) = example();
        for v in Variant::ALL {
            let mut c = Tensor::empty(Shape::square(2));
            call(v, &a, &b, &mut c, workers_for(v)).unwrap();
            let expected = match v.descriptor().product {
                Product::AB => [19.0, 22.0, 43.0, 50.0],
                Product::ABt => [17.0, 23.0, 39.0, 53.0],
            };
            assert_eq!(c.data_f64().unwrap(), &expected, "variant {}", v);
        }
    }

    #[test]
    fn test_rejects_wrong_dtype() {
        let (a, _) = example();
        let b = Tensor::zeros(DType::F32, Shape::square(2));
        let mut c = Tensor::empty(Shape::square(2));
        let err = call(Variant::Naive, &a, &b, &mut c, None).unwrap_err();
        assert!(matches!(err, TensorError::DTypeMismatch { param: "b", .. }));
    }

    #[test]
    fn test_rejects_non_square_and_wrong_ndim() {
        let (a, _) = example();
        let mut c = Tensor::empty(Shape::square(2));
        let b = Tensor::from_f64(vec![0.0; 6], Shape::new(vec![2, 3]));
        assert!(matches!(
            call(Variant::Naive, &a, &b, &mut c, None),
            Err(TensorError::NotSquare { param: "b", .. })
        ));
        let b = Tensor::from_f64(vec![0.0; 8], Shape::new(vec![2, 2, 2]));
        assert!(matches!(
            call(Variant::Naive, &a, &b, &mut c, None),
            Err(TensorError::NotSquare { param: "b", .. })
        ));
    }

    #[test]
    fn test_rejects_dimension_mismatch() {
        let (a, b) = example();
        let mut c = Tensor::empty(Shape::square(3));
        let err = call(Variant::Naive, &a, &b, &mut c, None).unwrap_err();
        assert!(matches!(
            err,
            TensorError::DimensionMismatch {
                param: "res",
                expected: 2,
                got: 3
            }
        ));
    }

    #[test]
    fn test_rejects_non_contiguous() {
        let (a, b) = example();
        let bt = b.transpose().unwrap();
        let mut c = Tensor::empty(Shape::square(2));
        let err = call(Variant::Naive, &a, &bt, &mut c, None).unwrap_err();
        assert!(matches!(err, TensorError::NotContiguous { param: "b", .. }));
    }

    #[test]
    fn test_alignment_checked_only_where_required() {
        let a = misaligned(2);
        let (_, b) = example();
        let mut c = Tensor::empty(Shape::square(2));
        for v in Variant::ALL {
            let result = KernelTable::global().bind(v, &a, &b, &mut c, workers_for(v));
            if v.descriptor().required_alignment("a").is_some() {
                assert!(
                    matches!(result, Err(TensorError::Misaligned { param: "a", alignment: 32, .. })),
                    "variant {}",
                    v
                );
            } else {
                assert!(result.is_ok(), "variant {}", v);
            }
        }
    }

    #[test]
    fn test_unaligned_b_accepted() {
        let (a, _) = example();
        let mut b = misaligned(2);
        b.data_f64_mut().unwrap().copy_from_slice(&[5.0, 6.0, 7.0, 8.0]);
        let mut c = Tensor::empty(Shape::square(2));
        call(Variant::Simd, &a, &b, &mut c, None).unwrap();
        assert_eq!(c.data_f64().unwrap(), &[19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_worker_count_rules() {
        let (a, b) = example();
        let mut c = Tensor::empty(Shape::square(2));
        let table = KernelTable::global();
        for (variant, workers) in [
            (Variant::Multithreaded, None),
            (Variant::Multithreaded, Some(0)),
            (Variant::SimdMultithreaded, None),
            (Variant::Naive, Some(4)),
            (Variant::Device, Some(1)),
        ] {
            assert!(
                matches!(
                    table.bind(variant, &a, &b, &mut c, workers),
                    Err(TensorError::InvalidWorkerCount { .. })
                ),
                "{} {:?}",
                variant,
                workers
            );
        }
    }

    #[test]
    fn test_worker_count_clamped() {
        let (a, b) = example();
        let mut c = Tensor::empty(Shape::square(2));
        let table = KernelTable::global();
        let bound = table.bind(Variant::Multithreaded, &a, &b, &mut c, Some(64)).unwrap();
        assert_eq!(bound.workers(), Some(2));
        let bound = table.bind(Variant::SimdMultithreaded, &a, &b, &mut c, Some(64)).unwrap();
        assert_eq!(bound.workers(), Some(1));
        let bound = table.bind(Variant::Multithreaded, &a, &b, &mut c, Some(1)).unwrap();
        assert_eq!(bound.workers(), Some(1));
        assert_eq!(bound.size(), 2);
    }

    #[test]
    fn test_bind_slices_checks_lengths() {
        let table = KernelTable::global();
        let a = [1.0; 4];
        let mut c = [0.0; 4];
        let err = table
            .bind_slices(Variant::Naive, &a, &[1.0; 3], &mut c, 2, None)
            .unwrap_err();
        assert!(matches!(err, TensorError::ShapeMismatch { .. }));
        table
            .bind_slices(Variant::Naive, &a, &[2.0; 4], &mut c, 2, None)
            .unwrap()
            .invoke()
            .unwrap();
        assert_eq!(c, [4.0; 4]);
    }

    #[test]
    fn test_empty_matrices() {
        let a = Tensor::from_f64(vec![], Shape::square(0));
        let b = Tensor::from_f64(vec![], Shape::square(0));
        let mut c = Tensor::empty(Shape::square(0));
        call(Variant::Naive, &a, &b, &mut c, None).unwrap();
        call(Variant::Multithreaded, &a, &b, &mut c, Some(3)).unwrap();
        call(Variant::Simd, &a, &b, &mut c, None).unwrap();
    }
}
