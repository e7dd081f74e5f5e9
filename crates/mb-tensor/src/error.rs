use thiserror::Error;

use crate::dtype::DType;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },
    #[error("dtype mismatch for `{param}`: expected {expected}, got {got}")]
    DTypeMismatch {
        param: &'static str,
        expected: DType,
        got: DType,
    },
    #[error("`{param}` must be a 2-D square matrix, got shape {dims:?}")]
    NotSquare { param: &'static str, dims: Vec<usize> },
    #[error("dimension mismatch: `{param}` is {got}x{got}, call is {expected}x{expected}")]
    DimensionMismatch {
        param: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("`{param}` is not row-major contiguous (strides {strides:?})")]
    NotContiguous {
        param: &'static str,
        strides: Vec<usize>,
    },
    #[error("`{param}` at {addr:#x} is not aligned to {alignment} bytes")]
    Misaligned {
        param: &'static str,
        addr: usize,
        alignment: usize,
    },
    #[error("alignment must be a non-zero power of two, got {0}")]
    InvalidAlignment(usize),
    #[error("invalid worker count for {variant}: {reason}")]
    InvalidWorkerCount {
        variant: &'static str,
        reason: String,
    },
    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("device error: {0}")]
    Device(String),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TensorError>;
