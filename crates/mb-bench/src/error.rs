use thiserror::Error;

use mb_tensor::TensorError;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{label}: output differs from the reference by {diff:e} (tolerance {tolerance:e})")]
    Verification {
        label: String,
        diff: f64,
        tolerance: f64,
    },
}

pub type Result<T> = std::result::Result<T, BenchError>;
