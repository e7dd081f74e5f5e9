//! `mb-bench` - Benchmark driver for the matmul-bench kernels.
//!
//! Generates two random N x N inputs, aligns the first, and times one call
//! of each configured kernel variant through the checked call contract.

pub mod config;
pub mod driver;
pub mod error;
pub mod report;

pub use config::{BenchConfig, Cli, VariantSpec};
pub use driver::Driver;
pub use error::{BenchError, Result};
pub use report::{BenchReport, BenchResult};
