//! Reference implementations of every kernel variant.
//!
//! All kernels take row-major `n * n` slices and overwrite every entry of the
//! output. They assume the caller has validated the call; use
//! [`KernelTable::bind`](crate::contract::KernelTable::bind) to go through the
//! checked contract.

pub mod naive;
pub mod offload;
pub mod simd;
pub mod threaded;
pub mod tolerance;

pub use naive::{matmul_naive, matmul_transpose_fused, transpose_into};
pub use offload::{matmul_device, matmul_on};
pub use simd::{matmul_simd, matmul_simd_dot, matmul_simd_mt, pack_transposed};
pub use threaded::{matmul_mt, rows_per_worker};
