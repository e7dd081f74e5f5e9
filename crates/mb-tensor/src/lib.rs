//! `mb-tensor` - Aligned matrices and the kernel call contract for matmul-bench.
//!
//! This crate provides:
//! - A dynamically typed `Tensor` over CPU storage, with shape and stride checks
//! - Power-of-two aligned blocks and views (`align`)
//! - The per-variant `KernelDescriptor` table and checked `KernelTable::bind`
//! - Reference kernels: naive, transpose-fused, threaded, vectorized and offloaded
//! - A host-emulated offload device with its own command queue

pub mod aligned;
pub mod contract;
pub mod device;
pub mod dtype;
pub mod error;
pub mod kernels;
pub mod shape;
pub mod storage;
pub mod tensor;

// Re-export primary types at the crate root for convenience.
pub use aligned::{align, AlignedBlock, AlignedView, Alignment, AlignmentViolation};
pub use contract::{
    call, AlignmentRequirement, Blocking, BoundCall, KernelDescriptor, KernelTable, ParamSpec,
    Product, Variant,
};
pub use device::{DeviceInfo, DeviceQueue};
pub use dtype::DType;
pub use error::{Result, TensorError};
pub use shape::Shape;
pub use storage::CpuStorage;
pub use tensor::Tensor;
