use crate::dtype::DType;
use crate::error::{Result, TensorError};

/// CPU-side tensor storage, one variant per supported dtype.
#[derive(Debug, Clone)]
pub enum CpuStorage {
    F64(Vec<f64>),
    F32(Vec<f32>),
    I32(Vec<i32>),
}

impl CpuStorage {
    /// Number of elements in this storage.
    pub fn len(&self) -> usize {
        match self {
            CpuStorage::F64(v) => v.len(),
            CpuStorage::F32(v) => v.len(),
            CpuStorage::I32(v) => v.len(),
        }
    }

    /// Returns true if the storage contains no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the dtype of this storage.
    pub fn dtype(&self) -> DType {
        match self {
            CpuStorage::F64(_) => DType::F64,
            CpuStorage::F32(_) => DType::F32,
            CpuStorage::I32(_) => DType::I32,
        }
    }

    /// Address of element 0 of the backing allocation.
    pub fn base_addr(&self) -> usize {
        match self {
            CpuStorage::F64(v) => v.as_ptr() as usize,
            CpuStorage::F32(v) => v.as_ptr() as usize,
            CpuStorage::I32(v) => v.as_ptr() as usize,
        }
    }

    /// Returns the data as an f64 slice.
    ///
    /// # Errors
    /// Returns `DTypeMismatch` if the storage is not F64.
    pub fn as_f64_slice(&self, param: &'static str) -> Result<&[f64]> {
        match self {
            CpuStorage::F64(v) => Ok(v.as_slice()),
            other => Err(TensorError::DTypeMismatch {
                param,
                expected: DType::F64,
                got: other.dtype(),
            }),
        }
    }

    /// Returns the data as a mutable f64 slice.
    ///
    /// # Errors
    /// Returns `DTypeMismatch` if the storage is not F64.
    pub fn as_f64_slice_mut(&mut self, param: &'static str) -> Result<&mut [f64]> {
        match self {
            CpuStorage::F64(v) => Ok(v.as_mut_slice()),
            other => Err(TensorError::DTypeMismatch {
                param,
                expected: DType::F64,
                got: other.dtype(),
            }),
        }
    }

    /// Create zero-filled storage for the given dtype and element count.
    pub fn zeros(dtype: DType, n: usize) -> Self {
        match dtype {
            DType::F64 => CpuStorage::F64(vec![0.0; n]),
            DType::F32 => CpuStorage::F32(vec![0.0; n]),
            DType::I32 => CpuStorage::I32(vec![0; n]),
        }
    }
}

impl From<Vec<f64>> for CpuStorage {
    fn from(data: Vec<f64>) -> Self {
        CpuStorage::F64(data)
    }
}

impl From<Vec<f32>> for CpuStorage {
    fn from(data: Vec<f32>) -> Self {
        CpuStorage::F32(data)
    }
}

impl From<Vec<i32>> for CpuStorage {
    fn from(data: Vec<i32>) -> Self {
        CpuStorage::I32(data)
    }
}
