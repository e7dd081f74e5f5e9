use crate::dtype::DType;
use crate::error::{Result, TensorError};
use crate::shape::Shape;
use crate::storage::CpuStorage;

/// A dense array backed by CPU storage.
///
/// The logical view is an element `offset` into the storage plus per-dimension
/// strides, so the array may start part-way into its allocation (see
/// [`align`](crate::align)) or be a non-contiguous permutation of it (see
/// [`Tensor::transpose`]). Tensors never grow: once built, the backing
/// allocation does not move for as long as the tensor lives.
#[derive(Debug, Clone)]
pub struct Tensor {
    storage: CpuStorage,
    offset: usize,
    shape: Shape,
    strides: Vec<usize>,
}

impl Tensor {
    /// Create a new f64 tensor from row-major data and a shape.
    ///
    /// # Panics
    /// Panics if `data.len() != shape.numel()`.
    pub fn from_f64(data: Vec<f64>, shape: Shape) -> Self {
        Self::from_storage(CpuStorage::F64(data), shape)
    }

    /// Create a tensor of any supported dtype from row-major storage.
    ///
    /// # Panics
    /// Panics if the storage length does not match `shape.numel()`.
    pub fn from_storage(storage: CpuStorage, shape: Shape) -> Self {
        assert_eq!(
            storage.len(),
            shape.numel(),
            "data length {} does not match shape {} (numel={})",
            storage.len(),
            shape,
            shape.numel()
        );
        let strides = shape.strides();
        Tensor {
            storage,
            offset: 0,
            shape,
            strides,
        }
    }

    /// Wrap the window `[offset, offset + shape.numel())` of `storage` as a
    /// contiguous tensor. The rest of the storage stays owned but unused.
    pub fn from_window(storage: CpuStorage, offset: usize, shape: Shape) -> Result<Self> {
        let end = offset + shape.numel();
        if end > storage.len() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![storage.len()],
                got: vec![end],
            });
        }
        let strides = shape.strides();
        Ok(Tensor {
            storage,
            offset,
            shape,
            strides,
        })
    }

    /// Create a zero-filled tensor with the given dtype and shape.
    pub fn zeros(dtype: DType, shape: Shape) -> Self {
        Self::from_storage(CpuStorage::zeros(dtype, shape.numel()), shape)
    }

    /// Create an f64 output tensor whose entries carry no meaningful value.
    ///
    /// Every entry is NaN, so a kernel that leaves part of its output
    /// unwritten is visible instead of silently reading as zero.
    pub fn empty(shape: Shape) -> Self {
        let n = shape.numel();
        Self::from_f64(vec![f64::NAN; n], shape)
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    /// Element strides of the logical view.
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Element offset of the view into its storage.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of elements in the backing allocation, which may exceed the
    /// logical element count when the tensor is a window into a larger block.
    pub fn allocated_len(&self) -> usize {
        self.storage.len()
    }

    /// Address of the first logical element.
    pub fn addr(&self) -> usize {
        self.storage.base_addr() + self.offset * self.dtype().size_in_bytes()
    }

    /// Whether the logical view is row-major contiguous.
    pub fn is_contiguous(&self) -> bool {
        self.shape.is_contiguous(&self.strides)
    }

    pub fn storage(&self) -> &CpuStorage {
        &self.storage
    }

    /// Borrow the f64 elements of a contiguous tensor.
    pub fn data_f64(&self) -> Result<&[f64]> {
        self.f64_window("tensor")
    }

    /// Mutably borrow the f64 elements of a contiguous tensor.
    pub fn data_f64_mut(&mut self) -> Result<&mut [f64]> {
        self.f64_window_mut("tensor")
    }

    pub(crate) fn f64_window(&self, param: &'static str) -> Result<&[f64]> {
        self.check_contiguous(param)?;
        let (start, end) = (self.offset, self.offset + self.shape.numel());
        Ok(&self.storage.as_f64_slice(param)?[start..end])
    }

    pub(crate) fn f64_window_mut(&mut self, param: &'static str) -> Result<&mut [f64]> {
        self.check_contiguous(param)?;
        let (start, end) = (self.offset, self.offset + self.shape.numel());
        Ok(&mut self.storage.as_f64_slice_mut(param)?[start..end])
    }

    fn check_contiguous(&self, param: &'static str) -> Result<()> {
        if self.is_contiguous() {
            Ok(())
        } else {
            Err(TensorError::NotContiguous {
                param,
                strides: self.strides.clone(),
            })
        }
    }

    /// Storage positions of every logical element, in row-major logical order.
    pub(crate) fn logical_positions(&self) -> Vec<usize> {
        let numel = self.shape.numel();
        let ndim = self.shape.ndim();
        let mut positions = Vec::with_capacity(numel);
        let mut index = vec![0usize; ndim];
        for _ in 0..numel {
            let pos: usize = index
                .iter()
                .zip(self.strides.iter())
                .map(|(i, s)| i * s)
                .sum();
            positions.push(self.offset + pos);
            for d in (0..ndim).rev() {
                index[d] += 1;
                if index[d] < self.shape.dim(d) {
                    break;
                }
                index[d] = 0;
            }
        }
        positions
    }

    /// Copy the f64 elements out in logical row-major order, whatever the layout.
    pub fn to_vec_f64(&self) -> Result<Vec<f64>> {
        let data = self.storage.as_f64_slice("tensor")?;
        Ok(self.logical_positions().into_iter().map(|p| data[p]).collect())
    }

    /// Transpose a 2-D tensor by swapping its strides. No data is moved, so
    /// the result is not contiguous unless one side has length 1.
    pub fn transpose(self) -> Result<Tensor> {
        if self.shape.ndim() != 2 {
            return Err(TensorError::Other(format!(
                "transpose requires a 2-D tensor, got shape {}",
                self.shape
            )));
        }
        let dims = vec![self.shape.dim(1), self.shape.dim(0)];
        let strides = vec![self.strides[1], self.strides[0]];
        Ok(Tensor {
            storage: self.storage,
            offset: self.offset,
            shape: Shape::new(dims),
            strides,
        })
    }
}
