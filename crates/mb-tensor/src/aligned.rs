//! Power-of-two aligned buffers.
//!
//! [`AlignedBlock`] is the arena primitive: an owning allocation with enough
//! slack that some element offset inside it is guaranteed to sit on the
//! requested boundary, whatever alignment the host allocator happened to
//! give. [`align`] builds on it to hand out a view of a [`Tensor`] that
//! satisfies an alignment, copying only when the tensor does not already.

use std::fmt;
use std::mem;
use std::ops::Deref;

use tracing::{debug, error};

use crate::error::{Result, TensorError};
use crate::storage::CpuStorage;
use crate::tensor::Tensor;

/// A byte alignment, always a non-zero power of two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Alignment(usize);

impl Alignment {
    /// Width of a 4-lane f64 vector register.
    pub const AVX: Alignment = Alignment(32);

    pub fn new(bytes: usize) -> Result<Self> {
        if bytes.is_power_of_two() {
            Ok(Alignment(bytes))
        } else {
            Err(TensorError::InvalidAlignment(bytes))
        }
    }

    pub fn get(self) -> usize {
        self.0
    }

    /// Whether `addr` is a multiple of this alignment.
    pub fn is_aligned(self, addr: usize) -> bool {
        addr & (self.0 - 1) == 0
    }

    /// Extra elements of type `T` an allocation needs so that some element
    /// offset inside it lands on this alignment.
    pub fn slack<T>(self) -> usize {
        let size = mem::size_of::<T>();
        if size == 0 || self.0 <= mem::align_of::<T>() {
            return 0;
        }
        self.0 / gcd(self.0, size)
    }
}

impl Default for Alignment {
    fn default() -> Self {
        Alignment::AVX
    }
}

impl fmt::Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Panic payload raised when an aligned window turns out not to be aligned.
///
/// Raised with [`std::panic::panic_any`] so callers at a C boundary can tell
/// it apart from other panics and abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentViolation {
    pub addr: usize,
    pub alignment: Alignment,
}

impl fmt::Display for AlignmentViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "address {:#x} is not {}-byte aligned",
            self.addr, self.alignment
        )
    }
}

/// Panics with an [`AlignmentViolation`] unless `addr` is on `alignment`.
pub(crate) fn ensure_aligned(addr: usize, alignment: Alignment) {
    if !alignment.is_aligned(addr) {
        error!(addr, alignment = alignment.get(), "alignment post-condition violated");
        std::panic::panic_any(AlignmentViolation { addr, alignment });
    }
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// An owning allocation plus the `(offset, len)` window inside it whose
/// first element sits on `alignment`.
///
/// The backing `Vec` is never resized, so the window keeps its alignment for
/// the whole life of the block.
#[derive(Debug, Clone)]
pub struct AlignedBlock<T> {
    buf: Vec<T>,
    offset: usize,
    len: usize,
    alignment: Alignment,
}

impl<T: Copy + Default> AlignedBlock<T> {
    /// Allocate a default-filled window of `len` elements.
    ///
    /// # Panics
    /// Panics with an [`AlignmentViolation`] if the computed offset does not
    /// produce an aligned window. That means the slack arithmetic is wrong,
    /// and continuing would hand misaligned memory to code that relies on
    /// aligned loads.
    pub fn allocate(len: usize, alignment: Alignment) -> Self {
        let slack = alignment.slack::<T>();
        let buf = vec![T::default(); len + slack];
        let offset = buf.as_ptr().align_offset(alignment.get());
        if offset > slack {
            std::panic::panic_any(AlignmentViolation {
                addr: buf.as_ptr() as usize,
                alignment,
            });
        }
        let block = AlignedBlock {
            buf,
            offset,
            len,
            alignment,
        };
        block.assert_aligned();
        block
    }

    /// Allocate a window and copy `src` into it.
    pub fn copy_from(src: &[T], alignment: Alignment) -> Self {
        let mut block = Self::allocate(src.len(), alignment);
        block.as_mut_slice().copy_from_slice(src);
        block
    }

    /// Allocate a window and fill it from an iterator yielding exactly `len` items.
    pub fn from_iter_exact(
        len: usize,
        alignment: Alignment,
        items: impl IntoIterator<Item = T>,
    ) -> Self {
        let mut block = Self::allocate(len, alignment);
        let mut written = 0;
        for (dst, v) in block.as_mut_slice().iter_mut().zip(items) {
            *dst = v;
            written += 1;
        }
        assert_eq!(written, len, "aligned block: iterator ended early");
        block
    }
}

impl<T> AlignedBlock<T> {
    pub fn as_slice(&self) -> &[T] {
        &self.buf[self.offset..self.offset + self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.buf[self.offset..self.offset + self.len]
    }

    /// Element offset of the window into the allocation.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Elements in the whole allocation, slack included.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn alignment(&self) -> Alignment {
        self.alignment
    }

    /// Split into the owning allocation and the window offset.
    pub fn into_parts(self) -> (Vec<T>, usize) {
        (self.buf, self.offset)
    }

    fn assert_aligned(&self) {
        ensure_aligned(self.as_slice().as_ptr() as usize, self.alignment);
    }
}

/// A tensor whose first element is known to be aligned.
///
/// Either borrows the caller's tensor unchanged, or owns a re-laid-out copy
/// living inside a larger [`AlignedBlock`] allocation.
#[derive(Debug)]
pub enum AlignedView<'a> {
    Aliased(&'a Tensor),
    Owned(Tensor),
}

impl AlignedView<'_> {
    /// True when no copy was made.
    pub fn is_aliased(&self) -> bool {
        matches!(self, AlignedView::Aliased(_))
    }

    /// The aligned copy, if one was made. Cloning an aliased tensor would
    /// not keep its alignment, so none is offered.
    pub fn into_copy(self) -> Option<Tensor> {
        match self {
            AlignedView::Aliased(_) => None,
            AlignedView::Owned(t) => Some(t),
        }
    }
}

impl Deref for AlignedView<'_> {
    type Target = Tensor;

    fn deref(&self) -> &Tensor {
        match self {
            AlignedView::Aliased(t) => t,
            AlignedView::Owned(t) => t,
        }
    }
}

/// Return a view of `tensor` whose first element is aligned to `alignment`.
///
/// Already-aligned tensors come back borrowed with no allocation. Anything
/// else is copied, in logical row-major order, into a fresh block with
/// `alignment / size_of::<T>()` elements of slack; the copy is contiguous
/// and has the same dtype, shape and contents.
///
/// # Panics
/// Panics with an [`AlignmentViolation`] if the returned view is not aligned.
/// This is an arithmetic bug in the offset computation, never a condition of
/// the input.
pub fn align(tensor: &Tensor, alignment: Alignment) -> AlignedView<'_> {
    let view = if alignment.is_aligned(tensor.addr()) {
        AlignedView::Aliased(tensor)
    } else {
        debug!(
            addr = tensor.addr(),
            alignment = alignment.get(),
            numel = tensor.shape().numel(),
            "copying tensor into aligned block"
        );
        AlignedView::Owned(copy_aligned(tensor, alignment))
    };
    ensure_aligned(view.addr(), alignment);
    view
}

fn copy_aligned(tensor: &Tensor, alignment: Alignment) -> Tensor {
    let positions = tensor.logical_positions();
    let len = positions.len();
    let (storage, offset) = match tensor.storage() {
        CpuStorage::F64(v) => {
            let (buf, offset) =
                AlignedBlock::from_iter_exact(len, alignment, positions.iter().map(|&p| v[p]))
                    .into_parts();
            (CpuStorage::F64(buf), offset)
        }
        CpuStorage::F32(v) => {
            let (buf, offset) =
                AlignedBlock::from_iter_exact(len, alignment, positions.iter().map(|&p| v[p]))
                    .into_parts();
            (CpuStorage::F32(buf), offset)
        }
        CpuStorage::I32(v) => {
            let (buf, offset) =
                AlignedBlock::from_iter_exact(len, alignment, positions.iter().map(|&p| v[p]))
                    .into_parts();
            (CpuStorage::I32(buf), offset)
        }
    };
    match Tensor::from_window(storage, offset, tensor.shape().clone()) {
        Ok(t) => t,
        Err(e) => panic!("align: block window does not fit its allocation: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;
    use crate::shape::Shape;

    #[test]
    fn test_violation_panics_with_typed_payload() {
        ensure_aligned(0x40, Alignment::AVX);
        let payload = std::panic::catch_unwind(|| ensure_aligned(0x28, Alignment::AVX))
            .unwrap_err();
        let violation = payload.downcast_ref::<AlignmentViolation>().unwrap();
        assert_eq!(
            *violation,
            AlignmentViolation {
                addr: 0x28,
                alignment: Alignment::AVX
            }
        );
        assert_eq!(violation.to_string(), "address 0x28 is not 32-byte aligned");
    }

    /// A tensor whose first element sits `skew` elements past a 64-byte boundary.
    fn skewed(n: usize, skew: usize) -> Tensor {
        let numel = n * n;
        let mut block = AlignedBlock::<f64>::allocate(numel + skew, Alignment::new(64).unwrap());
        for (i, v) in block.as_mut_slice()[skew..].iter_mut().enumerate() {
            *v = i as f64;
        }
        let window = block.offset() + skew;
        let (buf, _) = block.into_parts();
        Tensor::from_window(CpuStorage::F64(buf), window, Shape::square(n)).unwrap()
    }

    #[test]
    fn test_alignment_rejects_non_power_of_two() {
        assert!(Alignment::new(0).is_err());
        assert!(Alignment::new(24).is_err());
        assert_eq!(Alignment::new(32).unwrap(), Alignment::AVX);
        assert_eq!(Alignment::default().get(), 32);
    }

    #[test]
    fn test_slack() {
        assert_eq!(Alignment::AVX.slack::<f64>(), 4);
        assert_eq!(Alignment::new(64).unwrap().slack::<f32>(), 16);
        assert_eq!(Alignment::new(8).unwrap().slack::<f64>(), 0);
        assert_eq!(Alignment::AVX.slack::<[f64; 3]>(), 4);
    }

    #[test]
    fn test_block_is_aligned_for_many_alignments() {
        for shift in 0..12 {
            let alignment = Alignment::new(1 << shift).unwrap();
            let block = AlignedBlock::<f64>::allocate(37, alignment);
            assert!(alignment.is_aligned(block.as_slice().as_ptr() as usize));
            assert_eq!(block.len(), 37);
            assert!(block.capacity() <= 37 + alignment.slack::<f64>());
        }
    }

    #[test]
    fn test_block_odd_stride() {
        let block = AlignedBlock::<[f64; 3]>::allocate(5, Alignment::AVX);
        assert!(Alignment::AVX.is_aligned(block.as_slice().as_ptr() as usize));
    }

    #[test]
    fn test_copy_from() {
        let block = AlignedBlock::copy_from(&[1i32, 2, 3], Alignment::new(128).unwrap());
        assert_eq!(block.as_slice(), &[1, 2, 3]);
        assert!(block.alignment().is_aligned(block.as_slice().as_ptr() as usize));
    }

    #[test]
    fn test_align_misaligned_copies() {
        let t = skewed(4, 1);
        assert!(!Alignment::AVX.is_aligned(t.addr()));
        let view = align(&t, Alignment::AVX);
        assert!(!view.is_aliased());
        assert!(Alignment::AVX.is_aligned(view.addr()));
        assert_eq!(view.shape(), t.shape());
        assert_eq!(view.dtype(), DType::F64);
        assert_eq!(view.data_f64().unwrap(), t.data_f64().unwrap());
        assert!(view.allocated_len() > t.shape().numel());
        let copy = view.into_copy().unwrap();
        assert!(Alignment::AVX.is_aligned(copy.addr()));
    }

    #[test]
    fn test_align_every_power_of_two() {
        for skew in 0..4 {
            let t = skewed(3, skew);
            for shift in 0..10 {
                let alignment = Alignment::new(1 << shift).unwrap();
                let view = align(&t, alignment);
                assert!(alignment.is_aligned(view.addr()));
                assert_eq!(view.to_vec_f64().unwrap(), t.to_vec_f64().unwrap());
            }
        }
    }

    #[test]
    fn test_align_already_aligned_is_identity() {
        let t = skewed(4, 0);
        let before = (t.addr(), t.allocated_len());
        let view = align(&t, Alignment::AVX);
        assert!(view.is_aliased());
        assert_eq!((view.addr(), view.allocated_len()), before);
        assert!(std::ptr::eq(&*view, &t));
        assert!(view.into_copy().is_none());
    }

    #[test]
    fn test_align_1000_elements_no_growth() {
        let block = AlignedBlock::<f64>::allocate(1000, Alignment::AVX);
        let (buf, offset) = block.into_parts();
        let t = Tensor::from_window(CpuStorage::F64(buf), offset, Shape::new(vec![1000])).unwrap();
        let allocated = t.allocated_len();
        let view = align(&t, Alignment::AVX);
        assert!(view.is_aliased());
        assert_eq!(view.addr(), t.addr());
        assert_eq!(view.allocated_len(), allocated);
    }

    #[test]
    fn test_align_is_idempotent() {
        let t = skewed(5, 3);
        let first = align(&t, Alignment::AVX);
        let second = align(&first, Alignment::AVX);
        assert!(second.is_aliased());
        assert_eq!(second.addr(), first.addr());
        assert!(std::ptr::eq(&*second, &*first));
    }

    #[test]
    fn test_align_non_contiguous_lays_out_row_major() {
        let t = skewed(2, 1).transpose().unwrap();
        assert!(!t.is_contiguous());
        let view = align(&t, Alignment::AVX);
        assert!(!view.is_aliased());
        assert!(view.is_contiguous());
        assert_eq!(view.data_f64().unwrap(), &[0.0, 2.0, 1.0, 3.0]);
    }

    #[test]
    fn test_align_keeps_dtype() {
        let t = Tensor::from_storage(CpuStorage::from(vec![7i32; 9]), Shape::square(3));
        let view = align(&t, Alignment::new(4096).unwrap());
        assert_eq!(view.dtype(), DType::I32);
        assert!(Alignment::new(4096).unwrap().is_aligned(view.addr()));
        assert_eq!(view.shape(), &Shape::square(3));
    }
}
