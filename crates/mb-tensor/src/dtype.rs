use std::fmt;

/// Element types a [`Tensor`](crate::Tensor) can hold.
///
/// Kernels only accept `F64`; the other variants exist so the binding
/// boundary has something to reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 64-bit IEEE-754 floating point.
    F64,
    /// 32-bit IEEE-754 floating point.
    F32,
    /// 32-bit signed integer.
    I32,
}

impl DType {
    /// Size in bytes of a single element.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F64 => 8,
            DType::F32 | DType::I32 => 4,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F64 => write!(f, "f64"),
            DType::F32 => write!(f, "f32"),
            DType::I32 => write!(f, "i32"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_in_bytes() {
        assert_eq!(DType::F64.size_in_bytes(), 8);
        assert_eq!(DType::F32.size_in_bytes(), 4);
        assert_eq!(DType::I32.size_in_bytes(), 4);
    }

    #[test]
    fn test_display() {
        assert_eq!(DType::F64.to_string(), "f64");
        assert_eq!(DType::I32.to_string(), "i32");
    }
}
