/// Status codes returned by all FFI functions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MBStatus {
    Ok = 0,
    ErrorInvalidArgument = 1,
    ErrorMisaligned = 2,
    ErrorDevice = 3,
    ErrorInternal = 4,
}

impl From<&mb_tensor::TensorError> for MBStatus {
    fn from(e: &mb_tensor::TensorError) -> Self {
        use mb_tensor::TensorError::*;
        match e {
            Misaligned { .. } => MBStatus::ErrorMisaligned,
            Device(_) => MBStatus::ErrorDevice,
            ThreadPool(_) | Other(_) => MBStatus::ErrorInternal,
            _ => MBStatus::ErrorInvalidArgument,
        }
    }
}
