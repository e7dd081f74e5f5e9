mod error;
mod types;

pub use error::*;
pub use types::*;

use std::any::Any;
use std::ffi::CString;
use std::os::raw::c_char;
use std::slice;

use mb_tensor::{AlignmentViolation, BoundCall, DeviceQueue, KernelTable, Variant};

/// A panic caught at the C boundary.
#[derive(Debug, PartialEq)]
enum Caught {
    /// Reported to the caller as `MBStatus::ErrorInternal`.
    Report(String),
    /// A broken alignment post-condition; the process must not continue.
    Abort(AlignmentViolation),
}

fn classify(payload: &(dyn Any + Send)) -> Caught {
    if let Some(violation) = payload.downcast_ref::<AlignmentViolation>() {
        return Caught::Abort(*violation);
    }
    let msg = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    Caught::Report(msg)
}

/// Execute a closure that returns an `MBStatus`, catching any panics
/// and converting them into `MBStatus::ErrorInternal`.
///
/// An [`AlignmentViolation`] is not converted: the process aborts.
fn catch_panic<F: FnOnce() -> MBStatus + std::panic::UnwindSafe>(f: F) -> MBStatus {
    match std::panic::catch_unwind(f) {
        Ok(status) => status,
        Err(payload) => match classify(&*payload) {
            Caught::Report(msg) => {
                set_last_error(format!("internal panic: {}", msg));
                MBStatus::ErrorInternal
            }
            Caught::Abort(violation) => {
                eprintln!("mb-ffi: fatal: {}", violation);
                std::process::abort()
            }
        },
    }
}

/// Shared body of every kernel export.
///
/// # Safety
/// Non-null pointers must address `size * size` initialised `f64` each, and
/// `res` must not overlap `a` or `b`, for the duration of the call.
unsafe fn run(
    variant: Variant,
    a: *const f64,
    b: *const f64,
    res: *mut f64,
    size: usize,
    thread_count: Option<usize>,
) -> MBStatus {
    catch_panic(|| {
        if a.is_null() || b.is_null() || res.is_null() {
            set_last_error("null matrix pointer");
            return MBStatus::ErrorInvalidArgument;
        }
        let element = std::mem::align_of::<f64>();
        if [a as usize, b as usize, res as usize]
            .iter()
            .any(|addr| addr % element != 0)
        {
            set_last_error(format!("matrix pointer is not {}-byte aligned", element));
            return MBStatus::ErrorMisaligned;
        }
        let len = match size.checked_mul(size) {
            Some(len) => len,
            None => {
                set_last_error(format!("matrix size {} overflows", size));
                return MBStatus::ErrorInvalidArgument;
            }
        };

        let (a, b, c) = unsafe {
            (
                slice::from_raw_parts(a, len),
                slice::from_raw_parts(b, len),
                slice::from_raw_parts_mut(res, len),
            )
        };
        match KernelTable::global()
            .bind_slices(variant, a, b, c, size, thread_count)
            .and_then(BoundCall::invoke)
        {
            Ok(()) => MBStatus::Ok,
            Err(e) => fail(&e),
        }
    })
}

/// `res = a * b` with the reference triple loop.
///
/// # Safety
/// `a`, `b` and `res` each address `size * size` row-major doubles; `res`
/// does not overlap the inputs.
#[no_mangle]
pub unsafe extern "C" fn mb_matmul_naive(
    a: *const f64,
    b: *const f64,
    res: *mut f64,
    size: usize,
) -> MBStatus {
    run(Variant::Naive, a, b, res, size, None)
}

/// `res = a * b^T`. Pass `b` exactly as stored; `a` must be 32-byte aligned.
///
/// # Safety
/// As for [`mb_matmul_naive`].
#[no_mangle]
pub unsafe extern "C" fn mb_matmul_transpose_fused(
    a: *const f64,
    b: *const f64,
    res: *mut f64,
    size: usize,
) -> MBStatus {
    run(Variant::TransposeFused, a, b, res, size, None)
}

/// `res = a * b` with output rows split over `thread_count` threads.
///
/// # Safety
/// As for [`mb_matmul_naive`].
#[no_mangle]
pub unsafe extern "C" fn mb_matmul_mt(
    a: *const f64,
    b: *const f64,
    res: *mut f64,
    size: usize,
    thread_count: usize,
) -> MBStatus {
    run(Variant::Multithreaded, a, b, res, size, Some(thread_count))
}

/// `res = a * b` on the offload device, initialised on first use.
///
/// # Safety
/// As for [`mb_matmul_naive`]; `a` must be 32-byte aligned.
#[no_mangle]
pub unsafe extern "C" fn mb_matmul_device(
    a: *const f64,
    b: *const f64,
    res: *mut f64,
    size: usize,
) -> MBStatus {
    run(Variant::Device, a, b, res, size, None)
}

/// Vectorized `res = a * b`.
///
/// # Safety
/// As for [`mb_matmul_naive`]; `a` must be 32-byte aligned.
#[no_mangle]
pub unsafe extern "C" fn mb_matmul_simd(
    a: *const f64,
    b: *const f64,
    res: *mut f64,
    size: usize,
) -> MBStatus {
    run(Variant::Simd, a, b, res, size, None)
}

/// Vectorized `res = a * b`, one dot product per output entry.
///
/// # Safety
/// As for [`mb_matmul_naive`]; `a` must be 32-byte aligned.
#[no_mangle]
pub unsafe extern "C" fn mb_matmul_simd_dot(
    a: *const f64,
    b: *const f64,
    res: *mut f64,
    size: usize,
) -> MBStatus {
    run(Variant::SimdDot, a, b, res, size, None)
}

/// Vectorized `res = a * b` over `thread_count` threads.
///
/// # Safety
/// As for [`mb_matmul_naive`]; `a` must be 32-byte aligned.
#[no_mangle]
pub unsafe extern "C" fn mb_matmul_simd_mt(
    a: *const f64,
    b: *const f64,
    res: *mut f64,
    size: usize,
    thread_count: usize,
) -> MBStatus {
    run(Variant::SimdMultithreaded, a, b, res, size, Some(thread_count))
}

/// Flush and release the offload device. A later `mb_matmul_device` call
/// starts it again.
#[no_mangle]
pub extern "C" fn mb_device_shutdown() -> MBStatus {
    catch_panic(|| match DeviceQueue::shutdown_global() {
        Ok(()) => MBStatus::Ok,
        Err(e) => fail(&e),
    })
}

/// Get the last error message for this thread.
///
/// Returns a heap-allocated C string, or null if there is no error.
/// The caller must free a non-null return value with `mb_free_string`.
#[no_mangle]
pub extern "C" fn mb_last_error() -> *mut c_char {
    match error::take_last_error() {
        Some(e) => e.into_raw(),
        None => std::ptr::null_mut(),
    }
}

/// Free a string previously returned by `mb_last_error`.
///
/// # Safety
/// `s` is null or came from `mb_last_error` and has not been freed.
#[no_mangle]
pub unsafe extern "C" fn mb_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}
