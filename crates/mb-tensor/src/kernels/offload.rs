use tracing::debug;

use crate::device::DeviceQueue;
use crate::error::{Result, TensorError};

use super::simd::pack_transposed;

/// `c = a * b` on the process-wide offload device.
///
/// Blocks until the product has been copied back into `c`.
pub fn matmul_device(a: &[f64], b: &[f64], c: &mut [f64], n: usize) -> Result<()> {
    let queue = DeviceQueue::global()?;
    matmul_on(&queue, a, b, c, n)
}

/// `c = a * b` on `queue`.
///
/// `b` is transposed on the host before upload so the device reads both
/// operands row by row. Device buffers are released before returning,
/// whether or not the launch succeeded.
pub fn matmul_on(
    queue: &DeviceQueue,
    a: &[f64],
    b: &[f64],
    c: &mut [f64],
    n: usize,
) -> Result<()> {
    debug_assert_eq!(a.len(), n * n);
    debug_assert_eq!(b.len(), n * n);
    debug_assert_eq!(c.len(), n * n);

    let bt = pack_transposed(b, n);
    let (a_buf, a_written) = queue.write(a)?;
    let (bt_buf, bt_written) = queue.write(bt.as_slice())?;
    let (c_buf, c_allocated) = queue.alloc(n * n)?;
    let launched = queue.launch_matmul(&a_buf, &bt_buf, &c_buf, n)?;
    let read = queue.read(&c_buf)?;
    debug!(n, device = %queue.info().name, "matmul enqueued");

    a_written.wait()?;
    bt_written.wait()?;
    c_allocated.wait()?;
    launched.wait()?;
    let product = read.wait()?;
    if product.len() != c.len() {
        return Err(TensorError::Device(format!(
            "device returned {} elements, expected {}",
            product.len(),
            c.len()
        )));
    }
    c.copy_from_slice(&product);
    Ok(())
}
