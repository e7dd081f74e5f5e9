//! Host-emulated offload device.
//!
//! The device owns its own memory and is driven through an in-order command
//! queue served by a dedicated `mb-device` thread. Host code enqueues buffer
//! writes, allocations, kernel launches and reads; each command completes
//! through an [`Event`] the host can wait on. Buffers live in device memory
//! until their [`DeviceBuffer`] handle is dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use tracing::{debug, info, warn};

use crate::error::{Result, TensorError};

/// Capabilities reported by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub max_work_group_size: usize,
    pub max_work_item_sizes: [usize; 2],
    pub global_mem_bytes: usize,
}

impl DeviceInfo {
    pub fn host() -> Self {
        DeviceInfo {
            name: "host-emulated".to_string(),
            max_work_group_size: 256,
            max_work_item_sizes: [256, 256],
            global_mem_bytes: 4 << 30,
        }
    }

    /// Work-group size for an `n * n` launch.
    ///
    /// Starts from the square root of the maximum group size (or `n` when the
    /// whole grid fits in one group), caps it by the per-dimension limit, then
    /// shrinks it until it divides `n`.
    pub fn local_size(&self, n: usize) -> [usize; 2] {
        let mut local = [1; 2];
        for (dim, out) in local.iter_mut().enumerate() {
            let start = if n * n > self.max_work_group_size {
                (self.max_work_group_size as f64).sqrt() as usize
            } else {
                n
            };
            let mut size = start.min(self.max_work_item_sizes[dim]).max(1);
            if n % size != 0 {
                warn!(
                    dim,
                    n,
                    local_size = size,
                    "global size is not a multiple of the work-group size, kernel will not run optimally"
                );
                while n % size != 0 {
                    size -= 1;
                }
            }
            *out = size;
        }
        local
    }
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self::host()
    }
}

type BufferId = u64;

/// `c = a * bt^T` over device buffers, in `local`-sized work groups.
#[derive(Debug, Clone, Copy)]
struct Launch {
    a: BufferId,
    bt: BufferId,
    c: BufferId,
    n: usize,
    local: [usize; 2],
}

enum Command {
    Write {
        id: BufferId,
        data: Vec<f64>,
        done: Sender<Result<()>>,
    },
    Alloc {
        id: BufferId,
        len: usize,
        done: Sender<Result<()>>,
    },
    Launch {
        launch: Launch,
        done: Sender<Result<()>>,
    },
    Read {
        id: BufferId,
        done: Sender<Result<Vec<f64>>>,
    },
    Release {
        id: BufferId,
    },
    Finish {
        done: Sender<Result<()>>,
    },
    Shutdown,
}

/// Completion of one enqueued command.
#[must_use = "an event does nothing unless waited on"]
pub struct Event<T> {
    rx: Receiver<Result<T>>,
}

impl<T> Event<T> {
    fn pair() -> (Sender<Result<T>>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Event { rx })
    }

    /// Block until the command has run.
    pub fn wait(self) -> Result<T> {
        self.rx
            .recv()
            .map_err(|_| TensorError::Device("device dropped a pending command".to_string()))?
    }
}

/// Handle to a buffer in device memory; released when dropped.
pub struct DeviceBuffer {
    id: BufferId,
    len: usize,
    commands: Sender<Command>,
}

impl DeviceBuffer {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        // The device may already be gone; its memory went with it.
        let _ = self.commands.send(Command::Release { id: self.id });
    }
}

impl std::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("id", &self.id)
            .field("len", &self.len)
            .finish()
    }
}

/// In-order command queue to one device thread.
pub struct DeviceQueue {
    info: DeviceInfo,
    commands: Sender<Command>,
    next_id: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

static GLOBAL: Mutex<Option<Arc<DeviceQueue>>> = Mutex::new(None);

impl DeviceQueue {
    /// Start a device with the given capabilities.
    pub fn new(info: DeviceInfo) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let limit = info.global_mem_bytes;
        let worker = std::thread::Builder::new()
            .name("mb-device".to_string())
            .spawn(move || DeviceMemory::new(limit).serve(rx))
            .map_err(|e| TensorError::Device(format!("failed to start device thread: {}", e)))?;
        info!(device = %info.name, global_mem_bytes = limit, "offload device initialised");
        Ok(DeviceQueue {
            info,
            commands: tx,
            next_id: AtomicU64::new(0),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// The process-wide device, started on first use.
    pub fn global() -> Result<Arc<DeviceQueue>> {
        let mut slot = GLOBAL.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(queue) = slot.as_ref() {
            return Ok(Arc::clone(queue));
        }
        let queue = Arc::new(DeviceQueue::new(DeviceInfo::host())?);
        *slot = Some(Arc::clone(&queue));
        Ok(queue)
    }

    /// Flush and tear down the process-wide device. The next
    /// [`global`](Self::global) call starts a fresh one.
    pub fn shutdown_global() -> Result<()> {
        let queue = GLOBAL.lock().unwrap_or_else(PoisonError::into_inner).take();
        match queue {
            Some(queue) => queue.finish(),
            None => Ok(()),
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| TensorError::Device("device thread has stopped".to_string()))
    }

    fn buffer(&self, len: usize) -> DeviceBuffer {
        DeviceBuffer {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            len,
            commands: self.commands.clone(),
        }
    }

    /// Create a buffer initialised with a copy of `data`.
    pub fn write(&self, data: &[f64]) -> Result<(DeviceBuffer, Event<()>)> {
        let buffer = self.buffer(data.len());
        let (done, event) = Event::pair();
        self.send(Command::Write {
            id: buffer.id,
            data: data.to_vec(),
            done,
        })?;
        Ok((buffer, event))
    }

    /// Create an uninitialised buffer of `len` elements.
    pub fn alloc(&self, len: usize) -> Result<(DeviceBuffer, Event<()>)> {
        let buffer = self.buffer(len);
        let (done, event) = Event::pair();
        self.send(Command::Alloc {
            id: buffer.id,
            len,
            done,
        })?;
        Ok((buffer, event))
    }

    /// Enqueue `c = a * bt^T` for `n * n` buffers.
    pub fn launch_matmul(
        &self,
        a: &DeviceBuffer,
        bt: &DeviceBuffer,
        c: &DeviceBuffer,
        n: usize,
    ) -> Result<Event<()>> {
        let local = self.info.local_size(n);
        debug!(n, ?local, "enqueue matmul launch");
        let (done, event) = Event::pair();
        self.send(Command::Launch {
            launch: Launch {
                a: a.id,
                bt: bt.id,
                c: c.id,
                n,
                local,
            },
            done,
        })?;
        Ok(event)
    }

    /// Enqueue a read of the whole buffer back to the host.
    pub fn read(&self, buffer: &DeviceBuffer) -> Result<Event<Vec<f64>>> {
        let (done, event) = Event::pair();
        self.send(Command::Read {
            id: buffer.id,
            done,
        })?;
        Ok(event)
    }

    /// Block until every previously enqueued command has run.
    pub fn finish(&self) -> Result<()> {
        let (done, event) = Event::pair();
        self.send(Command::Finish { done })?;
        event.wait()
    }
}

impl Drop for DeviceQueue {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("device thread panicked");
            }
        }
        debug!(device = %self.info.name, "offload device released");
    }
}

/// Device-side state, owned by the device thread.
struct DeviceMemory {
    buffers: HashMap<BufferId, Vec<f64>>,
    used_bytes: usize,
    limit_bytes: usize,
}

impl DeviceMemory {
    fn new(limit_bytes: usize) -> Self {
        DeviceMemory {
            buffers: HashMap::new(),
            used_bytes: 0,
            limit_bytes,
        }
    }

    fn serve(mut self, commands: Receiver<Command>) {
        for command in commands {
            match command {
                Command::Write { id, data, done } => {
                    let _ = done.send(self.insert(id, data));
                }
                Command::Alloc { id, len, done } => {
                    let result = self
                        .reserve(len)
                        .map(|()| self.insert_reserved(id, vec![0.0; len]));
                    let _ = done.send(result);
                }
                Command::Launch { launch, done } => {
                    let _ = done.send(self.run(launch));
                }
                Command::Read { id, done } => {
                    let _ = done.send(self.get(id).map(<[f64]>::to_vec));
                }
                Command::Release { id } => {
                    if let Some(buf) = self.buffers.remove(&id) {
                        self.used_bytes -= bytes(buf.len());
                    }
                }
                Command::Finish { done } => {
                    let _ = done.send(Ok(()));
                }
                Command::Shutdown => break,
            }
        }
    }

    fn reserve(&mut self, len: usize) -> Result<()> {
        let needed = bytes(len);
        if self.used_bytes + needed > self.limit_bytes {
            return Err(TensorError::Device(format!(
                "out of device memory: {} bytes requested, {} of {} in use",
                needed, self.used_bytes, self.limit_bytes
            )));
        }
        self.used_bytes += needed;
        Ok(())
    }

    fn insert(&mut self, id: BufferId, data: Vec<f64>) -> Result<()> {
        self.reserve(data.len())?;
        self.insert_reserved(id, data);
        Ok(())
    }

    fn insert_reserved(&mut self, id: BufferId, data: Vec<f64>) {
        self.buffers.insert(id, data);
    }

    fn get(&self, id: BufferId) -> Result<&[f64]> {
        self.buffers
            .get(&id)
            .map(Vec::as_slice)
            .ok_or_else(|| TensorError::Device(format!("unknown device buffer {}", id)))
    }

    fn run(&mut self, launch: Launch) -> Result<()> {
        let Launch { n, local, .. } = launch;
        let mut c = self
            .buffers
            .remove(&launch.c)
            .ok_or_else(|| TensorError::Device(format!("unknown device buffer {}", launch.c)))?;
        let result = self.run_into(launch, &mut c);
        self.buffers.insert(launch.c, c);
        result?;
        debug!(n, ?local, "matmul launch complete");
        Ok(())
    }

    fn run_into(&self, launch: Launch, c: &mut [f64]) -> Result<()> {
        let Launch { n, local, .. } = launch;
        let a = self.get(launch.a)?;
        let bt = self.get(launch.bt)?;
        for (param, len) in [("a", a.len()), ("bt", bt.len()), ("c", c.len())] {
            if len != n * n {
                return Err(TensorError::Device(format!(
                    "launch argument `{}` holds {} elements, expected {}",
                    param,
                    len,
                    n * n
                )));
            }
        }
        for gi in (0..n).step_by(local[0]) {
            for gj in (0..n).step_by(local[1]) {
                for i in gi..gi + local[0] {
                    let a_row = &a[i * n..(i + 1) * n];
                    for j in gj..gj + local[1] {
                        let b_row = &bt[j * n..(j + 1) * n];
                        let mut sum = 0.0f64;
                        for k in 0..n {
                            sum += a_row[k] * b_row[k];
                        }
                        c[i * n + j] = sum;
                    }
                }
            }
        }
        Ok(())
    }
}

fn bytes(len: usize) -> usize {
    len * std::mem::size_of::<f64>()
}
