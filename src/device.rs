//! Accelerator device handle and device-resident buffers.
//!
//! Buffers are reference counted so work enqueued on a [`Stream`] keeps its
//! inputs and outputs alive until it has run, no matter what the host does
//! with its own handles in the meantime. Host code reads results only after
//! synchronizing the stream the work was issued on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use crate::gpu;
use crate::{BatchError, Result, Stream};

/// Static description of a device, probed once when it is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProperties {
    pub name: String,
    /// Independent execution units (streaming multiprocessors, CPU cores).
    pub compute_units: u32,
    /// Upper bound on concurrently resident kernel blocks per unit.
    pub max_resident_blocks_per_unit: u32,
    /// Allocatable device memory in bytes.
    pub memory_bytes: u64,
}

#[derive(Debug)]
struct DeviceInner {
    id: usize,
    properties: DeviceProperties,
    allocated: AtomicU64,
}

/// Opaque handle identifying the accelerator. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl Device {
    /// Open device `id`, probing its properties.
    pub fn open(id: usize) -> Result<Self> {
        let properties = gpu::probe_device(id)?;
        info!(
            device = id,
            name = %properties.name,
            compute_units = properties.compute_units,
            memory_bytes = properties.memory_bytes,
            "opened device"
        );
        Ok(Self::with_properties(id, properties))
    }

    /// Build a device from explicit properties, bypassing the probe.
    pub fn with_properties(id: usize, properties: DeviceProperties) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                id,
                properties,
                allocated: AtomicU64::new(0),
            }),
        }
    }

    pub fn id(&self) -> usize {
        self.inner.id
    }

    pub fn properties(&self) -> &DeviceProperties {
        &self.inner.properties
    }

    /// Bytes currently held by live buffers on this device.
    pub fn allocated_bytes(&self) -> u64 {
        self.inner.allocated.load(Ordering::Acquire)
    }

    /// Concurrent workers a kernel with the given per-unit residency can
    /// keep busy. Always at least one.
    pub fn occupancy(&self, blocks_per_unit: u32) -> u32 {
        let props = self.properties();
        let per_unit = blocks_per_unit.min(props.max_resident_blocks_per_unit).max(1);
        props.compute_units.max(1).saturating_mul(per_unit)
    }

    /// Create a new ordered execution queue on this device.
    pub fn create_stream(&self) -> Result<Stream> {
        Stream::new(self)
    }

    /// Allocate a zero-initialised buffer of `len` elements.
    pub fn alloc<T: DeviceElement>(&self, len: usize) -> Result<DeviceBuffer<T>> {
        let bytes = (len as u64).saturating_mul(std::mem::size_of::<T>() as u64);
        self.reserve(bytes)?;
        let mut data = Vec::new();
        if let Err(e) = data.try_reserve_exact(len) {
            self.release(bytes);
            return Err(BatchError::Device(format!("allocation of {bytes} bytes failed: {e}")));
        }
        data.resize(len, T::default());
        debug!(device = self.id(), bytes, "allocated buffer");
        Ok(DeviceBuffer {
            inner: Arc::new(BufferInner {
                data: RwLock::new(data),
                len,
                bytes,
                device: self.inner.clone(),
            }),
        })
    }

    /// Allocate a buffer and copy `src` into it.
    pub fn alloc_from<T: DeviceElement>(&self, src: &[T]) -> Result<DeviceBuffer<T>> {
        let buf = self.alloc(src.len())?;
        buf.copy_from_host(src)?;
        Ok(buf)
    }

    fn reserve(&self, bytes: u64) -> Result<()> {
        let limit = self.properties().memory_bytes;
        self.inner
            .allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                cur.checked_add(bytes).filter(|&next| next <= limit)
            })
            .map(|_| ())
            .map_err(|cur| {
                BatchError::Device(format!(
                    "out of device memory: {bytes} bytes requested, {cur} of {limit} in use"
                ))
            })
    }

    fn release(&self, bytes: u64) {
        self.inner.allocated.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// Element types that can live in a [`DeviceBuffer`].
pub trait DeviceElement: Copy + Default + Send + Sync + 'static {}

impl<T: Copy + Default + Send + Sync + 'static> DeviceElement for T {}

#[derive(Debug)]
struct BufferInner<T> {
    data: RwLock<Vec<T>>,
    len: usize,
    bytes: u64,
    device: Arc<DeviceInner>,
}

impl<T> Drop for BufferInner<T> {
    fn drop(&mut self) {
        self.device.allocated.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

/// Fixed-length device allocation. Clones share the same memory.
#[derive(Debug)]
pub struct DeviceBuffer<T> {
    inner: Arc<BufferInner<T>>,
}

impl<T> Clone for DeviceBuffer<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: DeviceElement> DeviceBuffer<T> {
    /// Number of elements.
    pub fn len(&self) -> usize {
        self.inner.len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the allocation in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.inner.bytes
    }

    /// Whether two handles refer to the same allocation.
    pub fn same_allocation(&self, other: &DeviceBuffer<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Copy the whole buffer back to the host.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        Ok(self.read()?.clone())
    }

    /// Copy the first `len` elements back to the host.
    pub fn to_vec_prefix(&self, len: usize) -> Result<Vec<T>> {
        let data = self.read()?;
        data.get(..len).map(<[T]>::to_vec).ok_or(BatchError::BufferTooSmall {
            what: "device",
            needed: len,
            actual: data.len(),
        })
    }

    /// Copy `src` into the front of the buffer.
    pub fn copy_from_host(&self, src: &[T]) -> Result<()> {
        let mut data = self.write()?;
        let actual = data.len();
        let dst = data.get_mut(..src.len()).ok_or(BatchError::BufferTooSmall {
            what: "device",
            needed: src.len(),
            actual,
        })?;
        dst.copy_from_slice(src);
        Ok(())
    }

    pub(crate) fn read(&self) -> Result<RwLockReadGuard<'_, Vec<T>>> {
        self.inner
            .data
            .read()
            .map_err(|_| BatchError::Device("buffer poisoned by a failed kernel".into()))
    }

    pub(crate) fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<T>>> {
        self.inner
            .data
            .write()
            .map_err(|_| BatchError::Device("buffer poisoned by a failed kernel".into()))
    }

    /// Write access that ignores poisoning, for scratch memory whose
    /// contents never outlive one kernel.
    pub(crate) fn write_scratch(&self) -> RwLockWriteGuard<'_, Vec<T>> {
        self.inner.data.write().unwrap_or_else(PoisonError::into_inner)
    }
}
