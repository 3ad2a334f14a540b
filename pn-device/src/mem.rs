use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::handle::Device;

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(0);

/// A reference-counted handle to a [DeviceBuffer]. The buffer cannot be constructed directly,
/// instead it can only be created by allocating a new [DevicePtr] with [DevicePtr::alloc] or [Device::alloc].
///
/// The inner [DeviceBuffer] is freed when there are no [DevicePtr] any more that refer to it.
/// Cloning this type does not copy the underlying memory, but only increases the reference count.
///
/// All accesses are bounds-checked and panic when out of range.
#[derive(Clone)]
pub struct DevicePtr {
    buffer: Arc<DeviceBuffer>,
}

/// A single device allocation of `f32` elements.
pub struct DeviceBuffer {
    id: u64,
    device: Device,
    len: usize,
    data: Mutex<Vec<f32>>,
}

impl DevicePtr {
    pub fn alloc(device: Device, len: usize) -> Self {
        let id = NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed);
        let buffer = DeviceBuffer {
            id,
            device,
            len,
            data: Mutex::new(vec![0.0; len]),
        };
        DevicePtr {
            buffer: Arc::new(buffer),
        }
    }

    pub fn device(&self) -> Device {
        self.buffer.device
    }

    /// Process-wide unique id of the underlying allocation.
    pub fn id(&self) -> u64 {
        self.buffer.id
    }

    pub fn len(&self) -> usize {
        self.buffer.len
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.len == 0
    }

    pub fn len_bytes(&self) -> usize {
        self.buffer.len * std::mem::size_of::<f32>()
    }

    /// The number of `DevicePtr` sharing the underlying buffer that are still alive.
    pub fn shared_count(&self) -> usize {
        Arc::strong_count(&self.buffer)
    }

    /// Whether both pointers refer to the same allocation.
    pub fn same_buffer(&self, other: &DevicePtr) -> bool {
        Arc::ptr_eq(&self.buffer, &other.buffer)
    }

    pub fn copy_from_host(&self, offset: usize, values: &[f32]) {
        self.assert_in_bounds(offset, values.len());
        self.lock()[offset..offset + values.len()].copy_from_slice(values);
    }

    pub fn copy_to_host(&self, offset: usize, values: &mut [f32]) {
        self.assert_in_bounds(offset, values.len());
        values.copy_from_slice(&self.lock()[offset..offset + values.len()]);
    }

    pub fn read(&self, offset: usize, len: usize) -> Vec<f32> {
        let mut result = vec![0.0; len];
        self.copy_to_host(offset, &mut result);
        result
    }

    pub fn read_all(&self) -> Vec<f32> {
        self.read(0, self.len())
    }

    pub fn fill(&self, value: f32) {
        self.lock().fill(value);
    }

    /// Check whether the range `offset..offset+len` lies within this buffer.
    pub fn contains_range(&self, offset: usize, len: usize) -> bool {
        offset.checked_add(len).map_or(false, |end| end <= self.len())
    }

    fn assert_in_bounds(&self, offset: usize, len: usize) {
        assert!(
            self.contains_range(offset, len),
            "Range {}..{} is out of bounds for {:?}",
            offset,
            offset.saturating_add(len),
            self
        );
    }

    fn lock(&self) -> MutexGuard<Vec<f32>> {
        // every write is a single slice copy, so poisoned data is still consistent
        self.buffer.data.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl PartialEq for DevicePtr {
    fn eq(&self, other: &Self) -> bool {
        self.same_buffer(other)
    }
}

impl Eq for DevicePtr {}

impl Debug for DevicePtr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevicePtr")
            .field("id", &self.buffer.id)
            .field("device", &self.buffer.device)
            .field("len", &self.buffer.len)
            .finish()
    }
}

impl Debug for DeviceBuffer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("id", &self.id)
            .field("device", &self.device)
            .field("len", &self.len)
            .finish()
    }
}
