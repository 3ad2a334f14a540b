use crate::mem::DevicePtr;

/// The number of emulated devices present in the process.
pub const DEVICE_COUNT: i32 = 2;

/// An emulated device index.
///
/// Devices are cheap copyable handles, all state lives in the allocations and queues created from them.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Device(i32);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, thiserror::Error)]
#[error("device {0} is not available")]
pub struct DeviceNotAvailable(pub i32);

impl Device {
    pub fn new(device: i32) -> Result<Self, DeviceNotAvailable> {
        if (0..DEVICE_COUNT).contains(&device) {
            Ok(Device(device))
        } else {
            Err(DeviceNotAvailable(device))
        }
    }

    pub fn all() -> impl Iterator<Item = Self> {
        (0..DEVICE_COUNT).map(Device)
    }

    pub fn inner(self) -> i32 {
        self.0
    }

    pub fn name(self) -> String {
        format!("pipenet emulated device {}", self.0)
    }

    /// Allocate a new zero-initialized buffer of `len` elements.
    pub fn alloc(self, len: usize) -> DevicePtr {
        DevicePtr::alloc(self, len)
    }
}
