use std::ops::Range;

use bytemuck::Pod;

use crate::mem::DevicePtr;

/// A kernel argument builder.
///
/// Buffer arguments and scalar arguments are kept in separate lists, both indexed in push order.
/// Scalars are stored as raw bytes, the kernel decodes them again with [KernelContext::scalar].
///
/// ```
/// # use pn_device::args::KernelArgs;
/// # use pn_device::handle::Device;
/// let device = Device::new(0).unwrap();
/// let ptr = device.alloc(16);
///
/// let mut args = KernelArgs::new();
/// args.push_buffer(&ptr, 4);
/// args.push(16u32);
/// args.push(1.0f32);
/// assert_eq!(args.buffer_count(), 1);
/// assert_eq!(args.scalar_count(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct KernelArgs {
    buffers: Vec<BufferArg>,
    scalar_bytes: Vec<u8>,
    scalar_ranges: Vec<Range<usize>>,
}

#[derive(Debug, Clone)]
pub struct BufferArg {
    pub ptr: DevicePtr,
    /// Offset in elements.
    pub offset: usize,
}

impl KernelArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_buffer(&mut self, ptr: &DevicePtr, offset: usize) {
        self.buffers.push(BufferArg {
            ptr: ptr.clone(),
            offset,
        });
    }

    pub fn push<T: Pod>(&mut self, value: T) {
        let start = self.scalar_bytes.len();
        self.scalar_bytes.extend_from_slice(bytemuck::bytes_of(&value));
        self.scalar_ranges.push(start..self.scalar_bytes.len());
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn scalar_count(&self) -> usize {
        self.scalar_ranges.len()
    }

    pub fn buffers(&self) -> &[BufferArg] {
        &self.buffers
    }
}

/// The view a running kernel gets of its arguments.
///
/// All accessors report malformed arguments and out-of-bounds accesses as a [KernelError]
/// instead of panicking, so a broken launch turns into a failed command buffer.
#[derive(Debug)]
pub struct KernelContext<'a> {
    function: &'a str,
    args: &'a KernelArgs,
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum KernelError {
    #[error("kernel `{function}` is missing buffer argument {index}")]
    MissingBuffer { function: String, index: usize },
    #[error("kernel `{function}` is missing scalar argument {index}")]
    MissingScalar { function: String, index: usize },
    #[error("kernel `{function}` scalar argument {index} has {actual} bytes, expected {expected}")]
    ScalarSize {
        function: String,
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("kernel `{function}` accessed range {offset}..{end} of buffer argument {index} with length {buffer_len}", end = .offset + .len)]
    OutOfBounds {
        function: String,
        index: usize,
        offset: usize,
        len: usize,
        buffer_len: usize,
    },
    #[error("kernel `{function}` got invalid arguments: {reason}")]
    InvalidArguments { function: String, reason: String },
}

impl<'a> KernelContext<'a> {
    pub fn new(function: &'a str, args: &'a KernelArgs) -> Self {
        KernelContext { function, args }
    }

    pub fn function(&self) -> &str {
        self.function
    }

    pub fn buffer(&self, index: usize) -> Result<&BufferArg, KernelError> {
        self.args.buffers.get(index).ok_or_else(|| KernelError::MissingBuffer {
            function: self.function.to_owned(),
            index,
        })
    }

    pub fn scalar<T: Pod>(&self, index: usize) -> Result<T, KernelError> {
        let range = self
            .args
            .scalar_ranges
            .get(index)
            .ok_or_else(|| KernelError::MissingScalar {
                function: self.function.to_owned(),
                index,
            })?;

        let expected = std::mem::size_of::<T>();
        if range.len() != expected {
            return Err(KernelError::ScalarSize {
                function: self.function.to_owned(),
                index,
                expected,
                actual: range.len(),
            });
        }

        Ok(bytemuck::pod_read_unaligned(&self.args.scalar_bytes[range.clone()]))
    }

    /// Scalar `u32` argument widened to `usize`, the common case for sizes.
    pub fn size(&self, index: usize) -> Result<usize, KernelError> {
        self.scalar::<u32>(index).map(|x| x as usize)
    }

    /// Read `len` elements of buffer argument `index`, starting at its offset.
    pub fn read(&self, index: usize, len: usize) -> Result<Vec<f32>, KernelError> {
        let arg = self.checked_range(index, len)?;
        Ok(arg.ptr.read(arg.offset, len))
    }

    /// Write `values` to buffer argument `index`, starting at its offset.
    pub fn write(&self, index: usize, values: &[f32]) -> Result<(), KernelError> {
        let arg = self.checked_range(index, values.len())?;
        arg.ptr.copy_from_host(arg.offset, values);
        Ok(())
    }

    pub fn invalid(&self, reason: impl Into<String>) -> KernelError {
        KernelError::InvalidArguments {
            function: self.function.to_owned(),
            reason: reason.into(),
        }
    }

    fn checked_range(&self, index: usize, len: usize) -> Result<&BufferArg, KernelError> {
        let arg = self.buffer(index)?;
        if arg.ptr.contains_range(arg.offset, len) {
            Ok(arg)
        } else {
            Err(KernelError::OutOfBounds {
                function: self.function.to_owned(),
                index,
                offset: arg.offset,
                len,
                buffer_len: arg.ptr.len(),
            })
        }
    }
}
