#![warn(missing_debug_implementations)]
#![allow(clippy::new_without_default)]

//! An emulated accelerator device.
//!
//! The API mirrors the shape of a real GPU runtime: a [Device](handle::Device) hands out
//! reference-counted [DevicePtr](mem::DevicePtr) allocations, compute kernels are grouped in
//! [KernelModule](module::KernelModule)s that are compiled once and shared, and work is submitted as
//! [CommandBuffer](queue::CommandBuffer)s to a [CommandQueue](queue::CommandQueue) that executes them strictly
//! in submission order on its own thread, reporting completion asynchronously.
//!
//! ```
//! # use pn_device::args::KernelArgs;
//! # use pn_device::handle::Device;
//! # use pn_device::module::KernelModule;
//! # use pn_device::queue::CommandQueue;
//! let device = Device::new(0).unwrap();
//! let queue = CommandQueue::new(device);
//! let module = KernelModule::load(device, "pipenet").unwrap();
//! let relu = module.function("relu_forward").unwrap();
//!
//! let input = device.alloc(4);
//! let output = device.alloc(4);
//! input.copy_from_host(0, &[-1.0, 2.0, -3.0, 4.0]);
//!
//! let mut args = KernelArgs::new();
//! args.push_buffer(&input, 0);
//! args.push_buffer(&output, 0);
//! args.push(4u32);
//!
//! let mut commands = queue.command_buffer();
//! commands.dispatch(&relu, args);
//! queue.commit(commands);
//! queue.synchronize();
//!
//! assert_eq!(output.read(0, 4), vec![0.0, 2.0, 0.0, 4.0]);
//! ```

/// Kernel argument encoding and decoding.
pub mod args;
/// Device handles.
pub mod handle;
/// The kernels of the built-in `pipenet` module.
pub mod kernels;
/// Device memory.
pub mod mem;
/// Kernel modules and their registry.
pub mod module;
/// Command buffers and the in-order command queue.
pub mod queue;
