use std::fmt::{Debug, Formatter};

use pn_device::mem::DevicePtr;
use pn_device::module::{KernelFunction, KernelModule};
use pn_device::queue::CommandBuffer;

/// A node that produces a new batch at the start of every pass.
pub trait SourceLayer: Debug + Send + Sync {
    /// The number of features produced per sample.
    fn output_len(&self) -> usize;

    /// Produce the next batch, `output_len() * batch_size` values in feature-major order.
    fn next_batch(&self, batch_size: usize) -> Vec<f32>;
}

/// A node that transforms one buffer region into another on the device.
pub trait ComputeLayer: Debug + Send + Sync {
    fn input_len(&self) -> usize;
    fn output_len(&self) -> usize;

    /// Prepare this layer for the device `module` was compiled for:
    /// look up kernels and upload parameters.
    fn setup(&mut self, module: &KernelModule) -> Result<(), LayerError>;

    /// Append the dispatches for one evaluation to `commands`.
    ///
    /// The offsets are device element offsets, already scaled by the batch size.
    /// Only called after a successful [ComputeLayer::setup].
    fn encode(
        &self,
        commands: &mut CommandBuffer,
        batch_size: usize,
        input: &DevicePtr,
        input_offset: usize,
        output: &DevicePtr,
        output_offset: usize,
    );

    /// Reference implementation on the host, used to check device results.
    fn cpu_forward(&self, batch_size: usize, input: &[f32]) -> Vec<f32>;
}

/// A node that observes the final contents of a buffer region once a pass completes.
pub trait SinkLayer: Debug + Send + Sync {
    fn input_len(&self) -> usize;

    /// Called with `input_len() * batch_size` values in feature-major order.
    fn consume(&self, values: &[f32]);
}

pub enum Layer {
    Source(Box<dyn SourceLayer>),
    Compute(Box<dyn ComputeLayer>),
    Sink(Box<dyn SinkLayer>),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum LayerKind {
    Source,
    Compute,
    Sink,
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum LayerError {
    #[error("kernel `{kernel}` not found in module `{module}`")]
    MissingKernel { module: String, kernel: String },
    #[error("invalid layer parameters: {0}")]
    InvalidParameters(String),
}

impl Layer {
    pub fn kind(&self) -> LayerKind {
        match self {
            Layer::Source(_) => LayerKind::Source,
            Layer::Compute(_) => LayerKind::Compute,
            Layer::Sink(_) => LayerKind::Sink,
        }
    }

    pub fn input_len(&self) -> Option<usize> {
        match self {
            Layer::Source(_) => None,
            Layer::Compute(layer) => Some(layer.input_len()),
            Layer::Sink(layer) => Some(layer.input_len()),
        }
    }

    pub fn output_len(&self) -> Option<usize> {
        match self {
            Layer::Source(layer) => Some(layer.output_len()),
            Layer::Compute(layer) => Some(layer.output_len()),
            Layer::Sink(_) => None,
        }
    }
}

/// Look up `kernel` in `module`, the common first step of [ComputeLayer::setup].
pub fn require_kernel(module: &KernelModule, kernel: &str) -> Result<KernelFunction, LayerError> {
    module.function(kernel).ok_or_else(|| LayerError::MissingKernel {
        module: module.name().to_owned(),
        kernel: kernel.to_owned(),
    })
}

impl Debug for Layer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Layer::Source(layer) => write!(f, "Source({:?})", layer),
            Layer::Compute(layer) => write!(f, "Compute({:?})", layer),
            Layer::Sink(layer) => write!(f, "Sink({:?})", layer),
        }
    }
}
