use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};

use flume::{Receiver, Sender};
use ndarray::{ArrayView2, Axis};

use pn_device::args::KernelArgs;
use pn_device::mem::DevicePtr;
use pn_device::module::{KernelFunction, KernelModule};
use pn_device::queue::CommandBuffer;

use crate::layer::{require_kernel, ComputeLayer, LayerError, SinkLayer, SourceLayer};

/// Fully connected layer: `y = x . W + b`.
///
/// `weight` is stored row-major with shape `input_len x output_len`, `bias` has length `output_len`.
/// Mismatched parameter lengths are reported by [ComputeLayer::setup].
pub struct Affine {
    input_len: usize,
    output_len: usize,
    weight: Vec<f32>,
    bias: Vec<f32>,
    device: Option<AffineDevice>,
}

struct AffineDevice {
    kernel: KernelFunction,
    weight: DevicePtr,
    bias: DevicePtr,
}

#[derive(Debug)]
pub struct Relu {
    len: usize,
    kernel: Option<KernelFunction>,
}

/// A source that cycles through a fixed list of batches.
#[derive(Debug)]
pub struct FixedSource {
    len: usize,
    batches: Vec<Vec<f32>>,
    next: AtomicUsize,
}

/// A source that calls a closure with the pass index and the batch size.
pub struct FnSource {
    len: usize,
    f: Box<dyn Fn(usize, usize) -> Vec<f32> + Send + Sync>,
    next: AtomicUsize,
}

/// A sink that forwards every consumed batch over a channel.
#[derive(Debug)]
pub struct ChannelSink {
    len: usize,
    sender: Sender<Vec<f32>>,
}

/// A sink that ignores its values, useful to keep an otherwise unobserved branch alive.
#[derive(Debug)]
pub struct NullSink {
    len: usize,
}

impl Affine {
    pub fn new(input_len: usize, output_len: usize, weight: Vec<f32>, bias: Vec<f32>) -> Self {
        Affine {
            input_len,
            output_len,
            weight,
            bias,
            device: None,
        }
    }

    pub fn weight(&self) -> &[f32] {
        &self.weight
    }

    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    fn check_parameters(&self) -> Result<(), LayerError> {
        if self.weight.len() != self.input_len * self.output_len {
            return Err(LayerError::InvalidParameters(format!(
                "affine {} -> {} has {} weights, expected {}",
                self.input_len,
                self.output_len,
                self.weight.len(),
                self.input_len * self.output_len
            )));
        }
        if self.bias.len() != self.output_len {
            return Err(LayerError::InvalidParameters(format!(
                "affine {} -> {} has {} biases",
                self.input_len,
                self.output_len,
                self.bias.len()
            )));
        }
        Ok(())
    }
}

impl ComputeLayer for Affine {
    fn input_len(&self) -> usize {
        self.input_len
    }

    fn output_len(&self) -> usize {
        self.output_len
    }

    fn setup(&mut self, module: &KernelModule) -> Result<(), LayerError> {
        self.check_parameters()?;
        let kernel = require_kernel(module, "affine_forward")?;

        let device = module.device();
        let weight = device.alloc(self.weight.len());
        weight.copy_from_host(0, &self.weight);
        let bias = device.alloc(self.bias.len());
        bias.copy_from_host(0, &self.bias);

        self.device = Some(AffineDevice { kernel, weight, bias });
        Ok(())
    }

    fn encode(
        &self,
        commands: &mut CommandBuffer,
        batch_size: usize,
        input: &DevicePtr,
        input_offset: usize,
        output: &DevicePtr,
        output_offset: usize,
    ) {
        let device = self
            .device
            .as_ref()
            .unwrap_or_else(|| panic!("Affine layer encoded before setup"));

        let mut args = KernelArgs::new();
        args.push_buffer(input, input_offset);
        args.push_buffer(output, output_offset);
        args.push_buffer(&device.weight, 0);
        args.push_buffer(&device.bias, 0);
        args.push(batch_size as u32);
        args.push(self.input_len as u32);
        args.push(self.output_len as u32);

        commands.dispatch(&device.kernel, args);
    }

    fn cpu_forward(&self, batch_size: usize, input: &[f32]) -> Vec<f32> {
        assert_eq!(input.len(), self.input_len * batch_size);
        if let Err(e) = self.check_parameters() {
            panic!("{}", e);
        }

        // feature-major data is exactly a row-major `features x batch` matrix
        let input = ArrayView2::from_shape((self.input_len, batch_size), input).unwrap();
        let weight = ArrayView2::from_shape((self.input_len, self.output_len), &self.weight[..]).unwrap();

        let mut output = weight.t().dot(&input);
        for (mut row, &b) in output.axis_iter_mut(Axis(0)).zip(&self.bias) {
            row.mapv_inplace(|x| x + b);
        }

        output.iter().copied().collect()
    }
}

impl Relu {
    pub fn new(len: usize) -> Self {
        Relu { len, kernel: None }
    }
}

impl ComputeLayer for Relu {
    fn input_len(&self) -> usize {
        self.len
    }

    fn output_len(&self) -> usize {
        self.len
    }

    fn setup(&mut self, module: &KernelModule) -> Result<(), LayerError> {
        self.kernel = Some(require_kernel(module, "relu_forward")?);
        Ok(())
    }

    fn encode(
        &self,
        commands: &mut CommandBuffer,
        batch_size: usize,
        input: &DevicePtr,
        input_offset: usize,
        output: &DevicePtr,
        output_offset: usize,
    ) {
        let kernel = self
            .kernel
            .as_ref()
            .unwrap_or_else(|| panic!("Relu layer encoded before setup"));

        let mut args = KernelArgs::new();
        args.push_buffer(input, input_offset);
        args.push_buffer(output, output_offset);
        args.push((self.len * batch_size) as u32);

        commands.dispatch(kernel, args);
    }

    fn cpu_forward(&self, batch_size: usize, input: &[f32]) -> Vec<f32> {
        assert_eq!(input.len(), self.len * batch_size);
        input.iter().map(|&x| x.max(0.0)).collect()
    }
}

impl FixedSource {
    /// Every batch must contain `len * batch_size` values for the batch size it will be evaluated with.
    pub fn new(len: usize, batches: Vec<Vec<f32>>) -> Self {
        assert!(!batches.is_empty(), "FixedSource needs at least one batch");
        FixedSource {
            len,
            batches,
            next: AtomicUsize::new(0),
        }
    }
}

impl SourceLayer for FixedSource {
    fn output_len(&self) -> usize {
        self.len
    }

    fn next_batch(&self, batch_size: usize) -> Vec<f32> {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        let batch = &self.batches[index % self.batches.len()];
        assert_eq!(
            batch.len(),
            self.len * batch_size,
            "Fixed batch {} has the wrong length for batch size {}",
            index,
            batch_size
        );
        batch.clone()
    }
}

impl FnSource {
    pub fn new(len: usize, f: impl Fn(usize, usize) -> Vec<f32> + Send + Sync + 'static) -> Self {
        FnSource {
            len,
            f: Box::new(f),
            next: AtomicUsize::new(0),
        }
    }
}

impl SourceLayer for FnSource {
    fn output_len(&self) -> usize {
        self.len
    }

    fn next_batch(&self, batch_size: usize) -> Vec<f32> {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        let batch = (self.f)(index, batch_size);
        assert_eq!(batch.len(), self.len * batch_size, "FnSource returned batch with wrong length");
        batch
    }
}

impl ChannelSink {
    pub fn new(len: usize) -> (Self, Receiver<Vec<f32>>) {
        let (sender, receiver) = flume::unbounded();
        (ChannelSink { len, sender }, receiver)
    }
}

impl SinkLayer for ChannelSink {
    fn input_len(&self) -> usize {
        self.len
    }

    fn consume(&self, values: &[f32]) {
        // nobody listening is fine
        let _ = self.sender.send(values.to_vec());
    }
}

impl NullSink {
    pub fn new(len: usize) -> Self {
        NullSink { len }
    }
}

impl SinkLayer for NullSink {
    fn input_len(&self) -> usize {
        self.len
    }

    fn consume(&self, _: &[f32]) {}
}

impl Debug for Affine {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Affine")
            .field("input_len", &self.input_len)
            .field("output_len", &self.output_len)
            .field("setup", &self.device.is_some())
            .finish()
    }
}

impl Debug for FnSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSource")
            .field("len", &self.len)
            .field("next", &self.next)
            .finish()
    }
}
