//! All kernels operate on `f32` buffers laid out feature-major:
//! element `(f, s)` of a `features x batch` block lives at `f * batch + s`.

use crate::args::{KernelContext, KernelError};
use crate::module::ModuleSource;

pub const BUILTIN_MODULE_NAME: &str = "pipenet";

pub fn builtin_module() -> ModuleSource {
    ModuleSource::new(BUILTIN_MODULE_NAME)
        .with_function("affine_forward", affine_forward)
        .with_function("relu_forward", relu_forward)
        .with_function("copy", copy)
}

/// `output[j, s] = bias[j] + sum_i input[i, s] * weight[i, j]`
///
/// Buffers: `input, output, weight, bias`.
/// Scalars (`u32`): `batch, input_len, output_len`.
pub fn affine_forward(ctx: &KernelContext) -> Result<(), KernelError> {
    let batch = ctx.size(0)?;
    let input_len = ctx.size(1)?;
    let output_len = ctx.size(2)?;

    let input = ctx.read(0, input_len * batch)?;
    let weight = ctx.read(2, input_len * output_len)?;
    let bias = ctx.read(3, output_len)?;

    let mut output = vec![0.0; output_len * batch];
    for j in 0..output_len {
        for s in 0..batch {
            let mut acc = bias[j];
            for i in 0..input_len {
                acc += input[i * batch + s] * weight[i * output_len + j];
            }
            output[j * batch + s] = acc;
        }
    }

    ctx.write(1, &output)
}

/// `output[i] = max(input[i], 0)`
///
/// Buffers: `input, output`.
/// Scalars (`u32`): `len`.
pub fn relu_forward(ctx: &KernelContext) -> Result<(), KernelError> {
    let len = ctx.size(0)?;
    let mut values = ctx.read(0, len)?;
    values.iter_mut().for_each(|x| *x = x.max(0.0));
    ctx.write(1, &values)
}

/// Buffers: `input, output`.
/// Scalars (`u32`): `len`.
pub fn copy(ctx: &KernelContext) -> Result<(), KernelError> {
    let len = ctx.size(0)?;
    let values = ctx.read(0, len)?;
    ctx.write(1, &values)
}
