//! Per-kind argument blocks and the validation rules from SPEC_FULL.md §4.5.

use crate::error::{Error, Result};
use crate::format::{Format, Layout};
use crate::memory::SharedBuffer;

/// Which primitive a node is (the registered type id, C1/C5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Memory,
    File,
    Reorder,
    Relu,
    ReluBackward,
    Pooling,
    Convolution,
    ConvolutionRelu,
    ConvolutionBackward,
    Response,
    Softmax,
    BatchTrainingForward,
    BatchTrainingBackward,
    BatchInference,
    DepthConcatenate,
    FullyConnected,
}

impl PrimitiveKind {
    pub fn name(self) -> &'static str {
        use PrimitiveKind::*;
        match self {
            Memory => "memory",
            File => "file",
            Reorder => "reorder",
            Relu => "relu",
            ReluBackward => "relu_backward",
            Pooling => "pooling",
            Convolution => "convolution",
            ConvolutionRelu => "convolution_relu",
            ConvolutionBackward => "convolution_backward",
            Response => "response",
            Softmax => "softmax",
            BatchTrainingForward => "batch_training_forward",
            BatchTrainingBackward => "batch_training_backward",
            BatchInference => "batch_inference",
            DepthConcatenate => "depth_concatenate",
            FullyConnected => "fully_connected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolingMode {
    Max,
    Average,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    Zero,
}

/// Kind-specific, immutable-after-creation parameter block (§3 "argument").
#[derive(Debug, Clone)]
pub enum Argument {
    Memory,
    File { path: String },
    Reorder,
    Relu { slope: f32 },
    ReluBackward { slope: f32 },
    Pooling { mode: PoolingMode, window: Vec<usize>, stride: Vec<usize>, padding: Padding, input_offset: Vec<i64> },
    Convolution { stride: Vec<usize>, input_offset: Vec<i64>, padding: Padding, split: usize },
    ConvolutionBackward,
    Response { size: usize, k: f32, alpha: f32, beta: f32 },
    Softmax,
    BatchTrainingForward { spatial: bool, exp_avg_factor: f32, epsilon: f32 },
    BatchTrainingBackward { spatial: bool, epsilon: f32 },
    BatchInference { spatial: bool, epsilon: f32 },
    DepthConcatenate,
    FullyConnected,
}

fn invalid(field: &str, message: impl Into<String>) -> Error {
    Error::invalid_argument(field, message)
}

fn require(cond: bool, field: &str, message: impl Into<String>) -> Result<()> {
    if cond {
        Ok(())
    } else {
        Err(invalid(field, message))
    }
}

fn feature_size(buf: &SharedBuffer) -> usize {
    buf.shape().feature_size()
}

fn batch_size(buf: &SharedBuffer) -> usize {
    buf.shape().batch_size()
}

fn formats_equal(a: &SharedBuffer, b: &SharedBuffer) -> bool {
    a.format() == b.format()
}

/// Rejects batch-24-tiled buffers (`byxf_b24`, `bs_yxf_bv24`) whose batch
/// size isn't a multiple of 24 — `Layout::index` only asserts this at
/// element-access time, but §4.3/§9 require the rejection to happen at
/// construction, not as a panic the first time a kernel touches the buffer.
fn check_batch24_tiling(buf: &SharedBuffer) -> Result<()> {
    let layout = buf.format().layout;
    if matches!(layout, Layout::ByxfB24 | Layout::BsYxfBv24) {
        let batch = batch_size(buf);
        require(batch % 24 == 0, "format", format!("{layout:?} requires batch size divisible by 24, got {batch}"))?;
    }
    Ok(())
}

/// Validates `argument` against `inputs`/`outputs` for `kind` (§4.5). Only
/// the novel rules are checked here; generic shape/format plumbing between
/// a node and its producers is the graph builder's job, not this function's.
pub fn validate(kind: PrimitiveKind, argument: &Argument, inputs: &[SharedBuffer], outputs: &[SharedBuffer]) -> Result<()> {
    use PrimitiveKind::*;
    for buf in inputs.iter().chain(outputs.iter()) {
        check_batch24_tiling(buf)?;
    }
    match (kind, argument) {
        (Reorder, Argument::Reorder) => {
            require(inputs.len() == 1, "inputs", "reorder takes exactly one input")?;
            require(outputs.len() == 1, "outputs", "reorder produces exactly one output")?;
            require(
                inputs[0].shape().element_count() == outputs[0].shape().element_count(),
                "shape",
                "reorder input and output must have equal element counts",
            )
        }
        (DepthConcatenate, Argument::DepthConcatenate) => {
            require(inputs.len() >= 2, "inputs", "depth_concatenate needs at least two inputs")?;
            require(outputs.len() == 1, "outputs", "depth_concatenate produces exactly one output")?;
            let first = &inputs[0];
            for other in &inputs[1..] {
                require(batch_size(other) == batch_size(first), "inputs", "all inputs must share batch size")?;
                require(other.shape().spatial() == first.shape().spatial(), "inputs", "all inputs must share spatial extent")?;
                require(formats_equal(other, first), "inputs", "all inputs must share format")?;
            }
            let summed: usize = inputs.iter().map(feature_size).sum();
            require(feature_size(&outputs[0]) == summed, "outputs", "output feature size must equal the sum of input feature sizes")
        }
        (Convolution | ConvolutionRelu, Argument::Convolution { stride, split, .. }) => {
            require(inputs.len() >= 3, "inputs", "convolution needs input, weights and bias")?;
            require(outputs.len() == 1, "outputs", "convolution produces exactly one output")?;
            let weight_out_feature = feature_size(&inputs[1]);
            require(feature_size(&outputs[0]) == weight_out_feature, "outputs", "output feature must equal weight output-feature count")?;
            require(feature_size(&inputs[2]) == weight_out_feature, "bias", "bias length must equal output feature count")?;
            require(stride.iter().all(|&s| s > 0), "stride", "stride components must be > 0")?;
            require(*split >= 1, "split", "split must be >= 1")?;
            require(weight_out_feature % split == 0, "split", "split must partition output feature evenly")
        }
        (ConvolutionBackward, Argument::ConvolutionBackward) => {
            require(inputs.len() == 4, "inputs", "convolution_backward expects {d_output, input_fwd, weight, bias}")?;
            require(outputs.len() == 3, "outputs", "convolution_backward produces {d_input, d_weight, d_bias}")
        }
        (Pooling, Argument::Pooling { window, stride, .. }) => {
            require(inputs.len() == 1, "inputs", "pooling takes exactly one input")?;
            require(outputs.len() == 1, "outputs", "pooling produces exactly one output")?;
            require(window.iter().all(|&w| w > 0), "window", "window components must be > 0")?;
            require(stride.iter().all(|&s| s > 0), "stride", "stride components must be > 0")
        }
        (Response, Argument::Response { size, k, beta, .. }) => {
            require(inputs.len() == 1, "inputs", "response takes exactly one input")?;
            require(outputs.len() == 1, "outputs", "response produces exactly one output")?;
            require(size % 2 == 1, "size", "LRN window size must be odd")?;
            require(*k > 0.0, "k", "k must be > 0")?;
            require(beta.is_finite(), "beta", "beta must be finite")
        }
        (Softmax, Argument::Softmax) => {
            require(inputs.len() == 1, "inputs", "softmax takes exactly one input")?;
            require(outputs.len() == 1, "outputs", "softmax produces exactly one output")?;
            require(inputs[0].shape().rank() == 2, "input", "softmax input must be a 2-D (batch, x) layout")
        }
        (BatchTrainingForward, Argument::BatchTrainingForward { exp_avg_factor, epsilon, .. }) => {
            require(inputs.len() == 3, "inputs", "batch_training_forward expects {x, scale, bias}")?;
            require(outputs.len() == 5, "outputs", "batch_training_forward produces {y, current_mean, current_inv_std_dev, moving_mean, moving_inv_std_dev}")?;
            require(*exp_avg_factor >= 0.0 && *exp_avg_factor <= 1.0, "exp_avg_factor", "must be in [0, 1]")?;
            require(*epsilon > 0.0, "epsilon", "epsilon must be > 0")
        }
        (BatchTrainingBackward, Argument::BatchTrainingBackward { .. }) => {
            require(inputs.len() == 6, "inputs", "batch_training_backward expects {x_fwd, scale_fwd, bias_fwd, d_y, current_mean, current_inv_std_dev}")?;
            require(outputs.len() == 3, "outputs", "batch_training_backward produces {d_x, d_scale, d_bias}")
        }
        (BatchInference, Argument::BatchInference { .. }) => {
            require(inputs.len() == 5, "inputs", "batch_inference expects {x, scale, bias, mean, inv_std_dev}")?;
            require(outputs.len() == 1, "outputs", "batch_inference produces exactly one output")
        }
        (FullyConnected, Argument::FullyConnected) => {
            require(inputs.len() == 3, "inputs", "fully_connected expects {x, weight, bias}")?;
            require(outputs.len() == 1, "outputs", "fully_connected produces exactly one output")
        }
        (Memory, Argument::Memory) => Ok(()),
        (File, Argument::File { path }) => require(!path.is_empty(), "path", "file path must not be empty"),
        (Relu, Argument::Relu { .. }) => {
            require(inputs.len() == 1, "inputs", "relu takes exactly one input")?;
            require(outputs.len() == 1, "outputs", "relu produces exactly one output")
        }
        (ReluBackward, Argument::ReluBackward { .. }) => {
            require(inputs.len() == 2, "inputs", "relu_backward expects {x_fwd, d_y}")?;
            require(outputs.len() == 1, "outputs", "relu_backward produces exactly one output (d_x)")
        }
        _ => Err(invalid("kind", format!("argument does not match primitive kind {kind:?}"))),
    }
}

/// Computes the default dispatch-key formats `(input0.format, output0.format)`
/// for a node (§4.5 step 3, §4.6).
pub fn default_formats(inputs: &[SharedBuffer], outputs: &[SharedBuffer]) -> Result<(Format, Format)> {
    let input = inputs.first().ok_or_else(|| invalid("inputs", "node has no inputs to derive a dispatch key from"))?;
    let output = outputs.first().ok_or_else(|| invalid("outputs", "node has no outputs to derive a dispatch key from"))?;
    Ok((input.format(), output.format()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Layout;
    use crate::memory::MemoryBuffer;
    use crate::registry::EngineKind;
    use crate::shape::Shape;
    use crate::types::ElementType;
    use std::sync::Arc;

    fn buf(batch: usize, feature: usize, spatial: &[usize]) -> SharedBuffer {
        Arc::new(
            MemoryBuffer::allocate(Shape::new(batch, feature, spatial), Format::new(Layout::Bfyx, ElementType::F32), EngineKind::Cpu)
                .unwrap(),
        )
    }

    #[test]
    fn depth_concatenate_requires_matching_spatial_and_batch() {
        let a = buf(2, 3, &[4, 4]);
        let b = buf(2, 5, &[4, 4]);
        let out = buf(2, 8, &[4, 4]);
        assert!(validate(PrimitiveKind::DepthConcatenate, &Argument::DepthConcatenate, &[a, b], &[out]).is_ok());
    }

    #[test]
    fn depth_concatenate_rejects_feature_mismatch() {
        let a = buf(2, 3, &[4, 4]);
        let b = buf(2, 5, &[4, 4]);
        let out = buf(2, 100, &[4, 4]);
        let err = validate(PrimitiveKind::DepthConcatenate, &Argument::DepthConcatenate, &[a, b], &[out]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn convolution_requires_split_to_partition_output_feature_evenly() {
        let input = buf(1, 3, &[8, 8]);
        let weight = buf(1, 3, &[3, 3]); // feature_size taken as weight-output-feature stand-in
        let bias = buf(1, 1, &[1]);
        let out = buf(1, 3, &[6, 6]);
        let arg = Argument::Convolution { stride: vec![1, 1], input_offset: vec![0, 0], padding: Padding::Zero, split: 2 };
        let err = validate(PrimitiveKind::Convolution, &arg, &[input, weight, bias], &[out]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn response_requires_odd_window() {
        let input = buf(1, 4, &[4, 4]);
        let out = buf(1, 4, &[4, 4]);
        let arg = Argument::Response { size: 4, k: 1.0, alpha: 1e-4, beta: 0.75 };
        assert!(validate(PrimitiveKind::Response, &arg, &[input], &[out]).is_err());
    }

    #[test]
    fn softmax_requires_rank_two_input() {
        let input = buf(1, 1, &[4, 4]);
        let out = buf(1, 1, &[4, 4]);
        assert!(validate(PrimitiveKind::Softmax, &Argument::Softmax, &[input], &[out]).is_err());
    }

    #[test]
    fn response_rejects_byxf_b24_batch_not_a_multiple_of_24() {
        let tiled = |batch| {
            Arc::new(MemoryBuffer::allocate(Shape::new(batch, 4, &[4, 4]), Format::new(Layout::ByxfB24, ElementType::F32), EngineKind::Cpu).unwrap())
        };
        let input = tiled(1);
        let out = tiled(1);
        let arg = Argument::Response { size: 3, k: 1.0, alpha: 1e-4, beta: 0.75 };
        let err = validate(PrimitiveKind::Response, &arg, &[input], &[out]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));

        let input = tiled(24);
        let out = tiled(24);
        assert!(validate(PrimitiveKind::Response, &arg, &[input], &[out]).is_ok());
    }
}
