//! C11: reference kernels — correct-but-slow implementations used as spec
//! and fallback (SPEC_FULL.md §4.11). Each factory below is registered by
//! [`crate::register::register_default_kernels`] under the broad
//! `EngineKind::Reference` dispatch key for its kind; [`crate::optimized`]
//! overrides a subset under tighter keys.
//!
//! Statistics buffers for `batch_training_forward`/`batch_training_backward`/
//! `batch_inference` (`current_mean`, `current_inv_std_dev`, `moving_mean`,
//! `moving_inv_std_dev`, and the inference `mean`/`inv_std_dev` inputs) are
//! shaped `(1, F, 1, 1)` when `spatial == true` (one scalar per feature) and
//! `(1, F, Y, X)` when `spatial == false` (one scalar per feature *and*
//! spatial position) — the data model doesn't pin this down explicitly, and
//! this keeps a single activation-shaped view serving both cases (DESIGN.md).

use std::sync::Arc;

use nnx_core::error::{Error, Result};
use nnx_core::memory::SharedBuffer;
use nnx_core::primitive::{Argument, PoolingMode};
use nnx_core::registry::KernelFactory;
use nnx_core::task::{Schedule, Task, TaskGroup};

use crate::tensor::View;

fn bad_argument(name: &str) -> Error {
    Error::internal(format!("{name} factory received a mismatched argument variant"))
}

/// `y = max(x,0) + slope*min(x,0)`, elementwise (§4.11 "ReLU forward").
pub struct ReluForward;

impl KernelFactory for ReluForward {
    fn name(&self) -> &'static str {
        "relu.reference"
    }

    fn instantiate(&self, inputs: &[SharedBuffer], outputs: &[SharedBuffer], argument: &Argument) -> Result<TaskGroup> {
        let slope = match argument {
            Argument::Relu { slope } => *slope,
            _ => return Err(bad_argument("relu")),
        };
        let x = inputs[0].clone();
        let y = outputs[0].clone();
        let task = Task::new(move || {
            let xv = View::activation(x.clone());
            let yv = View::activation(y.clone());
            let sizes = yv.sizes().to_vec();
            for b in 0..sizes[0] {
                for f in 0..sizes[1] {
                    for yy in 0..sizes[2] {
                        for xx in 0..sizes[3] {
                            let v = xv.get(&[b, f, yy, xx]);
                            yv.set(&[b, f, yy, xx], v.max(0.0) + slope * v.min(0.0));
                        }
                    }
                }
            }
        });
        Ok(TaskGroup::new(vec![task], Schedule::Single))
    }
}

/// `d_x = (x_fwd > 0 ? d_y : slope*d_y)` (§4.11 "ReLU backward").
pub struct ReluBackward;

impl KernelFactory for ReluBackward {
    fn name(&self) -> &'static str {
        "relu_backward.reference"
    }

    fn instantiate(&self, inputs: &[SharedBuffer], outputs: &[SharedBuffer], argument: &Argument) -> Result<TaskGroup> {
        let slope = match argument {
            Argument::ReluBackward { slope } => *slope,
            _ => return Err(bad_argument("relu_backward")),
        };
        let x_fwd = inputs[0].clone();
        let d_y = inputs[1].clone();
        let d_x = outputs[0].clone();
        let task = Task::new(move || {
            let xv = View::activation(x_fwd.clone());
            let dyv = View::activation(d_y.clone());
            let dxv = View::activation(d_x.clone());
            let sizes = dxv.sizes().to_vec();
            for b in 0..sizes[0] {
                for f in 0..sizes[1] {
                    for yy in 0..sizes[2] {
                        for xx in 0..sizes[3] {
                            let x = xv.get(&[b, f, yy, xx]);
                            let dy = dyv.get(&[b, f, yy, xx]);
                            dxv.set(&[b, f, yy, xx], if x > 0.0 { dy } else { slope * dy });
                        }
                    }
                }
            }
        });
        Ok(TaskGroup::new(vec![task], Schedule::Single))
    }
}

/// Max/average pooling over a sliding window; out-of-input positions
/// contribute 0 to both modes (§4.11).
pub struct PoolingForward;

impl KernelFactory for PoolingForward {
    fn name(&self) -> &'static str {
        "pooling.reference"
    }

    fn instantiate(&self, inputs: &[SharedBuffer], outputs: &[SharedBuffer], argument: &Argument) -> Result<TaskGroup> {
        let (mode, window, stride, input_offset) = match argument {
            Argument::Pooling { mode, window, stride, input_offset, .. } => (*mode, window.clone(), stride.clone(), input_offset.clone()),
            _ => return Err(bad_argument("pooling")),
        };
        let x = inputs[0].clone();
        let y = outputs[0].clone();
        let task = Task::new(move || {
            let xv = View::activation(x.clone());
            let yv = View::activation(y.clone());
            let xsizes = xv.sizes().to_vec();
            let osizes = yv.sizes().to_vec();
            let (wy, wx) = (window[0], window[1]);
            let (sy, sx) = (stride[0], stride[1]);
            let (off_y, off_x) = (input_offset[0], input_offset[1]);
            for b in 0..osizes[0] {
                for f in 0..osizes[1] {
                    for oy in 0..osizes[2] {
                        for ox in 0..osizes[3] {
                            let mut acc = match mode {
                                PoolingMode::Max => f32::NEG_INFINITY,
                                PoolingMode::Average => 0.0,
                            };
                            for ky in 0..wy {
                                for kx in 0..wx {
                                    let iy = oy as i64 * sy as i64 + ky as i64 + off_y;
                                    let ix = ox as i64 * sx as i64 + kx as i64 + off_x;
                                    let v = if iy >= 0 && ix >= 0 && (iy as usize) < xsizes[2] && (ix as usize) < xsizes[3] {
                                        xv.get(&[b, f, iy as usize, ix as usize])
                                    } else {
                                        0.0
                                    };
                                    match mode {
                                        PoolingMode::Max => acc = acc.max(v),
                                        PoolingMode::Average => acc += v,
                                    }
                                }
                            }
                            if mode == PoolingMode::Average {
                                acc /= (wy * wx) as f32;
                            }
                            yv.set(&[b, f, oy, ox], acc);
                        }
                    }
                }
            }
        });
        Ok(TaskGroup::new(vec![task], Schedule::Single))
    }
}

/// Local response normalization: `y(i) = x(i)*(k + alpha*sum_j x(j)^2)^(-beta)`,
/// `j` ranging over the odd window centered on `i` (§4.11).
pub struct ResponseForward;

impl KernelFactory for ResponseForward {
    fn name(&self) -> &'static str {
        "response.reference"
    }

    fn instantiate(&self, inputs: &[SharedBuffer], outputs: &[SharedBuffer], argument: &Argument) -> Result<TaskGroup> {
        let (size, k, alpha, beta) = match argument {
            Argument::Response { size, k, alpha, beta } => (*size, *k, *alpha, *beta),
            _ => return Err(bad_argument("response")),
        };
        let x = inputs[0].clone();
        let y = outputs[0].clone();
        let task = Task::new(move || {
            let xv = View::activation(x.clone());
            let yv = View::activation(y.clone());
            let sizes = yv.sizes().to_vec();
            let half = size / 2;
            let feature_count = sizes[1];
            for b in 0..sizes[0] {
                for f in 0..feature_count {
                    let lo = f.saturating_sub(half);
                    let hi = (f + half).min(feature_count - 1);
                    for yy in 0..sizes[2] {
                        for xx in 0..sizes[3] {
                            let mut sum_sq = 0.0f32;
                            for j in lo..=hi {
                                let v = xv.get(&[b, j, yy, xx]);
                                sum_sq += v * v;
                            }
                            let v = xv.get(&[b, f, yy, xx]);
                            yv.set(&[b, f, yy, xx], v * (k + alpha * sum_sq).powf(-beta));
                        }
                    }
                }
            }
        });
        Ok(TaskGroup::new(vec![task], Schedule::Single))
    }
}

/// Per-batch softmax along the x axis: subtract the row max, exponentiate,
/// normalize by the row sum (§4.11).
pub struct SoftmaxForward;

impl KernelFactory for SoftmaxForward {
    fn name(&self) -> &'static str {
        "softmax.reference"
    }

    fn instantiate(&self, inputs: &[SharedBuffer], outputs: &[SharedBuffer], argument: &Argument) -> Result<TaskGroup> {
        match argument {
            Argument::Softmax => {}
            _ => return Err(bad_argument("softmax")),
        }
        let x = inputs[0].clone();
        let y = outputs[0].clone();
        let task = Task::new(move || {
            let xv = View::vector2(x.clone());
            let yv = View::vector2(y.clone());
            let sizes = yv.sizes().to_vec();
            let (batch, width) = (sizes[0], sizes[1]);
            for b in 0..batch {
                let mut max_v = f32::NEG_INFINITY;
                for xx in 0..width {
                    max_v = max_v.max(xv.get(&[b, xx]));
                }
                let mut sum = 0.0f32;
                for xx in 0..width {
                    let e = (xv.get(&[b, xx]) - max_v).exp();
                    yv.set(&[b, xx], e);
                    sum += e;
                }
                for xx in 0..width {
                    let e = yv.get(&[b, xx]);
                    yv.set(&[b, xx], e / sum);
                }
            }
        });
        Ok(TaskGroup::new(vec![task], Schedule::Single))
    }
}

fn convolution_body(x: Arc<nnx_core::memory::MemoryBuffer>, weight: Arc<nnx_core::memory::MemoryBuffer>, bias: Arc<nnx_core::memory::MemoryBuffer>, y: Arc<nnx_core::memory::MemoryBuffer>, stride: &[usize], input_offset: &[i64], split: usize, relu: bool) {
    let xv = View::activation(x);
    let wv = View::conv_weight(weight);
    let biasv = View::vector2(bias);
    let yv = View::activation(y);

    let xsizes = xv.sizes().to_vec();
    let osizes = yv.sizes().to_vec();
    let wsizes = wv.sizes().to_vec(); // [total_out, in_per_group, ky, kx]
    let (total_out, in_per_group, ky_sz, kx_sz) = (wsizes[0], wsizes[1], wsizes[2], wsizes[3]);
    let out_per_group = total_out / split.max(1);
    let (sy, sx) = (stride[0], stride[1]);
    let (off_y, off_x) = (input_offset[0], input_offset[1]);

    for b in 0..osizes[0] {
        for o in 0..osizes[1] {
            let group = if out_per_group == 0 { 0 } else { o / out_per_group };
            let in_base = group * in_per_group;
            for oy in 0..osizes[2] {
                for ox in 0..osizes[3] {
                    let mut acc = biasv.get(&[0, o]);
                    for i in 0..in_per_group {
                        for ky in 0..ky_sz {
                            for kx in 0..kx_sz {
                                let iy = oy as i64 * sy as i64 + ky as i64 + off_y;
                                let ix = ox as i64 * sx as i64 + kx as i64 + off_x;
                                if iy >= 0 && ix >= 0 && (iy as usize) < xsizes[2] && (ix as usize) < xsizes[3] {
                                    let xval = xv.get(&[b, in_base + i, iy as usize, ix as usize]);
                                    let wval = wv.get(&[o, i, ky, kx]);
                                    acc += xval * wval;
                                }
                            }
                        }
                    }
                    if relu {
                        acc = acc.max(0.0);
                    }
                    yv.set(&[b, o, oy, ox], acc);
                }
            }
        }
    }
}

/// `y(b,o,u,v) = bias(o) + sum_{i,ky,kx} w(o,i,ky,kx)*x(b,i,u*sy+ky+offy,v*sx+kx+offx)`,
/// zero-padded outside the input, `split` partitioning the output-feature
/// axis into independent groups (§4.11).
pub struct ConvolutionForward {
    relu: bool,
}

impl ConvolutionForward {
    pub fn new() -> Self {
        ConvolutionForward { relu: false }
    }

    pub fn with_relu() -> Self {
        ConvolutionForward { relu: true }
    }
}

impl Default for ConvolutionForward {
    fn default() -> Self {
        ConvolutionForward::new()
    }
}

impl KernelFactory for ConvolutionForward {
    fn name(&self) -> &'static str {
        if self.relu {
            "convolution_relu.reference"
        } else {
            "convolution.reference"
        }
    }

    fn instantiate(&self, inputs: &[SharedBuffer], outputs: &[SharedBuffer], argument: &Argument) -> Result<TaskGroup> {
        let (stride, input_offset, split) = match argument {
            Argument::Convolution { stride, input_offset, split, .. } => (stride.clone(), input_offset.clone(), *split),
            _ => return Err(bad_argument("convolution")),
        };
        let x = inputs[0].clone();
        let weight = inputs[1].clone();
        let bias = inputs[2].clone();
        let y = outputs[0].clone();
        let relu = self.relu;
        let task = Task::new(move || {
            convolution_body(x.clone(), weight.clone(), bias.clone(), y.clone(), &stride, &input_offset, split, relu);
        });
        Ok(TaskGroup::new(vec![task], Schedule::Single))
    }
}

/// `d_input` via transposed-kernel correlation — the well-defined half of
/// convolution backward (§4.11, §9). Exercised directly by unit tests below;
/// not wired into [`ConvolutionBackward`] since `d_weight`/`d_bias` have no
/// defined reference semantics to pair it with.
fn convolution_backward_dinput(d_output: &View, weight: &View, d_input: &View, stride: &[usize], input_offset: &[i64], split: usize) {
    let out_sizes = d_output.sizes().to_vec();
    let in_sizes = d_input.sizes().to_vec();
    let wsizes = weight.sizes().to_vec();
    let (total_out, in_per_group, ky_sz, kx_sz) = (wsizes[0], wsizes[1], wsizes[2], wsizes[3]);
    let out_per_group = total_out / split.max(1);
    let (sy, sx) = (stride[0], stride[1]);
    let (off_y, off_x) = (input_offset[0], input_offset[1]);

    for b in 0..in_sizes[0] {
        for i in 0..in_sizes[1] {
            for iy in 0..in_sizes[2] {
                for ix in 0..in_sizes[3] {
                    let mut acc = 0.0f32;
                    for o in 0..total_out {
                        let group = if out_per_group == 0 { 0 } else { o / out_per_group };
                        let in_base = group * in_per_group;
                        if i < in_base || i >= in_base + in_per_group {
                            continue;
                        }
                        let local_i = i - in_base;
                        for ky in 0..ky_sz {
                            for kx in 0..kx_sz {
                                let num_y = iy as i64 - ky as i64 - off_y;
                                let num_x = ix as i64 - kx as i64 - off_x;
                                if num_y < 0 || num_x < 0 || num_y % sy as i64 != 0 || num_x % sx as i64 != 0 {
                                    continue;
                                }
                                let (oy, ox) = (num_y / sy as i64, num_x / sx as i64);
                                if (oy as usize) >= out_sizes[2] || (ox as usize) >= out_sizes[3] {
                                    continue;
                                }
                                let dy = d_output.get(&[b, o, oy as usize, ox as usize]);
                                let w = weight.get(&[o, local_i, ky, kx]);
                                acc += dy * w;
                            }
                        }
                    }
                    d_input.set(&[b, i, iy, ix], acc);
                }
            }
        }
    }
}

/// `d_weight`/`d_bias` have no semantics defined by the source (§9); this
/// factory always fails at construction with [`Error::NotImplemented`]
/// rather than fabricate them.
pub struct ConvolutionBackward;

impl KernelFactory for ConvolutionBackward {
    fn name(&self) -> &'static str {
        "convolution_backward.reference"
    }

    fn instantiate(&self, inputs: &[SharedBuffer], outputs: &[SharedBuffer], _argument: &Argument) -> Result<TaskGroup> {
        let key = nnx_core::registry::DispatchKey::new(nnx_core::registry::EngineKind::Reference, inputs[1].format(), outputs[0].format());
        Err(Error::NotImplemented { key })
    }
}

/// Per-feature mean/variance over batch×spatial (`spatial == true`) or batch
/// only (`spatial == false`), normalize, scale and bias, and update the
/// moving estimates (§4.11).
pub struct BatchTrainingForward;

impl KernelFactory for BatchTrainingForward {
    fn name(&self) -> &'static str {
        "batch_training_forward.reference"
    }

    fn instantiate(&self, inputs: &[SharedBuffer], outputs: &[SharedBuffer], argument: &Argument) -> Result<TaskGroup> {
        let (spatial, exp_avg_factor, epsilon) = match argument {
            Argument::BatchTrainingForward { spatial, exp_avg_factor, epsilon } => (*spatial, *exp_avg_factor, *epsilon),
            _ => return Err(bad_argument("batch_training_forward")),
        };
        let x = inputs[0].clone();
        let scale = inputs[1].clone();
        let bias = inputs[2].clone();
        let y = outputs[0].clone();
        let current_mean = outputs[1].clone();
        let current_inv = outputs[2].clone();
        let moving_mean = outputs[3].clone();
        let moving_inv = outputs[4].clone();

        let task = Task::new(move || {
            let xv = View::activation(x.clone());
            let scalev = View::vector2(scale.clone());
            let biasv = View::vector2(bias.clone());
            let yv = View::activation(y.clone());
            let cmeanv = View::activation(current_mean.clone());
            let civ = View::activation(current_inv.clone());
            let mmeanv = View::activation(moving_mean.clone());
            let miv = View::activation(moving_inv.clone());

            let xsizes = xv.sizes().to_vec();
            let (batch, feature) = (xsizes[0], xsizes[1]);
            let (py_range, px_range) = if spatial { (1, 1) } else { (xsizes[2], xsizes[3]) };

            for f in 0..feature {
                for py in 0..py_range {
                    for px in 0..px_range {
                        let mut sum = 0.0f32;
                        let mut sum_sq = 0.0f32;
                        let mut count = 0usize;
                        for b in 0..batch {
                            if spatial {
                                for yy in 0..xsizes[2] {
                                    for xx in 0..xsizes[3] {
                                        let v = xv.get(&[b, f, yy, xx]);
                                        sum += v;
                                        sum_sq += v * v;
                                        count += 1;
                                    }
                                }
                            } else {
                                let v = xv.get(&[b, f, py, px]);
                                sum += v;
                                sum_sq += v * v;
                                count += 1;
                            }
                        }
                        let mean = sum / count as f32;
                        let var = (sum_sq / count as f32 - mean * mean).max(0.0);
                        let inv_std = 1.0 / (var + epsilon).sqrt();

                        cmeanv.set(&[0, f, py, px], mean);
                        civ.set(&[0, f, py, px], inv_std);
                        let prev_mean = mmeanv.get(&[0, f, py, px]);
                        let prev_inv = miv.get(&[0, f, py, px]);
                        mmeanv.set(&[0, f, py, px], (1.0 - exp_avg_factor) * prev_mean + exp_avg_factor * mean);
                        miv.set(&[0, f, py, px], (1.0 - exp_avg_factor) * prev_inv + exp_avg_factor * inv_std);

                        let gamma = scalev.get(&[0, f]);
                        let beta = biasv.get(&[0, f]);
                        for b in 0..batch {
                            if spatial {
                                for yy in 0..xsizes[2] {
                                    for xx in 0..xsizes[3] {
                                        let v = xv.get(&[b, f, yy, xx]);
                                        yv.set(&[b, f, yy, xx], (v - mean) * inv_std * gamma + beta);
                                    }
                                }
                            } else {
                                let v = xv.get(&[b, f, py, px]);
                                yv.set(&[b, f, py, px], (v - mean) * inv_std * gamma + beta);
                            }
                        }
                    }
                }
            }
        });
        Ok(TaskGroup::new(vec![task], Schedule::Single))
    }
}

/// Standard batch-norm gradient with respect to `x`, `scale`, `bias`, given
/// the forward's cached mean/inv-std-dev (§4.11).
pub struct BatchTrainingBackward;

impl KernelFactory for BatchTrainingBackward {
    fn name(&self) -> &'static str {
        "batch_training_backward.reference"
    }

    fn instantiate(&self, inputs: &[SharedBuffer], outputs: &[SharedBuffer], argument: &Argument) -> Result<TaskGroup> {
        let spatial = match argument {
            Argument::BatchTrainingBackward { spatial, .. } => *spatial,
            _ => return Err(bad_argument("batch_training_backward")),
        };
        let x_fwd = inputs[0].clone();
        let scale_fwd = inputs[1].clone();
        let d_y = inputs[3].clone();
        let current_mean = inputs[4].clone();
        let current_inv = inputs[5].clone();
        let d_x = outputs[0].clone();
        let d_scale = outputs[1].clone();
        let d_bias = outputs[2].clone();

        let task = Task::new(move || {
            let xv = View::activation(x_fwd.clone());
            let scalev = View::vector2(scale_fwd.clone());
            let dyv = View::activation(d_y.clone());
            let cmeanv = View::activation(current_mean.clone());
            let civ = View::activation(current_inv.clone());
            let dxv = View::activation(d_x.clone());
            let dscalev = View::activation(d_scale.clone());
            let dbiasv = View::activation(d_bias.clone());

            let xsizes = xv.sizes().to_vec();
            let (batch, feature) = (xsizes[0], xsizes[1]);
            let (py_range, px_range) = if spatial { (1, 1) } else { (xsizes[2], xsizes[3]) };

            for f in 0..feature {
                for py in 0..py_range {
                    for px in 0..px_range {
                        let mean = cmeanv.get(&[0, f, py, px]);
                        let inv_std = civ.get(&[0, f, py, px]);
                        let gamma = scalev.get(&[0, f]);

                        let mut sum_dy = 0.0f32;
                        let mut sum_dy_xhat = 0.0f32;
                        let mut count = 0usize;
                        let positions: Vec<(usize, usize, usize)> = if spatial {
                            let mut v = Vec::with_capacity(batch * xsizes[2] * xsizes[3]);
                            for b in 0..batch {
                                for yy in 0..xsizes[2] {
                                    for xx in 0..xsizes[3] {
                                        v.push((b, yy, xx));
                                    }
                                }
                            }
                            v
                        } else {
                            (0..batch).map(|b| (b, py, px)).collect()
                        };
                        for &(b, yy, xx) in &positions {
                            let x = xv.get(&[b, f, yy, xx]);
                            let dy = dyv.get(&[b, f, yy, xx]);
                            let xhat = (x - mean) * inv_std;
                            sum_dy += dy;
                            sum_dy_xhat += dy * xhat;
                            count += 1;
                        }
                        for &(b, yy, xx) in &positions {
                            let x = xv.get(&[b, f, yy, xx]);
                            let dy = dyv.get(&[b, f, yy, xx]);
                            let xhat = (x - mean) * inv_std;
                            let n = count as f32;
                            let dx = (gamma * inv_std / n) * (n * dy - sum_dy - xhat * sum_dy_xhat);
                            dxv.set(&[b, f, yy, xx], dx);
                        }
                        dscalev.set(&[0, f, py, px], sum_dy_xhat);
                        dbiasv.set(&[0, f, py, px], sum_dy);
                    }
                }
            }
        });
        Ok(TaskGroup::new(vec![task], Schedule::Single))
    }
}

/// `y = (x - mean) * inv_std_dev * scale + bias`, per feature (§4.11).
pub struct BatchInference;

impl KernelFactory for BatchInference {
    fn name(&self) -> &'static str {
        "batch_inference.reference"
    }

    fn instantiate(&self, inputs: &[SharedBuffer], outputs: &[SharedBuffer], argument: &Argument) -> Result<TaskGroup> {
        let spatial = match argument {
            Argument::BatchInference { spatial, .. } => *spatial,
            _ => return Err(bad_argument("batch_inference")),
        };
        let x = inputs[0].clone();
        let scale = inputs[1].clone();
        let bias = inputs[2].clone();
        let mean = inputs[3].clone();
        let inv_std_dev = inputs[4].clone();
        let y = outputs[0].clone();

        let task = Task::new(move || {
            let xv = View::activation(x.clone());
            let scalev = View::vector2(scale.clone());
            let biasv = View::vector2(bias.clone());
            let meanv = View::activation(mean.clone());
            let invv = View::activation(inv_std_dev.clone());
            let yv = View::activation(y.clone());
            let sizes = yv.sizes().to_vec();

            for b in 0..sizes[0] {
                for f in 0..sizes[1] {
                    for yy in 0..sizes[2] {
                        for xx in 0..sizes[3] {
                            let (py, px) = if spatial { (0, 0) } else { (yy, xx) };
                            let m = meanv.get(&[0, f, py, px]);
                            let inv = invv.get(&[0, f, py, px]);
                            let g = scalev.get(&[0, f]);
                            let bb = biasv.get(&[0, f]);
                            let v = xv.get(&[b, f, yy, xx]);
                            yv.set(&[b, f, yy, xx], (v - m) * inv * g + bb);
                        }
                    }
                }
            }
        });
        Ok(TaskGroup::new(vec![task], Schedule::Single))
    }
}

/// Copies elements, translating coordinates from the input format's indexer
/// to the output format's (§4.11).
pub struct ReorderForward;

impl KernelFactory for ReorderForward {
    fn name(&self) -> &'static str {
        "reorder.reference"
    }

    fn instantiate(&self, inputs: &[SharedBuffer], outputs: &[SharedBuffer], argument: &Argument) -> Result<TaskGroup> {
        match argument {
            Argument::Reorder => {}
            _ => return Err(bad_argument("reorder")),
        }
        let x = inputs[0].clone();
        let y = outputs[0].clone();
        let task = Task::new(move || {
            let xv = View::activation(x.clone());
            let yv = View::activation(y.clone());
            let sizes = yv.sizes().to_vec();
            for b in 0..sizes[0] {
                for f in 0..sizes[1] {
                    for yy in 0..sizes[2] {
                        for xx in 0..sizes[3] {
                            yv.set(&[b, f, yy, xx], xv.get(&[b, f, yy, xx]));
                        }
                    }
                }
            }
        });
        Ok(TaskGroup::new(vec![task], Schedule::Single))
    }
}

/// Copies each input's feature slice into the corresponding offset range of
/// the output's feature axis (§4.11).
pub struct DepthConcatenateForward;

impl KernelFactory for DepthConcatenateForward {
    fn name(&self) -> &'static str {
        "depth_concatenate.reference"
    }

    fn instantiate(&self, inputs: &[SharedBuffer], outputs: &[SharedBuffer], argument: &Argument) -> Result<TaskGroup> {
        match argument {
            Argument::DepthConcatenate => {}
            _ => return Err(bad_argument("depth_concatenate")),
        }
        let inputs = inputs.to_vec();
        let y = outputs[0].clone();
        let task = Task::new(move || {
            let yv = View::activation(y.clone());
            let osizes = yv.sizes().to_vec();
            let mut feature_offset = 0usize;
            for input in &inputs {
                let xv = View::activation(input.clone());
                let xsizes = xv.sizes().to_vec();
                for b in 0..xsizes[0] {
                    for f in 0..xsizes[1] {
                        for yy in 0..xsizes[2] {
                            for xx in 0..xsizes[3] {
                                yv.set(&[b, feature_offset + f, yy, xx], xv.get(&[b, f, yy, xx]));
                            }
                        }
                    }
                }
                feature_offset += xsizes[1];
            }
            let _ = osizes;
        });
        Ok(TaskGroup::new(vec![task], Schedule::Single))
    }
}

/// `y(b,o) = bias(o) + sum_i w(o,i)*x(b,i)` (§4.11).
pub struct FullyConnectedForward;

impl KernelFactory for FullyConnectedForward {
    fn name(&self) -> &'static str {
        "fully_connected.reference"
    }

    fn instantiate(&self, inputs: &[SharedBuffer], outputs: &[SharedBuffer], argument: &Argument) -> Result<TaskGroup> {
        match argument {
            Argument::FullyConnected => {}
            _ => return Err(bad_argument("fully_connected")),
        }
        let x = inputs[0].clone();
        let weight = inputs[1].clone();
        let bias = inputs[2].clone();
        let y = outputs[0].clone();
        let task = Task::new(move || {
            let xv = View::vector2(x.clone());
            let wv = View::fc_weight(weight.clone());
            let biasv = View::vector2(bias.clone());
            let yv = View::vector2(y.clone());
            let xsizes = xv.sizes().to_vec();
            let osizes = yv.sizes().to_vec();
            let (batch, in_features) = (xsizes[0], xsizes[1]);
            let out_features = osizes[1];
            for b in 0..batch {
                for o in 0..out_features {
                    let mut acc = biasv.get(&[0, o]);
                    for i in 0..in_features {
                        acc += wv.get(&[i, o]) * xv.get(&[b, i]);
                    }
                    yv.set(&[b, o], acc);
                }
            }
        });
        Ok(TaskGroup::new(vec![task], Schedule::Single))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nnx_core::format::{Format, Layout};
    use nnx_core::memory::MemoryBuffer;
    use nnx_core::primitive::{Padding, PrimitiveKind};
    use nnx_core::registry::EngineKind;
    use nnx_core::shape::Shape;
    use nnx_core::types::ElementType;

    fn act_buf(batch: usize, feature: usize, spatial: &[usize]) -> Arc<MemoryBuffer> {
        Arc::new(MemoryBuffer::allocate(Shape::new(batch, feature, spatial), Format::new(Layout::Bfyx, ElementType::F32), EngineKind::Cpu).unwrap())
    }

    fn vec_buf(batch: usize, feature: usize) -> Arc<MemoryBuffer> {
        Arc::new(MemoryBuffer::allocate(Shape::new(batch, feature, &[]), Format::new(Layout::Bx, ElementType::F32), EngineKind::Cpu).unwrap())
    }

    fn fill_activation(buf: &Arc<MemoryBuffer>, values: &[f32]) {
        let v = View::activation(buf.clone());
        let sizes = v.sizes().to_vec();
        let mut it = values.iter();
        for b in 0..sizes[0] {
            for f in 0..sizes[1] {
                for y in 0..sizes[2] {
                    for x in 0..sizes[3] {
                        v.set(&[b, f, y, x], *it.next().unwrap());
                    }
                }
            }
        }
    }

    fn read_activation(buf: &Arc<MemoryBuffer>) -> Vec<f32> {
        let v = View::activation(buf.clone());
        let sizes = v.sizes().to_vec();
        let mut out = Vec::new();
        for b in 0..sizes[0] {
            for f in 0..sizes[1] {
                for y in 0..sizes[2] {
                    for x in 0..sizes[3] {
                        out.push(v.get(&[b, f, y, x]));
                    }
                }
            }
        }
        out
    }

    // S1 — pooling 3x3 max, no pad.
    #[test]
    fn pooling_max_3x3_no_pad() {
        let x = act_buf(1, 1, &[3, 3]);
        fill_activation(&x, &[-0.5, 1.0, 0.5, 2.0, 1.5, -0.5, 0.0, -1.0, 0.5]);
        let y = act_buf(1, 1, &[1, 1]);
        let arg = Argument::Pooling { mode: PoolingMode::Max, window: vec![3, 3], stride: vec![1, 1], padding: Padding::Zero, input_offset: vec![0, 0] };
        let group = PoolingForward.instantiate(&[x], &[y.clone()], &arg).unwrap();
        group.tasks[0].execute();
        assert_eq!(read_activation(&y), vec![2.0]);
    }

    // S2 — pooling 2x2 max, no pad.
    #[test]
    fn pooling_max_2x2_no_pad() {
        let x = act_buf(1, 1, &[3, 3]);
        fill_activation(&x, &[-0.5, 1.0, 0.5, 2.0, 1.5, -0.5, 0.0, -1.0, 0.5]);
        let y = act_buf(1, 1, &[2, 2]);
        let arg = Argument::Pooling { mode: PoolingMode::Max, window: vec![2, 2], stride: vec![1, 1], padding: Padding::Zero, input_offset: vec![0, 0] };
        let group = PoolingForward.instantiate(&[x], &[y.clone()], &arg).unwrap();
        group.tasks[0].execute();
        assert_eq!(read_activation(&y), vec![2.0, 1.5, 2.0, 1.5]);
    }

    // S3 — pooling 2x2 max with zero pad 1.
    #[test]
    fn pooling_max_2x2_zero_pad() {
        let x = act_buf(1, 1, &[2, 2]);
        fill_activation(&x, &[-0.5, 0.5, 1.0, -1.0]);
        let y = act_buf(1, 1, &[2, 2]);
        let arg = Argument::Pooling { mode: PoolingMode::Max, window: vec![2, 2], stride: vec![2, 2], padding: Padding::Zero, input_offset: vec![-1, -1] };
        let group = PoolingForward.instantiate(&[x], &[y.clone()], &arg).unwrap();
        group.tasks[0].execute();
        assert_eq!(read_activation(&y), vec![0.0, 0.5, 1.0, 0.0]);
    }

    // Property 7: pooling with window=stride=1 is the identity.
    #[test]
    fn pooling_identity_at_window_one() {
        let x = act_buf(1, 1, &[2, 2]);
        fill_activation(&x, &[1.0, -2.0, 3.0, 4.0]);
        let y = act_buf(1, 1, &[2, 2]);
        let arg = Argument::Pooling { mode: PoolingMode::Max, window: vec![1, 1], stride: vec![1, 1], padding: Padding::Zero, input_offset: vec![0, 0] };
        let group = PoolingForward.instantiate(&[x.clone()], &[y.clone()], &arg).unwrap();
        group.tasks[0].execute();
        assert_eq!(read_activation(&y), read_activation(&x));
    }

    // S4 — softmax with equal inputs.
    #[test]
    fn softmax_equal_inputs() {
        let x = vec_buf(2, 10);
        {
            let v = View::vector2(x.clone());
            for b in 0..2 {
                for i in 0..10 {
                    v.set(&[b, i], 1.0);
                }
            }
        }
        let y = vec_buf(2, 10);
        let group = SoftmaxForward.instantiate(&[x], &[y.clone()], &Argument::Softmax).unwrap();
        group.tasks[0].execute();
        let out = View::vector2(y);
        for b in 0..2 {
            for i in 0..10 {
                assert!((out.get(&[b, i]) - 0.1).abs() < 1e-6);
            }
        }
    }

    // Property 5: softmax sums to 1 and is in (0, 1].
    #[test]
    fn softmax_normalizes_per_batch() {
        let x = vec_buf(2, 4);
        {
            let v = View::vector2(x.clone());
            let vals = [1.0, 2.0, 3.0, 4.0, -1.0, 0.0, 1.0, 2.0];
            let mut it = vals.iter();
            for b in 0..2 {
                for i in 0..4 {
                    v.set(&[b, i], *it.next().unwrap());
                }
            }
        }
        let y = vec_buf(2, 4);
        let group = SoftmaxForward.instantiate(&[x], &[y.clone()], &Argument::Softmax).unwrap();
        group.tasks[0].execute();
        let out = View::vector2(y);
        for b in 0..2 {
            let mut sum = 0.0;
            for i in 0..4 {
                let v = out.get(&[b, i]);
                assert!(v > 0.0 && v <= 1.0);
                sum += v;
            }
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }

    // Property 6: LRN with alpha=0, k=1 is the identity.
    #[test]
    fn lrn_identity_at_alpha_zero() {
        let x = act_buf(1, 4, &[1, 1]);
        fill_activation(&x, &[1.0, 2.0, 3.0, 4.0]);
        let y = act_buf(1, 4, &[1, 1]);
        let arg = Argument::Response { size: 3, k: 1.0, alpha: 0.0, beta: 0.75 };
        let group = ResponseForward.instantiate(&[x.clone()], &[y.clone()], &arg).unwrap();
        group.tasks[0].execute();
        assert_eq!(read_activation(&y), read_activation(&x));
    }

    // S6 — LRN reference vector (k=1, alpha=1, beta=0.75, n=3, 7 features).
    #[test]
    fn lrn_matches_tabulated_vector() {
        let input = [1.0f32, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0];
        let x = act_buf(1, 7, &[1, 1]);
        fill_activation(&x, &input);
        let y = act_buf(1, 7, &[1, 1]);
        let arg = Argument::Response { size: 3, k: 1.0, alpha: 1.0, beta: 0.75 };
        let group = ResponseForward.instantiate(&[x], &[y.clone()], &arg).unwrap();
        group.tasks[0].execute();
        let out = read_activation(&y);

        let mut expected = Vec::with_capacity(7);
        for f in 0..7 {
            let lo = f.saturating_sub(1);
            let hi = (f + 1).min(6);
            let sum_sq: f32 = input[lo..=hi].iter().map(|v| v * v).sum();
            expected.push(input[f] * (1.0 + sum_sq).powf(-0.75));
        }
        for (a, b) in out.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }

    #[test]
    fn relu_forward_applies_slope_to_negatives() {
        let x = act_buf(1, 1, &[1, 2]);
        fill_activation(&x, &[-2.0, 3.0]);
        let y = act_buf(1, 1, &[1, 2]);
        let arg = Argument::Relu { slope: 0.1 };
        let group = ReluForward.instantiate(&[x], &[y.clone()], &arg).unwrap();
        group.tasks[0].execute();
        let out = read_activation(&y);
        assert!((out[0] - (-0.2)).abs() < 1e-6);
        assert!((out[1] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn relu_backward_gates_on_forward_sign() {
        let x_fwd = act_buf(1, 1, &[1, 2]);
        fill_activation(&x_fwd, &[-1.0, 2.0]);
        let d_y = act_buf(1, 1, &[1, 2]);
        fill_activation(&d_y, &[5.0, 5.0]);
        let d_x = act_buf(1, 1, &[1, 2]);
        let arg = Argument::ReluBackward { slope: 0.0 };
        let group = ReluBackward.instantiate(&[x_fwd, d_y], &[d_x.clone()], &arg).unwrap();
        group.tasks[0].execute();
        assert_eq!(read_activation(&d_x), vec![0.0, 5.0]);
    }

    // Property 8: batch-norm inference with mean=0, inv_std=1, scale=1, bias=0 is the identity.
    #[test]
    fn batch_inference_identity_at_neutral_params() {
        let x = act_buf(2, 1, &[1, 2]);
        fill_activation(&x, &[1.0, -2.0, 3.0, 4.0]);
        let scale = vec_buf(1, 1);
        View::vector2(scale.clone()).set(&[0, 0], 1.0);
        let bias = vec_buf(1, 1);
        View::vector2(bias.clone()).set(&[0, 0], 0.0);
        let mean = act_buf(1, 1, &[1, 1]);
        View::activation(mean.clone()).set(&[0, 0, 0, 0], 0.0);
        let inv_std = act_buf(1, 1, &[1, 1]);
        View::activation(inv_std.clone()).set(&[0, 0, 0, 0], 1.0);
        let y = act_buf(2, 1, &[1, 2]);
        let arg = Argument::BatchInference { spatial: true, epsilon: 1e-5 };
        let group = BatchInference.instantiate(&[x.clone(), scale, bias, mean, inv_std], &[y.clone()], &arg).unwrap();
        group.tasks[0].execute();
        assert_eq!(read_activation(&y), read_activation(&x));
    }

    // Property 2: reorder(F1 -> F2) followed by reorder(F2 -> F1) is the
    // identity on tensor contents.
    #[test]
    fn reorder_round_trip_is_identity() {
        let bfyx = Arc::new(MemoryBuffer::allocate(Shape::new(2, 3, &[2, 2]), Format::new(Layout::Bfyx, ElementType::F32), EngineKind::Cpu).unwrap());
        let values: Vec<f32> = (0..2 * 3 * 2 * 2).map(|i| i as f32).collect();
        fill_activation(&bfyx, &values);

        let byxf = Arc::new(MemoryBuffer::allocate(Shape::new(2, 3, &[2, 2]), Format::new(Layout::Byxf, ElementType::F32), EngineKind::Cpu).unwrap());
        let to_byxf = ReorderForward.instantiate(&[bfyx.clone()], &[byxf.clone()], &Argument::Reorder).unwrap();
        to_byxf.tasks[0].execute();

        let back_to_bfyx = act_buf(2, 3, &[2, 2]);
        let to_bfyx = ReorderForward.instantiate(&[byxf], &[back_to_bfyx.clone()], &Argument::Reorder).unwrap();
        to_bfyx.tasks[0].execute();

        assert_eq!(read_activation(&back_to_bfyx), values);
    }

    #[test]
    fn depth_concatenate_copies_feature_slices_in_order() {
        let a = act_buf(1, 1, &[1, 1]);
        View::activation(a.clone()).set(&[0, 0, 0, 0], 1.0);
        let b = act_buf(1, 2, &[1, 1]);
        {
            let v = View::activation(b.clone());
            v.set(&[0, 0, 0, 0], 2.0);
            v.set(&[0, 1, 0, 0], 3.0);
        }
        let out = act_buf(1, 3, &[1, 1]);
        let group = DepthConcatenateForward.instantiate(&[a, b], &[out.clone()], &Argument::DepthConcatenate).unwrap();
        group.tasks[0].execute();
        assert_eq!(read_activation(&out), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn fully_connected_matches_matrix_vector_product() {
        // x: batch=1, in=2; weight (oi layout, [i,o]): 2 in x 3 out.
        let x = vec_buf(1, 2);
        {
            let v = View::vector2(x.clone());
            v.set(&[0, 0], 1.0);
            v.set(&[0, 1], 2.0);
        }
        let weight = Arc::new(MemoryBuffer::allocate(Shape::new(2, 3, &[]), Format::new(Layout::Oi, ElementType::F32), EngineKind::Cpu).unwrap());
        {
            let v = View::fc_weight(weight.clone());
            // w(o,i): o0=[1,1], o1=[0,1], o2=[2,0]
            v.set(&[0, 0], 1.0);
            v.set(&[1, 0], 1.0);
            v.set(&[0, 1], 0.0);
            v.set(&[1, 1], 1.0);
            v.set(&[0, 2], 2.0);
            v.set(&[1, 2], 0.0);
        }
        let bias = vec_buf(1, 3);
        {
            let v = View::vector2(bias.clone());
            v.set(&[0, 0], 0.0);
            v.set(&[0, 1], 1.0);
            v.set(&[0, 2], 0.0);
        }
        let y = vec_buf(1, 3);
        let group = FullyConnectedForward.instantiate(&[x, weight, bias], &[y.clone()], &Argument::FullyConnected).unwrap();
        group.tasks[0].execute();
        let out = View::vector2(y);
        assert!((out.get(&[0, 0]) - 3.0).abs() < 1e-6); // 1*1+2*1
        assert!((out.get(&[0, 1]) - 3.0).abs() < 1e-6); // 1*0+2*1+1
        assert!((out.get(&[0, 2]) - 2.0).abs() < 1e-6); // 1*2+2*0
    }

    #[test]
    fn convolution_backward_is_not_implemented() {
        let weight = Arc::new(MemoryBuffer::allocate(Shape::new(1, 1, &[1, 1]), Format::new(Layout::Oiyx, ElementType::F32), EngineKind::Cpu).unwrap());
        let x = act_buf(1, 1, &[1, 1]);
        let bias = vec_buf(1, 1);
        let d_y = act_buf(1, 1, &[1, 1]);
        let d_x = act_buf(1, 1, &[1, 1]);
        let d_w = Arc::new(MemoryBuffer::allocate(Shape::new(1, 1, &[1, 1]), Format::new(Layout::Oiyx, ElementType::F32), EngineKind::Cpu).unwrap());
        let d_b = vec_buf(1, 1);
        let result = ConvolutionBackward.instantiate(&[d_y, x, weight, bias], &[d_x, d_w, d_b], &Argument::ConvolutionBackward);
        assert!(matches!(result, Err(Error::NotImplemented { .. })));
        let _ = PrimitiveKind::ConvolutionBackward;
    }

    /// Exercises the `d_input` helper directly: a 1x1x2x2 input, a single
    /// 1x1x1x1 unit-weight output-feature convolved with stride 1, so
    /// `d_input` should equal `d_output` scattered back to its source pixel.
    #[test]
    fn convolution_backward_dinput_scatters_through_unit_kernel() {
        let d_output = act_buf(1, 1, &[2, 2]);
        fill_activation(&d_output, &[1.0, 2.0, 3.0, 4.0]);
        let weight = Arc::new(MemoryBuffer::allocate(Shape::new(1, 1, &[1, 1]), Format::new(Layout::Oiyx, ElementType::F32), EngineKind::Cpu).unwrap());
        View::conv_weight(weight.clone()).set(&[0, 0, 0, 0], 1.0);
        let d_input = act_buf(1, 1, &[2, 2]);

        let dov = View::activation(d_output.clone());
        let wv = View::conv_weight(weight.clone());
        let div = View::activation(d_input.clone());
        convolution_backward_dinput(&dov, &wv, &div, &[1, 1], &[0, 0], 1);
        assert_eq!(read_activation(&d_input), read_activation(&d_output));
    }
}
