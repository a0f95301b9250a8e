//! Convolution Layer
//!
//! Slides `F` kernels of shape `(C, Hk, Wk)` over a zero-padded input and
//! sums across all input channels at every position.
//!
//! ## Shapes
//!
//! ```text
//! Input:  x [N, C, Hi, Wi]
//! Weight: W [F, C, Hk, Wk]
//! Bias:   b [F, 1, 1, 1]
//! Output: y [N, F, Ho, Wo]
//!
//! Ho = (Hi + 2P - Hk) / S + 1
//! Wo = (Wi + 2P - Wk) / S + 1
//! ```
//!
//! ## Forward Pass
//!
//! ```text
//! xp = pad(x, P)
//! y[n, f, i, j] = sum(xp[n, :, i*S .. i*S+Hk, j*S .. j*S+Wk] * W[f]) + b[f]
//! ```
//!
//! A direct sliding-window reduction, no im2col. Because samples are stored
//! channel-last, each kernel row `(Wk, C)` is one contiguous slice of the
//! padded input, so the innermost loop is a plain dot product.
//!
//! ## Backward Pass
//!
//! For every upstream scalar `g = dy[n, f, i, j]`:
//!
//! ```text
//! dxp[n, window] += g * W[f]          (cropped by P at the end)
//! dW[f]          += g * window / N
//! db[f]          += g / N
//! ```
//!
//! Weight and bias gradients are batch means, not sums.
//!
//! ## Implementation Notes
//!
//! - Samples are processed in parallel via Rayon; each sample produces its own
//!   partial `dW`/`db`, which are summed in sample order so the result does not
//!   depend on the thread count.
//! - The cache keeps the padded input so backward does not pad again.

use super::{LayerGradients, WeightInit};
use crate::error::{NetError, Result};
use crate::params::ParamView;
use crate::tensor::{Blob, Fill, Shape};
use rand::Rng;
use rayon::prelude::*;

/// Convolution hyperparameters
#[derive(Clone, Debug, PartialEq)]
pub struct ConvLayer {
    pub kernels: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub pad: usize,
    pub stride: usize,
    pub init: WeightInit,
}

/// Cache for convolution backward pass
#[derive(Clone, Debug)]
pub struct ConvCache {
    pub padded_input: Blob,
}

/// Output spatial extent of a sliding window, or `None` if it does not fit
pub(crate) fn window_extent(input: usize, kernel: usize, stride: usize) -> Option<usize> {
    if stride == 0 || kernel == 0 || kernel > input {
        return None;
    }
    Some((input - kernel) / stride + 1)
}

impl ConvLayer {
    pub fn new(kernels: usize, kernel_h: usize, kernel_w: usize, pad: usize, stride: usize) -> Self {
        Self {
            kernels,
            kernel_h,
            kernel_w,
            pad,
            stride,
            init: WeightInit::default(),
        }
    }

    pub fn with_init(mut self, init: WeightInit) -> Self {
        self.init = init;
        self
    }

    /// Output shape for an input of shape `input`
    pub fn output_shape(&self, input: Shape) -> Result<Shape> {
        self.geometry(input, self.kernels, self.kernel_h, self.kernel_w)
    }

    fn geometry(&self, input: Shape, f: usize, hk: usize, wk: usize) -> Result<Shape> {
        let hp = input.h + 2 * self.pad;
        let wp = input.w + 2 * self.pad;
        match (
            window_extent(hp, hk, self.stride),
            window_extent(wp, wk, self.stride),
        ) {
            (Some(ho), Some(wo)) => Ok(Shape::new(input.n, f, ho, wo)),
            _ => Err(NetError::InvalidConfig(format!(
                "convolution kernel {}x{} (pad {}, stride {}) does not fit input {}",
                hk, wk, self.pad, self.stride, input
            ))),
        }
    }

    /// Fresh weight `(F, C, Hk, Wk)` and bias `(F, 1, 1, 1)`
    pub fn init_params<R: Rng + ?Sized>(&self, input: Shape, rng: &mut R) -> (Blob, Blob) {
        let w_shape = Shape::new(self.kernels, input.c, self.kernel_h, self.kernel_w);
        let weight = Blob::new(w_shape, Fill::RandomNormal, rng)
            .mul_scalar(self.init.scale(w_shape.sample_len()));
        let bias = Blob::new(Shape::new(self.kernels, 1, 1, 1), Fill::RandomNormal, rng)
            .mul_scalar(WeightInit::GAUSSIAN_SCALE);
        (weight, bias)
    }

    /// Forward pass
    ///
    /// Kernel count and extent are read from the weight blob.
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if the input channel count differs from the kernel's.
    pub fn forward(&self, x: &Blob, params: ParamView<'_>) -> Result<(Blob, ConvCache)> {
        let xs = x.shape();
        let ws = params.weight.shape();
        if xs.c != ws.c {
            return Err(NetError::shape("conv input channels", xs, ws));
        }
        let out_shape = self.geometry(xs, ws.n, ws.h, ws.w)?;
        let padded = x.pad(self.pad);
        let ps = padded.shape();

        let stride = self.stride;
        let row = ws.w * ws.c;
        let bias = params.bias.data();
        let mut out = Blob::zeros(out_shape);

        out.data_mut()
            .par_chunks_mut(out_shape.sample_len().max(1))
            .enumerate()
            .for_each(|(n, y)| {
                let xp = padded.sample(n);
                for oh in 0..out_shape.h {
                    for ow in 0..out_shape.w {
                        for f in 0..ws.n {
                            let kernel = params.weight.sample(f);
                            let mut acc = 0.0;
                            for kh in 0..ws.h {
                                let xo = ps.sample_offset(0, oh * stride + kh, ow * stride);
                                let ko = kh * row;
                                acc += xp[xo..xo + row]
                                    .iter()
                                    .zip(&kernel[ko..ko + row])
                                    .map(|(a, b)| a * b)
                                    .sum::<f64>();
                            }
                            y[out_shape.sample_offset(f, oh, ow)] = acc + bias[f];
                        }
                    }
                }
            });

        Ok((
            out,
            ConvCache {
                padded_input: padded,
            },
        ))
    }

    /// Backward pass
    ///
    /// # Arguments
    ///
    /// * `grad_out` - Upstream gradient, same shape as the forward output
    /// * `cache` - Padded input from the forward pass
    /// * `params` - The weights used in the forward pass
    pub fn backward(
        &self,
        grad_out: &Blob,
        cache: &ConvCache,
        params: ParamView<'_>,
    ) -> Result<LayerGradients> {
        let ps = cache.padded_input.shape();
        let ws = params.weight.shape();
        let gs = grad_out.shape();

        let expected = {
            let ho = window_extent(ps.h, ws.h, self.stride);
            let wo = window_extent(ps.w, ws.w, self.stride);
            Shape::new(ps.n, ws.n, ho.unwrap_or(0), wo.unwrap_or(0))
        };
        if gs != expected {
            return Err(NetError::shape("conv backward", gs, expected));
        }

        let stride = self.stride;
        let row = ws.w * ws.c;
        let klen = ws.sample_len();

        // Per-sample partials: (d padded input, dW, db)
        let partials: Vec<(Vec<f64>, Vec<f64>, Vec<f64>)> = (0..ps.n)
            .into_par_iter()
            .map(|n| {
                let xp = cache.padded_input.sample(n);
                let g = grad_out.sample(n);
                let mut dxp = vec![0.0; ps.sample_len()];
                let mut dw = vec![0.0; ws.len()];
                let mut db = vec![0.0; ws.n];

                for oh in 0..gs.h {
                    for ow in 0..gs.w {
                        for f in 0..ws.n {
                            let gv = g[gs.sample_offset(f, oh, ow)];
                            let kernel = params.weight.sample(f);
                            for kh in 0..ws.h {
                                let xo = ps.sample_offset(0, oh * stride + kh, ow * stride);
                                let ko = kh * row;
                                for i in 0..row {
                                    dxp[xo + i] += gv * kernel[ko + i];
                                    dw[f * klen + ko + i] += gv * xp[xo + i];
                                }
                            }
                            db[f] += gv;
                        }
                    }
                }
                (dxp, dw, db)
            })
            .collect();

        let batch = ps.n.max(1) as f64;
        let mut dxp_data = Vec::with_capacity(ps.len());
        let mut dw = vec![0.0; ws.len()];
        let mut db = vec![0.0; ws.n];
        for (dxp_n, dw_n, db_n) in partials {
            dxp_data.extend_from_slice(&dxp_n);
            dw.iter_mut().zip(&dw_n).for_each(|(a, b)| *a += b);
            db.iter_mut().zip(&db_n).for_each(|(a, b)| *a += b);
        }
        dw.iter_mut().for_each(|v| *v /= batch);
        db.iter_mut().for_each(|v| *v /= batch);

        let input = Blob::from_vec(ps, dxp_data)?.unpad(self.pad)?;
        Ok(LayerGradients {
            input,
            weight: Some(Blob::from_vec(ws, dw)?),
            bias: Some(Blob::from_vec(params.bias.shape(), db)?),
        })
    }
}
