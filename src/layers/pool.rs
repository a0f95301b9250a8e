//! Max Pooling Layer
//!
//! Downsamples each channel independently by taking the maximum of every
//! `Hk x Wk` window. No padding, no learnable parameters.
//!
//! ```text
//! Ho = (Hi - Hk) / S + 1
//! Wo = (Wi - Wk) / S + 1
//! ```
//!
//! ## Backward Pass and Ties
//!
//! The upstream gradient of an output cell is routed to **every** input cell
//! of its window that equals the window maximum. Two tied maxima each receive
//! the full gradient. When `S < Hk` windows overlap, and contributions from
//! different windows add up in the same input cell.

use super::conv::window_extent;
use super::LayerGradients;
use crate::error::{NetError, Result};
use crate::tensor::{Blob, Shape};
use rayon::prelude::*;

/// Max-pooling hyperparameters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolLayer {
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride: usize,
}

/// Cache for pooling backward pass
#[derive(Clone, Debug)]
pub struct PoolCache {
    pub input: Blob,
}

impl PoolLayer {
    pub fn new(kernel_h: usize, kernel_w: usize, stride: usize) -> Self {
        Self {
            kernel_h,
            kernel_w,
            stride,
        }
    }

    pub fn output_shape(&self, input: Shape) -> Result<Shape> {
        match (
            window_extent(input.h, self.kernel_h, self.stride),
            window_extent(input.w, self.kernel_w, self.stride),
        ) {
            (Some(ho), Some(wo)) => Ok(Shape::new(input.n, input.c, ho, wo)),
            _ => Err(NetError::InvalidConfig(format!(
                "pooling window {}x{} (stride {}) does not fit input {}",
                self.kernel_h, self.kernel_w, self.stride, input
            ))),
        }
    }

    fn window_max(&self, x: &[f64], xs: Shape, c: usize, oh: usize, ow: usize) -> f64 {
        let mut max = f64::NEG_INFINITY;
        for kh in 0..self.kernel_h {
            for kw in 0..self.kernel_w {
                let v = x[xs.sample_offset(c, oh * self.stride + kh, ow * self.stride + kw)];
                max = max.max(v);
            }
        }
        max
    }

    pub fn forward(&self, x: &Blob) -> Result<(Blob, PoolCache)> {
        let xs = x.shape();
        let out_shape = self.output_shape(xs)?;
        let mut out = Blob::zeros(out_shape);

        out.data_mut()
            .par_chunks_mut(out_shape.sample_len().max(1))
            .enumerate()
            .for_each(|(n, y)| {
                let xn = x.sample(n);
                for oh in 0..out_shape.h {
                    for ow in 0..out_shape.w {
                        for c in 0..out_shape.c {
                            y[out_shape.sample_offset(c, oh, ow)] =
                                self.window_max(xn, xs, c, oh, ow);
                        }
                    }
                }
            });

        Ok((out, PoolCache { input: x.clone() }))
    }

    pub fn backward(&self, grad_out: &Blob, cache: &PoolCache) -> Result<LayerGradients> {
        let xs = cache.input.shape();
        let expected = self.output_shape(xs)?;
        let gs = grad_out.shape();
        if gs != expected {
            return Err(NetError::shape("pool backward", gs, expected));
        }

        let mut dx = Blob::zeros(xs);
        dx.data_mut()
            .par_chunks_mut(xs.sample_len().max(1))
            .enumerate()
            .for_each(|(n, dxn)| {
                let xn = cache.input.sample(n);
                let g = grad_out.sample(n);
                for oh in 0..gs.h {
                    for ow in 0..gs.w {
                        for c in 0..gs.c {
                            let max = self.window_max(xn, xs, c, oh, ow);
                            let gv = g[gs.sample_offset(c, oh, ow)];
                            for kh in 0..self.kernel_h {
                                for kw in 0..self.kernel_w {
                                    let idx = xs.sample_offset(
                                        c,
                                        oh * self.stride + kh,
                                        ow * self.stride + kw,
                                    );
                                    if xn[idx] == max {
                                        dxn[idx] += gv;
                                    }
                                }
                            }
                        }
                    }
                }
            });

        Ok(LayerGradients {
            input: dx,
            weight: None,
            bias: None,
        })
    }
}
