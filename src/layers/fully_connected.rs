//! Fully Connected Layer
//!
//! Every output unit sees the whole input sample. The weight of unit `f` is
//! a blob sample with exactly the input's `(C, H, W)`, so the forward pass is
//! an inner product over the flattened sample.
//!
//! ## Forward Pass
//!
//! ```text
//! Input:  x [N, C, H, W]
//! Weight: W [F, C, H, W]
//! Bias:   b [F, 1, 1, 1]
//! Output: y [N, F, 1, 1]
//!
//! y[n, f] = <x[n], W[f]> + b[f]
//! ```
//!
//! ## Backward Pass
//!
//! ```text
//! dx[n] = sum_f dy[n, f] * W[f]
//! dW[f] = sum_n dy[n, f] * x[n] / N
//! db[f] = sum_n dy[n, f] / N
//! ```
//!
//! ## Implementation Notes
//!
//! - Weights use the configured init scheme, bias starts at zero
//! - Caches the input for the backward pass

use super::{LayerGradients, WeightInit};
use crate::error::{NetError, Result};
use crate::params::ParamView;
use crate::tensor::{Blob, Fill, Shape};
use rand::Rng;
use rayon::prelude::*;

/// Fully connected layer with `units` outputs
#[derive(Clone, Debug, PartialEq)]
pub struct FullyConnectedLayer {
    pub units: usize,
    pub init: WeightInit,
}

/// Cache for fully connected backward pass
#[derive(Clone, Debug)]
pub struct FullyConnectedCache {
    pub input: Blob,
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl FullyConnectedLayer {
    pub fn new(units: usize) -> Self {
        Self {
            units,
            init: WeightInit::default(),
        }
    }

    pub fn with_init(mut self, init: WeightInit) -> Self {
        self.init = init;
        self
    }

    pub fn output_shape(&self, input: Shape) -> Result<Shape> {
        if self.units == 0 {
            return Err(NetError::InvalidConfig(
                "fully connected layer needs at least one unit".to_string(),
            ));
        }
        Ok(Shape::new(input.n, self.units, 1, 1))
    }

    /// Fresh weight `(F, C, H, W)` and zero bias `(F, 1, 1, 1)`
    pub fn init_params<R: Rng + ?Sized>(&self, input: Shape, rng: &mut R) -> (Blob, Blob) {
        let w_shape = Shape::new(self.units, input.c, input.h, input.w);
        let weight = Blob::new(w_shape, Fill::RandomNormal, rng)
            .mul_scalar(self.init.scale(w_shape.sample_len()));
        let bias = Blob::zeros(Shape::new(self.units, 1, 1, 1));
        (weight, bias)
    }

    /// Forward pass
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` unless the input sample has exactly the weight's `(C, H, W)`.
    pub fn forward(&self, x: &Blob, params: ParamView<'_>) -> Result<(Blob, FullyConnectedCache)> {
        let xs = x.shape();
        let ws = params.weight.shape();
        if (xs.c, xs.h, xs.w) != (ws.c, ws.h, ws.w) {
            return Err(NetError::shape("fully connected input", xs, ws));
        }

        let units = ws.n;
        let out_shape = Shape::new(xs.n, units, 1, 1);
        let bias = params.bias.data();
        let mut out = Blob::zeros(out_shape);

        out.data_mut()
            .par_chunks_mut(units.max(1))
            .enumerate()
            .for_each(|(n, y)| {
                let xn = x.sample(n);
                for (f, yf) in y.iter_mut().enumerate() {
                    *yf = dot(xn, params.weight.sample(f)) + bias[f];
                }
            });

        Ok((out, FullyConnectedCache { input: x.clone() }))
    }

    /// Backward pass
    pub fn backward(
        &self,
        grad_out: &Blob,
        cache: &FullyConnectedCache,
        params: ParamView<'_>,
    ) -> Result<LayerGradients> {
        let xs = cache.input.shape();
        let ws = params.weight.shape();
        let expected = Shape::new(xs.n, ws.n, 1, 1);
        if grad_out.shape() != expected {
            return Err(NetError::shape("fully connected backward", grad_out.shape(), expected));
        }

        let mut dx = Blob::zeros(xs);
        dx.data_mut()
            .par_chunks_mut(xs.sample_len().max(1))
            .enumerate()
            .for_each(|(n, dxn)| {
                for (f, &g) in grad_out.sample(n).iter().enumerate() {
                    for (d, &w) in dxn.iter_mut().zip(params.weight.sample(f)) {
                        *d += g * w;
                    }
                }
            });

        // Rows of dW are independent; sum over the batch inside each row
        let batch = xs.n.max(1) as f64;
        let mut dw = Blob::zeros(ws);
        dw.data_mut()
            .par_chunks_mut(ws.sample_len().max(1))
            .enumerate()
            .for_each(|(f, dwf)| {
                for n in 0..xs.n {
                    let g = grad_out.sample(n)[f];
                    for (d, &x) in dwf.iter_mut().zip(cache.input.sample(n)) {
                        *d += g * x;
                    }
                }
                dwf.iter_mut().for_each(|d| *d /= batch);
            });

        let mut db = Blob::zeros(params.bias.shape());
        for n in 0..xs.n {
            for (f, &g) in grad_out.sample(n).iter().enumerate() {
                db.data_mut()[f] += g;
            }
        }
        let db = db.div_scalar(batch);

        Ok(LayerGradients {
            input: dx,
            weight: Some(dw),
            bias: Some(db),
        })
    }
}
