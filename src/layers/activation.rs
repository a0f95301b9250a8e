//! ReLU Activation
//!
//! ```text
//! forward:  y  = max(0, x)
//! backward: dx = dy * [x > 0]
//! ```
//!
//! The mask is built from the cached **forward input**, and the boundary is
//! strict: an input of exactly `0.0` passes no gradient.

use super::LayerGradients;
use crate::error::{NetError, Result};
use crate::tensor::Blob;
use rayon::prelude::*;

/// Rectified linear unit (no parameters)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReluLayer;

/// Cache for ReLU backward pass
#[derive(Clone, Debug)]
pub struct ReluCache {
    pub input: Blob,
}

impl ReluLayer {
    /// Forward pass; the input is kept unmodified in the cache
    pub fn forward(&self, x: &Blob) -> (Blob, ReluCache) {
        (x.max_with(0.0), ReluCache { input: x.clone() })
    }

    pub fn backward(&self, grad_out: &Blob, cache: &ReluCache) -> Result<LayerGradients> {
        let input = &cache.input;
        if grad_out.shape() != input.shape() {
            return Err(NetError::shape("relu backward", grad_out.shape(), input.shape()));
        }
        let mut dx = grad_out.clone();
        dx.data_mut()
            .par_iter_mut()
            .zip(input.data())
            .for_each(|(g, &x)| {
                if x <= 0.0 {
                    *g = 0.0;
                }
            });
        Ok(LayerGradients {
            input: dx,
            weight: None,
            bias: None,
        })
    }
}
