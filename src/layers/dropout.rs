//! Dropout Layer
//!
//! Dropout randomly zeros activations during training to prevent
//! overfitting. Kept values are scaled by `1 / (1 - rate)` (inverted dropout)
//! so evaluation can pass values through unchanged.

use super::{LayerGradients, Mode};
use crate::error::{NetError, Result};
use crate::tensor::Blob;
use rand::Rng;

/// Dropout with drop probability `rate`
#[derive(Clone, Debug, PartialEq)]
pub struct DropoutLayer {
    pub rate: f64,
}

/// Mask kept for the backward pass
#[derive(Clone, Debug)]
pub struct DropoutCache {
    /// `1 / (1 - rate)` where a value was kept, `0` where it was dropped;
    /// `None` when the layer passed its input through
    pub mask: Option<Blob>,
}

impl DropoutLayer {
    /// # Errors
    ///
    /// `InvalidConfig` unless `0.0 <= rate <= 1.0`.
    pub fn new(rate: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(NetError::InvalidConfig(format!(
                "drop rate must be within [0, 1], got {}",
                rate
            )));
        }
        Ok(Self { rate })
    }

    /// Forward pass
    ///
    /// In [`Mode::Eval`], or with a zero rate, the input passes through and
    /// the cache carries no mask. A rate of 1 drops every value.
    pub fn forward<R: Rng + ?Sized>(
        &self,
        x: &Blob,
        mode: Mode,
        rng: &mut R,
    ) -> Result<(Blob, DropoutCache)> {
        if mode == Mode::Eval || self.rate == 0.0 {
            return Ok((x.clone(), DropoutCache { mask: None }));
        }

        let mut mask = Blob::zeros(x.shape());
        if self.rate < 1.0 {
            let keep = 1.0 / (1.0 - self.rate);
            for m in mask.data_mut() {
                if rng.random::<f64>() >= self.rate {
                    *m = keep;
                }
            }
        }
        let y = x.mul(&mask)?;
        Ok((y, DropoutCache { mask: Some(mask) }))
    }

    pub fn backward(&self, grad_out: &Blob, cache: &DropoutCache) -> Result<LayerGradients> {
        let input = match &cache.mask {
            Some(mask) => grad_out.mul(mask)?,
            None => grad_out.clone(),
        };
        Ok(LayerGradients {
            input,
            weight: None,
            bias: None,
        })
    }
}
