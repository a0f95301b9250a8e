//! Gradient Store and Regularization
//!
//! The backward pass produces one weight and one bias gradient per learnable
//! layer. They are collected in a [`GradientStore`] keyed exactly like the
//! parameter store, so the optimizer can walk both side by side.
//!
//! ## L2 Regularization
//!
//! With coefficient λ and batch size N, applied to weights only (never biases):
//!
//! ```text
//! dW   += λ * W / N
//! loss += λ * Σ W² / (2N)
//! ```
//!
//! ## Gradient Norm
//!
//! ```text
//! norm = √(Σ g²)
//! ```
//!
//! Reported at debug level for monitoring; the engine does not clip.

use crate::error::{NetError, Result};
use crate::params::{ParamKey, ParamSlot, ParamStore};
use crate::tensor::Blob;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Parameter gradients of one backward pass
#[derive(Clone, Debug, Default)]
pub struct GradientStore {
    entries: BTreeMap<ParamKey, Blob>,
}

impl GradientStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, layer: &str, slot: ParamSlot, grad: Blob) {
        self.entries.insert(ParamKey::new(layer, slot), grad);
    }

    pub fn get(&self, layer: &str, slot: ParamSlot) -> Option<&Blob> {
        self.entries.get(&ParamKey::new(layer, slot))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParamKey, &Blob)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add `λ * W / N` to every weight gradient
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if a weight gradient has no matching parameter,
    /// `ShapeMismatch` if their shapes differ.
    pub fn add_l2(&mut self, params: &ParamStore, coefficient: f64, batch: usize) -> Result<()> {
        if coefficient == 0.0 {
            return Ok(());
        }
        let scale = coefficient / batch.max(1) as f64;
        for (key, grad) in self
            .entries
            .iter_mut()
            .filter(|(k, _)| k.slot == ParamSlot::Weight)
        {
            let weight = params.value(&key.layer, key.slot).ok_or_else(|| {
                NetError::InvalidConfig(format!("no weight stored for layer '{}'", key.layer))
            })?;
            grad.add_scaled_assign(weight, scale)?;
        }
        Ok(())
    }
}

/// `λ * Σ W² / (2N)` over every weight in the store
pub fn l2_loss(params: &ParamStore, coefficient: f64, batch: usize) -> f64 {
    if coefficient == 0.0 {
        return 0.0;
    }
    let squares: f64 = params
        .iter()
        .filter(|(k, _)| k.slot == ParamSlot::Weight)
        .map(|(_, p)| p.value.sum_squares())
        .sum();
    coefficient * squares / (2.0 * batch.max(1) as f64)
}

/// L2 norm over all gradients
pub fn compute_grad_norm(grads: &GradientStore) -> f64 {
    let total: f64 = grads
        .entries
        .values()
        .map(|g| g.data().par_iter().map(|&v| v * v).sum::<f64>())
        .sum();
    total.sqrt()
}
