//! Terminal Loss Layers
//!
//! A loss layer closes the pipeline: it compares the logits of the last
//! hidden layer with one-hot labels of identical shape and returns the batch
//! loss together with the gradient with respect to the logits.
//!
//! ## Softmax Cross-Entropy
//!
//! ```text
//! p[j]   = exp(x[j] - max(x)) / sum_k exp(x[k] - max(x))
//! loss   = mean_n ( -sum_j label[j] * ln p[j] )
//! dx[j]  = p[j] - label[j]
//! ```
//!
//! ## Hinge (multiclass SVM)
//!
//! ```text
//! y         = argmax(label)
//! margin[j] = max(0, x[j] - x[y] + 1)          for j != y
//! loss      = mean_n ( sum_j margin[j] )
//! dx[j]     = 1 if margin[j] > 0               for j != y
//! dx[y]     = -(number of positive margins)
//! ```
//!
//! Gradients are per sample and are **not** divided by the batch size; the
//! parameter gradients of the hidden layers do the batch averaging.

use crate::error::{NetError, Result};
use crate::tensor::Blob;
use rayon::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LossKind {
    SoftmaxCrossEntropy,
    Hinge,
}

/// Stabilized softmax of one sample
pub fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|&v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn softmax_sample(logits: &[f64], label: &[f64], dx: &mut [f64]) -> f64 {
    let probs = softmax(logits);
    let mut loss = 0.0;
    for ((d, &p), &t) in dx.iter_mut().zip(&probs).zip(label) {
        *d = p - t;
        // Zero labels contribute nothing, even when p underflows to 0
        if t != 0.0 {
            loss -= t * p.ln();
        }
    }
    loss
}

fn hinge_sample(scores: &[f64], correct: usize, dx: &mut [f64]) -> f64 {
    let target = scores[correct];
    let mut loss = 0.0;
    let mut positive = 0usize;
    for (j, (d, &s)) in dx.iter_mut().zip(scores).enumerate() {
        if j == correct {
            continue;
        }
        let margin = s - target + 1.0;
        if margin > 0.0 {
            loss += margin;
            positive += 1;
            *d = 1.0;
        }
    }
    dx[correct] = -(positive as f64);
    loss
}

impl LossKind {
    /// Compute `(mean loss, d-logits)` for a batch
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` unless logits and labels have identical shapes.
    pub fn evaluate(&self, logits: &Blob, labels: &Blob) -> Result<(f64, Blob)> {
        if logits.shape() != labels.shape() {
            return Err(NetError::shape("loss labels", logits.shape(), labels.shape()));
        }
        let shape = logits.shape();
        let mut grad = Blob::zeros(shape);
        if shape.n == 0 {
            return Ok((0.0, grad));
        }

        let losses: Vec<f64> = grad
            .data_mut()
            .par_chunks_mut(shape.sample_len().max(1))
            .enumerate()
            .map(|(n, dx)| match self {
                LossKind::SoftmaxCrossEntropy => {
                    softmax_sample(logits.sample(n), labels.sample(n), dx)
                }
                LossKind::Hinge => {
                    hinge_sample(logits.sample(n), labels.sample_max_index(n), dx)
                }
            })
            .collect();

        let loss = losses.iter().sum::<f64>() / shape.n as f64;
        Ok((loss, grad))
    }
}
