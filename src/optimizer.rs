//! Parameter Update Rules
//!
//! Three update methods are supported. For each learnable tensor θ with
//! gradient g and learning rate α:
//!
//! ```text
//! sgd:      θ = θ - α * g
//!
//! momentum: v = μ * v + g
//!           θ = θ - α * v
//!
//! rmsprop:  a = ρ * a + (1 - ρ) * g²
//!           θ = θ - α * g / √(a + ε)
//! ```
//!
//! where:
//! - μ = `momentum parameter` (velocity decay)
//! - ρ = `rmsprop` (moving-average decay of the squared gradient)
//! - ε = 1e-8 (numerical stability)
//!
//! The accumulators v and a live in the [`Param`](crate::params::Param) record
//! of each slot. They are created zero-filled the first time a slot is
//! updated, and keep their shape for the life of the network.
//!
//! ## Learning-Rate Decay
//!
//! When enabled, the learning rate is multiplied by `lr decay` after every
//! iteration:
//!
//! ```text
//! α_{t+1} = α_t * decay
//! ```
//!
//! The current rate is part of the training context, not of the optimizer.

use crate::error::{NetError, Result};
use crate::gradients::GradientStore;
use crate::params::ParamStore;
use rayon::prelude::*;
use std::fmt;
use std::str::FromStr;

/// Numerical stability constant for rmsprop
pub const RMS_EPSILON: f64 = 1e-8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateMethod {
    Sgd,
    Momentum,
    RmsProp,
}

impl FromStr for UpdateMethod {
    type Err = NetError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "sgd" => Ok(UpdateMethod::Sgd),
            "momentum" => Ok(UpdateMethod::Momentum),
            "rmsprop" => Ok(UpdateMethod::RmsProp),
            other => Err(NetError::UnknownOptimizer(other.to_string())),
        }
    }
}

impl fmt::Display for UpdateMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UpdateMethod::Sgd => "sgd",
            UpdateMethod::Momentum => "momentum",
            UpdateMethod::RmsProp => "rmsprop",
        })
    }
}

/// Update method plus its hyperparameters
#[derive(Clone, Debug, PartialEq)]
pub struct Optimizer {
    pub method: UpdateMethod,
    /// μ for momentum
    pub momentum: f64,
    /// ρ for rmsprop
    pub rms_decay: f64,
    /// Multiplier applied to the learning rate after each iteration
    pub lr_decay: Option<f64>,
}

impl Optimizer {
    pub fn new(method: UpdateMethod) -> Self {
        Self {
            method,
            momentum: 0.9,
            rms_decay: 0.99,
            lr_decay: None,
        }
    }

    /// Apply one update to every parameter that has a gradient
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if a gradient disagrees with its parameter.
    pub fn step(&self, params: &mut ParamStore, grads: &GradientStore, lr: f64) -> Result<()> {
        for (key, param) in params.iter_mut() {
            let Some(grad) = grads.get(&key.layer, key.slot) else {
                continue;
            };
            if grad.shape() != param.value.shape() {
                return Err(NetError::shape("optimizer step", param.value.shape(), grad.shape()));
            }
            let g = grad.data();

            match self.method {
                UpdateMethod::Sgd => {
                    param.value.add_scaled_assign(grad, -lr)?;
                }
                UpdateMethod::Momentum => {
                    let mu = self.momentum;
                    let (value, velocity) = param.value_and_accumulator();
                    value
                        .data_mut()
                        .par_iter_mut()
                        .zip(velocity.data_mut().par_iter_mut())
                        .zip(g.par_iter())
                        .for_each(|((theta, v), &g)| {
                            *v = mu * *v + g;
                            *theta -= lr * *v;
                        });
                }
                UpdateMethod::RmsProp => {
                    let rho = self.rms_decay;
                    let (value, cache) = param.value_and_accumulator();
                    value
                        .data_mut()
                        .par_iter_mut()
                        .zip(cache.data_mut().par_iter_mut())
                        .zip(g.par_iter())
                        .for_each(|((theta, a), &g)| {
                            *a = rho * *a + (1.0 - rho) * g * g;
                            *theta -= lr * g / (*a + RMS_EPSILON).sqrt();
                        });
                }
            }
        }
        Ok(())
    }

    /// Learning rate for the next iteration
    pub fn decayed(&self, lr: f64) -> f64 {
        match self.lr_decay {
            Some(decay) => lr * decay,
            None => lr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamSlot;
    use crate::tensor::{Blob, Shape};

    fn single(value: f64, grad: f64) -> (ParamStore, GradientStore) {
        let shape = Shape::new(1, 1, 1, 1);
        let mut params = ParamStore::new();
        params.insert("w", ParamSlot::Weight, Blob::from_vec(shape, vec![value]).unwrap());
        let mut grads = GradientStore::new();
        grads.insert("w", ParamSlot::Weight, Blob::from_vec(shape, vec![grad]).unwrap());
        (params, grads)
    }

    fn current(params: &ParamStore) -> f64 {
        params.value("w", ParamSlot::Weight).unwrap().data()[0]
    }

    #[test]
    fn test_parse_methods() {
        assert_eq!("sgd".parse::<UpdateMethod>().unwrap(), UpdateMethod::Sgd);
        assert_eq!("rmsprop".parse::<UpdateMethod>().unwrap(), UpdateMethod::RmsProp);
        assert!(matches!(
            "adam".parse::<UpdateMethod>(),
            Err(NetError::UnknownOptimizer(name)) if name == "adam"
        ));
    }

    #[test]
    fn test_sgd_decreases_parameter() {
        let (mut params, grads) = single(1.0, 0.5);
        let opt = Optimizer::new(UpdateMethod::Sgd);
        let mut last = current(&params);
        for _ in 0..3 {
            opt.step(&mut params, &grads, 0.1).unwrap();
            let now = current(&params);
            assert!(now < last);
            last = now;
        }
        assert!((last - 0.85).abs() < 1e-12);
        assert!(params.get("w", ParamSlot::Weight).unwrap().accumulator.is_none());
    }

    #[test]
    fn test_momentum_accumulates_velocity() {
        let (mut params, grads) = single(0.0, 1.0);
        let mut opt = Optimizer::new(UpdateMethod::Momentum);
        opt.momentum = 0.5;
        opt.step(&mut params, &grads, 1.0).unwrap();
        assert_eq!(current(&params), -1.0);
        // v = 0.5 * 1 + 1 = 1.5
        opt.step(&mut params, &grads, 1.0).unwrap();
        assert_eq!(current(&params), -2.5);
    }

    #[test]
    fn test_rmsprop_normalizes_step() {
        let (mut params, grads) = single(0.0, 4.0);
        let mut opt = Optimizer::new(UpdateMethod::RmsProp);
        opt.rms_decay = 0.0;
        opt.step(&mut params, &grads, 0.1).unwrap();
        // a = 16, step = 0.1 * 4 / √16
        assert!((current(&params) + 0.1).abs() < 1e-9);
        let acc = params.get("w", ParamSlot::Weight).unwrap().accumulator.as_ref().unwrap();
        assert_eq!(acc.data(), &[16.0]);
    }

    #[test]
    fn test_mismatched_gradient_rejected() {
        let (mut params, _) = single(0.0, 0.0);
        let mut grads = GradientStore::new();
        grads.insert("w", ParamSlot::Weight, Blob::zeros(Shape::new(2, 1, 1, 1)));
        let opt = Optimizer::new(UpdateMethod::Sgd);
        assert!(opt.step(&mut params, &grads, 0.1).is_err());
    }

    #[test]
    fn test_lr_decay() {
        let mut opt = Optimizer::new(UpdateMethod::Sgd);
        assert_eq!(opt.decayed(0.5), 0.5);
        opt.lr_decay = Some(0.5);
        assert_eq!(opt.decayed(0.5), 0.25);
    }
}
