//! Neural Network Layers
//!
//! This module contains the layer operators of the training engine. Each
//! layer provides shape inference, parameter initialization, and both
//! forward and backward passes.
//!
//! ## Layers
//!
//! - **conv**: 2-D convolution with zero padding and stride
//! - **pool**: Max pooling
//! - **fully_connected**: Inner product over the whole input sample
//! - **activation**: ReLU
//! - **dropout**: Inverted dropout regularization
//! - **loss**: Terminal softmax cross-entropy and hinge losses
//!
//! ## Design Pattern
//!
//! Layers do not own their parameters. The network keeps weights and biases
//! in a [`ParamStore`](crate::params::ParamStore) and lends each layer a
//! [`ParamView`] for a single call:
//!
//! ```rust,ignore
//! impl SomeLayer {
//!     pub fn output_shape(&self, input: Shape) -> Result<Shape> { }
//!     pub fn init_params(&self, input: Shape, rng) -> (Blob, Blob) { }
//!     pub fn forward(&self, x: &Blob, params: ParamView) -> Result<(Blob, Cache)> { }
//!     pub fn backward(&self, grad: &Blob, cache: &Cache, params: ParamView) -> Result<LayerGradients> { }
//! }
//! ```
//!
//! The cache returned by `forward` holds exactly what `backward` needs and
//! is discarded after the paired backward call. [`Layer`] wraps the closed
//! set of operators and dispatches by `match`.

pub mod activation;
pub mod conv;
pub mod dropout;
pub mod fully_connected;
#[cfg(test)]
mod gradcheck;
pub mod loss;
pub mod pool;

pub use activation::{ReluCache, ReluLayer};
pub use conv::{ConvCache, ConvLayer};
pub use dropout::{DropoutCache, DropoutLayer};
pub use fully_connected::{FullyConnectedCache, FullyConnectedLayer};
pub use loss::LossKind;
pub use pool::{PoolCache, PoolLayer};

use crate::error::{NetError, Result};
use crate::params::ParamView;
use crate::tensor::{Blob, Shape};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Weight initialization scheme for convolution and fully connected layers
///
/// All schemes draw from N(0, 1) and scale the draw:
///
/// ```text
/// gaussian: 0.01
/// msra:     sqrt(2 / fan_in)
/// xavier:   sqrt(1 / fan_in)
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightInit {
    #[default]
    Gaussian,
    Msra,
    Xavier,
}

impl WeightInit {
    /// Scale used by the plain gaussian scheme (and for conv biases)
    pub const GAUSSIAN_SCALE: f64 = 0.01;

    /// `fan_in` is the element count of one kernel, `C * Hk * Wk`
    pub fn scale(&self, fan_in: usize) -> f64 {
        let fan_in = fan_in.max(1) as f64;
        match self {
            WeightInit::Gaussian => Self::GAUSSIAN_SCALE,
            WeightInit::Msra => (2.0 / fan_in).sqrt(),
            WeightInit::Xavier => (1.0 / fan_in).sqrt(),
        }
    }
}

/// Gradients produced by one layer's backward pass
///
/// `weight` and `bias` are `None` for layers without parameters. Parameter
/// gradients are already averaged over the batch.
#[derive(Clone, Debug)]
pub struct LayerGradients {
    pub input: Blob,
    pub weight: Option<Blob>,
    pub bias: Option<Blob>,
}

/// Whether a forward pass is part of training or evaluation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// The closed set of hidden layer operators
#[derive(Clone, Debug, PartialEq)]
pub enum LayerKind {
    Conv(ConvLayer),
    Pool(PoolLayer),
    FullyConnected(FullyConnectedLayer),
    Relu(ReluLayer),
    Dropout(DropoutLayer),
}

/// Forward cache of any [`LayerKind`]
#[derive(Clone, Debug)]
pub enum LayerCache {
    Conv(ConvCache),
    Pool(PoolCache),
    FullyConnected(FullyConnectedCache),
    Relu(ReluCache),
    Dropout(DropoutCache),
}

/// A named layer in the network pipeline
#[derive(Clone, Debug, PartialEq)]
pub struct Layer {
    pub name: String,
    pub kind: LayerKind,
}

impl Layer {
    pub fn new(name: impl Into<String>, kind: LayerKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Configuration type name, as used in the `net` section
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            LayerKind::Conv(_) => "Conv",
            LayerKind::Pool(_) => "Pool",
            LayerKind::FullyConnected(_) => "FC",
            LayerKind::Relu(_) => "ReLU",
            LayerKind::Dropout(_) => "Dropout",
        }
    }

    /// Whether the layer owns a weight and a bias
    pub fn has_params(&self) -> bool {
        matches!(self.kind, LayerKind::Conv(_) | LayerKind::FullyConnected(_))
    }

    pub fn output_shape(&self, input: Shape) -> Result<Shape> {
        match &self.kind {
            LayerKind::Conv(l) => l.output_shape(input),
            LayerKind::Pool(l) => l.output_shape(input),
            LayerKind::FullyConnected(l) => l.output_shape(input),
            LayerKind::Relu(_) | LayerKind::Dropout(_) => Ok(input),
        }
    }

    /// Fresh `(weight, bias)` for layers that have parameters
    pub fn init_params<R: Rng + ?Sized>(&self, input: Shape, rng: &mut R) -> Option<(Blob, Blob)> {
        match &self.kind {
            LayerKind::Conv(l) => Some(l.init_params(input, rng)),
            LayerKind::FullyConnected(l) => Some(l.init_params(input, rng)),
            _ => None,
        }
    }

    fn require<'a>(&self, params: Option<ParamView<'a>>) -> Result<ParamView<'a>> {
        params.ok_or_else(|| {
            NetError::InvalidConfig(format!("layer '{}' has no parameters installed", self.name))
        })
    }

    pub fn forward<R: Rng + ?Sized>(
        &self,
        x: &Blob,
        params: Option<ParamView<'_>>,
        mode: Mode,
        rng: &mut R,
    ) -> Result<(Blob, LayerCache)> {
        Ok(match &self.kind {
            LayerKind::Conv(l) => {
                let (y, c) = l.forward(x, self.require(params)?)?;
                (y, LayerCache::Conv(c))
            }
            LayerKind::Pool(l) => {
                let (y, c) = l.forward(x)?;
                (y, LayerCache::Pool(c))
            }
            LayerKind::FullyConnected(l) => {
                let (y, c) = l.forward(x, self.require(params)?)?;
                (y, LayerCache::FullyConnected(c))
            }
            LayerKind::Relu(l) => {
                let (y, c) = l.forward(x);
                (y, LayerCache::Relu(c))
            }
            LayerKind::Dropout(l) => {
                let (y, c) = l.forward(x, mode, rng)?;
                (y, LayerCache::Dropout(c))
            }
        })
    }

    pub fn backward(
        &self,
        grad_out: &Blob,
        cache: &LayerCache,
        params: Option<ParamView<'_>>,
    ) -> Result<LayerGradients> {
        match (&self.kind, cache) {
            (LayerKind::Conv(l), LayerCache::Conv(c)) => {
                l.backward(grad_out, c, self.require(params)?)
            }
            (LayerKind::Pool(l), LayerCache::Pool(c)) => l.backward(grad_out, c),
            (LayerKind::FullyConnected(l), LayerCache::FullyConnected(c)) => {
                l.backward(grad_out, c, self.require(params)?)
            }
            (LayerKind::Relu(l), LayerCache::Relu(c)) => l.backward(grad_out, c),
            (LayerKind::Dropout(l), LayerCache::Dropout(c)) => l.backward(grad_out, c),
            _ => Err(NetError::InvalidConfig(format!(
                "cache passed to layer '{}' came from a different layer kind",
                self.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_init_scales() {
        assert_eq!(WeightInit::Gaussian.scale(100), 0.01);
        assert!((WeightInit::Msra.scale(8) - 0.5).abs() < 1e-12);
        assert!((WeightInit::Xavier.scale(4) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_init_names_deserialize() {
        let init: WeightInit = serde_json::from_str("\"msra\"").unwrap();
        assert_eq!(init, WeightInit::Msra);
    }

    #[test]
    fn test_missing_params_rejected() {
        let layer = Layer::new("fc", LayerKind::FullyConnected(FullyConnectedLayer::new(2)));
        let x = Blob::zeros(Shape::new(1, 1, 1, 3));
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            layer.forward(&x, None, Mode::Train, &mut rng),
            Err(NetError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_mismatched_cache_rejected() {
        let relu = Layer::new("relu", LayerKind::Relu(ReluLayer));
        let pool = Layer::new("pool", LayerKind::Pool(PoolLayer::new(1, 1, 1)));
        let x = Blob::zeros(Shape::new(1, 1, 2, 2));
        let mut rng = StdRng::seed_from_u64(0);
        let (y, cache) = relu.forward(&x, None, Mode::Train, &mut rng).unwrap();
        assert!(pool.backward(&y, &cache, None).is_err());
    }

    #[test]
    fn test_shape_passthrough_layers() {
        let s = Shape::new(2, 3, 4, 5);
        let relu = Layer::new("r", LayerKind::Relu(ReluLayer));
        let drop = Layer::new("d", LayerKind::Dropout(DropoutLayer::new(0.5).unwrap()));
        assert_eq!(relu.output_shape(s).unwrap(), s);
        assert_eq!(drop.output_shape(s).unwrap(), s);
        assert!(!relu.has_params());
        assert!(relu.init_params(s, &mut StdRng::seed_from_u64(1)).is_none());
    }
}
