//! Network and Training Configuration
//!
//! A configuration file is a JSON object with a `train` section of training
//! hyperparameters and a `net` array describing the layer pipeline in order:
//!
//! ```json
//! {
//!   "train": { "learning rate": 0.01, "update method": "momentum", "batch size": 16 },
//!   "net": [
//!     {"name": "conv1", "type": "Conv", "kernel num": 4, "kernel height": 3,
//!      "kernel width": 3, "pad": 1, "stride": 1},
//!     {"name": "relu1", "type": "ReLU"},
//!     {"name": "pool1", "type": "Pool", "kernel height": 2, "kernel width": 2, "stride": 2},
//!     {"name": "fc1", "type": "FC", "kernel num": 3},
//!     {"name": "loss", "type": "Softmax"}
//!   ]
//! }
//! ```
//!
//! Every `train` key is optional. The last `net` entry must be a loss layer
//! (`Softmax` or `SVM`), and no other entry may be one.

use crate::error::{NetError, Result};
use crate::layers::{
    ConvLayer, DropoutLayer, FullyConnectedLayer, Layer, LayerKind, LossKind, PoolLayer, ReluLayer,
    WeightInit,
};
use crate::optimizer::{Optimizer, UpdateMethod};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Training hyperparameters (the `train` section)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    #[serde(rename = "learning rate")]
    pub learning_rate: f64,
    #[serde(rename = "lr decay")]
    pub lr_decay: f64,
    /// `sgd`, `momentum` or `rmsprop`
    #[serde(rename = "update method")]
    pub update_method: String,
    #[serde(rename = "momentum parameter")]
    pub momentum: f64,
    #[serde(rename = "rmsprop")]
    pub rmsprop: f64,
    #[serde(rename = "reg coefficient")]
    pub reg: f64,
    pub epochs: usize,
    /// When false, every iteration uses the whole training set
    #[serde(rename = "use batch")]
    pub use_batch: bool,
    #[serde(rename = "batch size")]
    pub batch_size: usize,
    /// Evaluate every N iterations
    #[serde(rename = "acc frequence")]
    pub acc_frequence: usize,
    /// Apply `lr decay` after every iteration
    #[serde(rename = "frequence update")]
    pub update_lr: bool,
    pub snapshot: bool,
    #[serde(rename = "snapshot interval")]
    pub snapshot_interval: usize,
    #[serde(rename = "fine tune")]
    pub fine_tune: bool,
    #[serde(rename = "pre trained model")]
    pub pre_trained_model: Option<PathBuf>,
    pub seed: u64,
    #[serde(rename = "checkpoint dir")]
    pub checkpoint_dir: PathBuf,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            lr_decay: 1.0,
            update_method: "sgd".to_string(),
            momentum: 0.9,
            rmsprop: 0.99,
            reg: 0.0,
            epochs: 1,
            use_batch: true,
            batch_size: 32,
            acc_frequence: 10,
            update_lr: false,
            snapshot: false,
            snapshot_interval: 100,
            fine_tune: false,
            pre_trained_model: None,
            seed: 0,
            checkpoint_dir: PathBuf::from("."),
        }
    }
}

impl TrainConfig {
    /// Build the optimizer described by this section
    ///
    /// # Errors
    ///
    /// `UnknownOptimizer` for an unsupported `update method`.
    pub fn optimizer(&self) -> Result<Optimizer> {
        let method: UpdateMethod = self.update_method.parse()?;
        Ok(Optimizer {
            method,
            momentum: self.momentum,
            rms_decay: self.rmsprop,
            lr_decay: self.update_lr.then_some(self.lr_decay),
        })
    }

    /// Samples per iteration for a training set of `n_train`
    pub fn effective_batch(&self, n_train: usize) -> usize {
        if self.use_batch {
            self.batch_size
        } else {
            n_train
        }
    }
}

fn default_stride() -> usize {
    1
}

/// One entry of the `net` array, tagged by `type`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LayerType {
    Conv {
        #[serde(rename = "kernel num")]
        kernels: usize,
        #[serde(rename = "kernel height")]
        kernel_h: usize,
        #[serde(rename = "kernel width")]
        kernel_w: usize,
        #[serde(default)]
        pad: usize,
        #[serde(default = "default_stride")]
        stride: usize,
        #[serde(rename = "conv weight init", default)]
        init: WeightInit,
    },
    #[serde(rename = "ReLU")]
    Relu,
    Pool {
        #[serde(rename = "kernel height")]
        kernel_h: usize,
        #[serde(rename = "kernel width")]
        kernel_w: usize,
        #[serde(default = "default_stride")]
        stride: usize,
    },
    Dropout {
        #[serde(rename = "drop rate")]
        rate: f64,
    },
    #[serde(rename = "FC")]
    FullyConnected {
        #[serde(rename = "kernel num")]
        units: usize,
        #[serde(rename = "fc weight init", default)]
        init: WeightInit,
    },
    Softmax,
    #[serde(rename = "SVM")]
    Svm,
}

impl LayerType {
    fn loss(&self) -> Option<LossKind> {
        match self {
            LayerType::Softmax => Some(LossKind::SoftmaxCrossEntropy),
            LayerType::Svm => Some(LossKind::Hinge),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub name: String,
    #[serde(flatten)]
    pub layer_type: LayerType,
}

impl LayerConfig {
    fn to_layer(&self) -> Result<Layer> {
        let zero = |what: &str| {
            NetError::InvalidConfig(format!("layer '{}': {} must be positive", self.name, what))
        };
        let kind = match &self.layer_type {
            LayerType::Conv {
                kernels,
                kernel_h,
                kernel_w,
                pad,
                stride,
                init,
            } => {
                if *kernels == 0 {
                    return Err(zero("kernel num"));
                }
                LayerKind::Conv(
                    ConvLayer::new(*kernels, *kernel_h, *kernel_w, *pad, *stride).with_init(*init),
                )
            }
            LayerType::Relu => LayerKind::Relu(ReluLayer),
            LayerType::Pool {
                kernel_h,
                kernel_w,
                stride,
            } => LayerKind::Pool(PoolLayer::new(*kernel_h, *kernel_w, *stride)),
            LayerType::Dropout { rate } => LayerKind::Dropout(DropoutLayer::new(*rate)?),
            LayerType::FullyConnected { units, init } => {
                if *units == 0 {
                    return Err(zero("kernel num"));
                }
                LayerKind::FullyConnected(FullyConnectedLayer::new(*units).with_init(*init))
            }
            LayerType::Softmax | LayerType::Svm => {
                return Err(NetError::InvalidConfig(format!(
                    "loss layer '{}' must be the last entry of the net",
                    self.name
                )))
            }
        };
        Ok(Layer::new(self.name.clone(), kind))
    }
}

/// Complete configuration file
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NetConfig {
    #[serde(default)]
    pub train: TrainConfig,
    pub net: Vec<LayerConfig>,
}

impl NetConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: NetConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check everything that can be checked without knowing the input shape
    pub fn validate(&self) -> Result<()> {
        self.build_layers()?;
        self.train.optimizer()?;
        let t = &self.train;
        if t.use_batch && t.batch_size == 0 {
            return Err(NetError::InvalidConfig("batch size must be positive".to_string()));
        }
        if t.acc_frequence == 0 {
            return Err(NetError::InvalidConfig("acc frequence must be positive".to_string()));
        }
        if t.snapshot && t.snapshot_interval == 0 {
            return Err(NetError::InvalidConfig(
                "snapshot interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Hidden layers in order, plus the terminal loss
    ///
    /// # Errors
    ///
    /// `InvalidConfig` for an empty net, a missing or misplaced loss layer,
    /// duplicate layer names, or invalid layer hyperparameters.
    pub fn build_layers(&self) -> Result<(Vec<Layer>, LossKind)> {
        let (last, hidden) = self
            .net
            .split_last()
            .ok_or_else(|| NetError::InvalidConfig("net has no layers".to_string()))?;
        let loss = last.layer_type.loss().ok_or_else(|| {
            NetError::InvalidConfig(format!(
                "last layer '{}' must be Softmax or SVM",
                last.name
            ))
        })?;

        let mut seen = HashSet::new();
        for entry in &self.net {
            if !seen.insert(entry.name.as_str()) {
                return Err(NetError::InvalidConfig(format!(
                    "duplicate layer name '{}'",
                    entry.name
                )));
            }
        }

        let layers = hidden.iter().map(LayerConfig::to_layer).collect::<Result<Vec<_>>>()?;
        Ok((layers, loss))
    }
}
