//! Blobnet: A Small Convolutional Network Trainer
//!
//! A 4-D tensor type, a handful of layers with hand-written forward and
//! backward passes, and a mini-batch training loop, implemented from scratch
//! in Rust. No autodiff and no linear-algebra library: every operator is a
//! direct loop over the tensor.
//!
//! # Modules
//!
//! - [`tensor`] - The `Blob` tensor (N samples of C×H×W, channel-last storage)
//! - [`layers`] - Convolution, pooling, fully connected, ReLU, dropout, losses
//! - [`params`] / [`gradients`] - Parameter arena and per-pass gradients
//! - [`optimizer`] - sgd, momentum and rmsprop updates
//! - [`network`] - The layer pipeline with checkpoint export and restore
//! - [`train`] - Datasets, training context and the training loop
//! - [`config`] - JSON configuration
//! - [`checkpoint`] - Binary checkpoint format
//!
//! # Example
//!
//! ```rust,no_run
//! use blobnet::{Dataset, NetConfig, Network, Trainer};
//! # fn load() -> (blobnet::Blob, blobnet::Blob) { todo!() }
//!
//! let config = NetConfig::from_json_file("net.json")?;
//! let (x, y) = load();
//! let data = Dataset::split(&x, &y, 0.1)?;
//!
//! let mut net = Network::from_config(&config, data.sample_shape())?;
//! let ctx = Trainer::new(&config.train)?.run(&mut net, &data)?;
//! println!("best validation loss {:.4}", ctx.best_val_loss);
//! # Ok::<(), blobnet::NetError>(())
//! ```

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod gradients;
pub mod layers;
pub mod metric;
pub mod network;
pub mod optimizer;
pub mod params;
pub mod tensor;
pub mod train;
pub mod training_logger;

// Re-export main types for convenience
pub use checkpoint::{ParamBlock, Snapshot};
pub use config::{LayerConfig, LayerType, NetConfig, TrainConfig};
pub use error::{NetError, Result};
pub use layers::{Layer, LayerKind, LossKind, Mode, WeightInit};
pub use metric::accuracy;
pub use network::{Evaluation, Network};
pub use optimizer::{Optimizer, UpdateMethod};
pub use params::{ParamSlot, ParamStore};
pub use tensor::{Blob, Fill, Shape};
pub use train::{Dataset, TrainContext, Trainer};
pub use training_logger::TrainingLogger;
