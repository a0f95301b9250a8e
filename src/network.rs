//! Network Pipeline
//!
//! A [`Network`] is an ordered list of hidden layers closed by a loss. It
//! owns every learnable tensor (in a [`ParamStore`]) and the random number
//! generator used by dropout, so two networks built from the same
//! configuration and seed behave identically.
//!
//! ## One Training Step
//!
//! ```text
//! x -> layer_1.forward -> ... -> layer_n.forward -> logits
//! (loss, d_logits) = loss(logits, labels)
//! d_logits -> layer_n.backward -> ... -> layer_1.backward
//! dW += λ W / N;  loss += λ ΣW² / 2N
//! optimizer update on every weight and bias
//! ```
//!
//! Evaluation runs the forward pass and the loss (including the L2 term) with
//! dropout disabled and updates nothing.
//!
//! ## Checkpoints
//!
//! [`Network::snapshot`] exports one [`ParamBlock`] per learnable tensor;
//! [`Network::restore`] installs blocks by layer name. A block whose shape
//! disagrees with the layer it names is rejected before anything is
//! installed. Blocks naming layers this network does not have are skipped.

use crate::checkpoint::{ParamBlock, Snapshot};
use crate::config::NetConfig;
use crate::error::{NetError, Result};
use crate::gradients::{compute_grad_norm, l2_loss, GradientStore};
use crate::layers::{Layer, LayerCache, LossKind, Mode};
use crate::metric::accuracy;
use crate::optimizer::Optimizer;
use crate::params::{ParamSlot, ParamStore};
use crate::tensor::{Blob, Shape};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::Path;

/// Activations kept between a forward pass and its backward pass
pub struct ForwardPass {
    pub logits: Blob,
    caches: Vec<LayerCache>,
}

/// Loss and accuracy of a forward-only pass
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
}

pub struct Network {
    layers: Vec<Layer>,
    loss: LossKind,
    params: ParamStore,
    /// Per-sample input shape (n = 1)
    input: Shape,
    /// Output shape of every hidden layer, per sample
    shapes: Vec<Shape>,
    reg: f64,
    rng: StdRng,
}

impl Network {
    /// Build a network and initialize its parameters
    ///
    /// `input` is the shape of one sample; its `n` is ignored.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if some layer's geometry does not fit the shape it
    /// receives.
    pub fn new(layers: Vec<Layer>, loss: LossKind, input: Shape, reg: f64, seed: u64) -> Result<Self> {
        let input = input.with_batch(1);
        let mut rng = StdRng::seed_from_u64(seed);
        let mut params = ParamStore::new();
        let mut shapes = Vec::with_capacity(layers.len());

        info!("building network for input {}", input);
        let mut shape = input;
        for layer in &layers {
            if let Some((weight, bias)) = layer.init_params(shape, &mut rng) {
                info!(
                    "  {} ({}): weight {}, bias {}",
                    layer.name,
                    layer.type_name(),
                    weight.shape(),
                    bias.shape()
                );
                params.insert_layer(&layer.name, weight, bias);
            }
            shape = layer.output_shape(shape)?;
            info!("  {} ({}) -> {}", layer.name, layer.type_name(), shape);
            shapes.push(shape);
        }
        info!("network has {} parameters", params.num_parameters());

        Ok(Self {
            layers,
            loss,
            params,
            input,
            shapes,
            reg,
            rng,
        })
    }

    /// Build from a parsed configuration
    ///
    /// With `fine tune` enabled the pre-trained checkpoint is restored; if it
    /// cannot be read or does not fit, a warning is logged and the network
    /// keeps its fresh initialization.
    pub fn from_config(config: &NetConfig, input: Shape) -> Result<Self> {
        let (layers, loss) = config.build_layers()?;
        let train = &config.train;
        let mut net = Self::new(layers, loss, input, train.reg, train.seed)?;

        if train.fine_tune {
            match &train.pre_trained_model {
                Some(path) => {
                    if let Err(e) = net.load_weights(path) {
                        warn!(
                            "could not restore pre-trained model {}: {}; training from scratch",
                            path.display(),
                            e
                        );
                    }
                }
                None => warn!("fine tune enabled without a pre trained model; training from scratch"),
            }
        }
        Ok(net)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn loss_kind(&self) -> LossKind {
        self.loss
    }

    pub fn params(&self) -> &ParamStore {
        &self.params
    }

    pub fn input_shape(&self) -> Shape {
        self.input
    }

    /// Per-sample shape of the logits
    pub fn output_shape(&self) -> Shape {
        self.shapes.last().copied().unwrap_or(self.input)
    }

    pub fn num_parameters(&self) -> usize {
        self.params.num_parameters()
    }

    pub fn forward(&mut self, x: &Blob, mode: Mode) -> Result<ForwardPass> {
        let mut caches = Vec::with_capacity(self.layers.len());
        let mut current = x.clone();
        for layer in &self.layers {
            let view = self.params.view(&layer.name);
            let (out, cache) = layer.forward(&current, view, mode, &mut self.rng)?;
            caches.push(cache);
            current = out;
        }
        Ok(ForwardPass {
            logits: current,
            caches,
        })
    }

    /// Data loss plus the L2 term for a batch of `batch` samples
    pub fn loss(&self, logits: &Blob, labels: &Blob) -> Result<(f64, Blob)> {
        let (data_loss, grad) = self.loss.evaluate(logits, labels)?;
        Ok((data_loss + l2_loss(&self.params, self.reg, logits.n()), grad))
    }

    /// Reverse pass from the loss gradient to every parameter gradient
    pub fn backward(&self, pass: &ForwardPass, grad_logits: &Blob) -> Result<GradientStore> {
        let mut grads = GradientStore::new();
        let mut grad = grad_logits.clone();
        for (layer, cache) in self.layers.iter().zip(&pass.caches).rev() {
            let out = layer.backward(&grad, cache, self.params.view(&layer.name))?;
            if let Some(dw) = out.weight {
                grads.insert(&layer.name, ParamSlot::Weight, dw);
            }
            if let Some(db) = out.bias {
                grads.insert(&layer.name, ParamSlot::Bias, db);
            }
            grad = out.input;
        }
        Ok(grads)
    }

    /// Forward, backward and regularized gradients without updating
    pub fn compute_gradients(&mut self, x: &Blob, labels: &Blob) -> Result<(f64, GradientStore)> {
        let pass = self.forward(x, Mode::Train)?;
        let (loss, grad_logits) = self.loss(&pass.logits, labels)?;
        let mut grads = self.backward(&pass, &grad_logits)?;
        grads.add_l2(&self.params, self.reg, x.n())?;
        Ok((loss, grads))
    }

    /// One training iteration; returns the regularized batch loss
    pub fn train_step(
        &mut self,
        x: &Blob,
        labels: &Blob,
        optimizer: &Optimizer,
        lr: f64,
    ) -> Result<f64> {
        let (loss, grads) = self.compute_gradients(x, labels)?;
        debug!(
            "batch of {}: loss {:.6}, grad norm {:.6}",
            x.n(),
            loss,
            compute_grad_norm(&grads)
        );
        optimizer.step(&mut self.params, &grads, lr)?;
        Ok(loss)
    }

    /// Regularized loss and accuracy with dropout disabled
    pub fn evaluate(&mut self, x: &Blob, labels: &Blob) -> Result<Evaluation> {
        let pass = self.forward(x, Mode::Eval)?;
        let (loss, _) = self.loss(&pass.logits, labels)?;
        Ok(Evaluation {
            loss,
            accuracy: accuracy(labels, &pass.logits)?,
        })
    }

    /// Export every learnable tensor in layer order, weight before bias
    pub fn snapshot(&self) -> Snapshot {
        let mut blocks = Vec::new();
        for layer in &self.layers {
            for slot in ParamSlot::ALL {
                if let Some(value) = self.params.value(&layer.name, slot) {
                    blocks.push(ParamBlock {
                        layer_name: layer.name.clone(),
                        kind: slot,
                        shape: value.shape(),
                        values: value.to_nchw(),
                    });
                }
            }
        }
        Snapshot { blocks }
    }

    /// Install checkpoint blocks; returns how many were installed
    ///
    /// # Errors
    ///
    /// `Checkpoint` if a block's shape differs from the parameter it would
    /// replace. Nothing is installed in that case.
    pub fn restore(&mut self, snapshot: &Snapshot) -> Result<usize> {
        let mut staged = Vec::with_capacity(snapshot.blocks.len());
        for block in &snapshot.blocks {
            let Some(current) = self.params.value(&block.layer_name, block.kind) else {
                warn!(
                    "checkpoint block {}:{} names no layer of this network; skipped",
                    block.layer_name, block.kind
                );
                continue;
            };
            if current.shape() != block.shape {
                return Err(NetError::Checkpoint(format!(
                    "{}:{} has shape {} in the checkpoint but {} in the network",
                    block.layer_name,
                    block.kind,
                    block.shape,
                    current.shape()
                )));
            }
            staged.push((block, Blob::from_nchw(block.shape, &block.values)?));
        }

        let installed = staged.len();
        for (block, value) in staged {
            self.params.insert(&block.layer_name, block.kind, value);
        }
        info!("restored {} parameter blocks", installed);
        Ok(installed)
    }

    pub fn save_weights(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.snapshot().save(path)?;
        info!("saved checkpoint {}", path.display());
        Ok(())
    }

    pub fn load_weights(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let snapshot = Snapshot::load(path)?;
        info!("loading checkpoint {}", path.display());
        self.restore(&snapshot)
    }
}
