//! Training Loop
//!
//! The [`Trainer`] drives mini-batch gradient descent over a [`Dataset`]:
//!
//! ```text
//! iterations = ⌊N_train / batch⌋ × epochs
//!
//! for i in 0..iterations:
//!     batch_i = samples (i·batch + k) mod N_train, k < batch
//!     loss    = network.train_step(batch_i)
//!     lr      = lr × decay                      (if enabled)
//!     every `acc frequence` iterations:         evaluate and log
//!     every `snapshot interval` iterations > 0: write iter{i}.blobnet
//! ```
//!
//! Mini-batches wrap around the end of the training set, so every batch has
//! exactly `batch` samples.
//!
//! ## Evaluation
//!
//! Training accuracy is measured on the first 1000 training samples (or all
//! of them, if fewer); validation accuracy on the whole validation set. Both
//! passes run with dropout disabled and include the L2 term in the loss.
//!
//! All progress lives in an explicit [`TrainContext`] that each iteration
//! reads and updates.

use crate::config::TrainConfig;
use crate::error::{NetError, Result};
use crate::network::{Evaluation, Network};
use crate::optimizer::Optimizer;
use crate::tensor::{Blob, Shape};
use crate::training_logger::TrainingLogger;
use log::{debug, info, warn};
use std::path::PathBuf;

/// Number of leading training samples used for the training accuracy
pub const TRAIN_EVAL_SAMPLES: usize = 1000;

/// Training and validation inputs with their one-hot labels
#[derive(Clone, Debug)]
pub struct Dataset {
    pub train_x: Blob,
    pub train_y: Blob,
    pub val_x: Blob,
    pub val_y: Blob,
}

impl Dataset {
    /// # Errors
    ///
    /// `ShapeMismatch` if inputs and labels disagree in sample count, or
    /// training and validation samples disagree in shape.
    pub fn new(train_x: Blob, train_y: Blob, val_x: Blob, val_y: Blob) -> Result<Self> {
        for (x, y) in [(&train_x, &train_y), (&val_x, &val_y)] {
            if x.n() != y.n() {
                return Err(NetError::shape("dataset labels", x.shape(), y.shape()));
            }
        }
        if train_x.shape().with_batch(1) != val_x.shape().with_batch(1) {
            return Err(NetError::shape("dataset inputs", train_x.shape(), val_x.shape()));
        }
        if train_y.shape().with_batch(1) != val_y.shape().with_batch(1) {
            return Err(NetError::shape("dataset labels", train_y.shape(), val_y.shape()));
        }
        Ok(Self {
            train_x,
            train_y,
            val_x,
            val_y,
        })
    }

    /// Hold out the last `val_fraction` of the samples for validation
    pub fn split(x: &Blob, y: &Blob, val_fraction: f64) -> Result<Self> {
        let n = x.n();
        let val = ((n as f64) * val_fraction.clamp(0.0, 1.0)).round() as usize;
        let cut = n - val.min(n);
        Self::new(
            x.sub_blob(0, cut)?,
            y.sub_blob(0, cut)?,
            x.sub_blob(cut, n)?,
            y.sub_blob(cut, n)?,
        )
    }

    pub fn train_len(&self) -> usize {
        self.train_x.n()
    }

    /// Shape of one input sample
    pub fn sample_shape(&self) -> Shape {
        self.train_x.shape().with_batch(1)
    }
}

/// Progress of a training run
#[derive(Clone, Debug, PartialEq)]
pub struct TrainContext {
    /// Index of the next iteration to run
    pub iteration: usize,
    pub learning_rate: f64,
    /// Regularized loss of the most recent training batch
    pub batch_loss: Option<f64>,
    pub train_eval: Option<Evaluation>,
    pub val_eval: Option<Evaluation>,
    pub best_val_loss: f64,
    pub best_val_iteration: usize,
}

impl TrainContext {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            iteration: 0,
            learning_rate,
            batch_loss: None,
            train_eval: None,
            val_eval: None,
            best_val_loss: f64::INFINITY,
            best_val_iteration: 0,
        }
    }
}

pub struct Trainer {
    config: TrainConfig,
    optimizer: Optimizer,
    logger: Option<TrainingLogger>,
}

impl Trainer {
    /// # Errors
    ///
    /// `UnknownOptimizer` for an unsupported update method.
    pub fn new(config: &TrainConfig) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            optimizer: config.optimizer()?,
            logger: None,
        })
    }

    /// Also write every evaluation to a CSV log
    pub fn with_logger(mut self, logger: TrainingLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    fn batch_size(&self, n_train: usize) -> Result<usize> {
        let batch = self.config.effective_batch(n_train);
        if batch == 0 {
            return Err(NetError::InvalidConfig(
                "training needs a positive batch size and a non-empty training set".to_string(),
            ));
        }
        Ok(batch)
    }

    /// Total iterations for a training set of `n_train` samples
    pub fn iterations(&self, n_train: usize) -> Result<usize> {
        Ok(n_train / self.batch_size(n_train)? * self.config.epochs)
    }

    pub fn context(&self) -> TrainContext {
        TrainContext::new(self.config.learning_rate)
    }

    /// Run one iteration: update, decay, and the periodic evaluation and snapshot
    pub fn step(&mut self, net: &mut Network, data: &Dataset, ctx: &mut TrainContext) -> Result<()> {
        let n = data.train_len();
        if n == 0 {
            return Err(NetError::OutOfRange { lo: 0, hi: 1, len: 0 });
        }
        let batch = self.batch_size(n)?;
        let iter = ctx.iteration;
        let start = (iter % n) * (batch % n) % n;

        let x = data.train_x.wrapping_batch(start, batch)?;
        let y = data.train_y.wrapping_batch(start, batch)?;
        let loss = net.train_step(&x, &y, &self.optimizer, ctx.learning_rate)?;
        debug!("iter {}: batch loss {:.6}", iter, loss);
        ctx.batch_loss = Some(loss);
        ctx.learning_rate = self.optimizer.decayed(ctx.learning_rate);

        if iter % self.config.acc_frequence.max(1) == 0 {
            self.evaluate(net, data, ctx)?;
        }

        if self.config.snapshot && iter > 0 && iter % self.config.snapshot_interval.max(1) == 0 {
            let path = self.snapshot_path(iter);
            if let Err(e) = net.save_weights(&path) {
                warn!("failed to write snapshot {}: {}", path.display(), e);
            }
        }

        ctx.iteration += 1;
        Ok(())
    }

    /// Checkpoint file written at iteration `iter`
    pub fn snapshot_path(&self, iter: usize) -> PathBuf {
        self.config.checkpoint_dir.join(format!("iter{}.blobnet", iter))
    }

    /// Evaluate on the training subset and the validation set, then log
    pub fn evaluate(&mut self, net: &mut Network, data: &Dataset, ctx: &mut TrainContext) -> Result<()> {
        let subset = data.train_len().min(TRAIN_EVAL_SAMPLES);
        let train = evaluate_on(
            net,
            &data.train_x.sub_blob(0, subset)?,
            &data.train_y.sub_blob(0, subset)?,
        )?;
        let val = evaluate_on(net, &data.val_x, &data.val_y)?;

        if data.val_x.n() > 0 && val.loss < ctx.best_val_loss {
            ctx.best_val_loss = val.loss;
            ctx.best_val_iteration = ctx.iteration;
        }
        ctx.train_eval = Some(train);
        ctx.val_eval = Some(val);

        info!(
            "iter {}: lr {:.6}, train_loss {:.6}, val_loss {:.6}, train_acc {:.2}%, val_acc {:.2}%",
            ctx.iteration,
            ctx.learning_rate,
            train.loss,
            val.loss,
            train.accuracy * 100.0,
            val.accuracy * 100.0
        );
        if let Some(logger) = self.logger.as_mut() {
            logger.log(ctx.iteration, ctx.learning_rate, train, val)?;
        }
        Ok(())
    }

    /// Train for the configured number of epochs
    pub fn run(&mut self, net: &mut Network, data: &Dataset) -> Result<TrainContext> {
        let mut ctx = self.context();
        let iterations = self.iterations(data.train_len())?;
        info!(
            "training for {} iterations ({} epochs, batch {}, {})",
            iterations,
            self.config.epochs,
            self.batch_size(data.train_len())?,
            self.optimizer.method
        );
        if iterations == 0 {
            warn!("batch size exceeds the training set; nothing to train");
        }
        while ctx.iteration < iterations {
            self.step(net, data, &mut ctx)?;
        }
        Ok(ctx)
    }
}

fn evaluate_on(net: &mut Network, x: &Blob, y: &Blob) -> Result<Evaluation> {
    if x.n() == 0 {
        return Ok(Evaluation {
            loss: 0.0,
            accuracy: 0.0,
        });
    }
    net.evaluate(x, y)
}
