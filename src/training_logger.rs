//! Training Logger
//!
//! Records evaluation results over the course of a training run, both to a
//! CSV file for later analysis and as one console line per evaluation.
//!
//! ## Example
//!
//! ```rust,no_run
//! use blobnet::network::Evaluation;
//! use blobnet::TrainingLogger;
//!
//! let mut logger = TrainingLogger::new("training_log.csv")?;
//! let train = Evaluation { loss: 1.2, accuracy: 0.40 };
//! let val = Evaluation { loss: 1.3, accuracy: 0.35 };
//! logger.log(100, 0.01, train, val)?;
//! # Ok::<(), blobnet::NetError>(())
//! ```
//!
//! ## CSV Format
//!
//! - `iteration`: Training iteration number
//! - `elapsed_seconds`: Time since the logger was created
//! - `learning_rate`: Learning rate after this iteration's decay
//! - `train_loss`, `val_loss`: Regularized loss on the evaluation subsets
//! - `train_accuracy`, `val_accuracy`: Fraction of correctly classified samples

use crate::error::Result;
use crate::network::Evaluation;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

pub const CSV_HEADER: &str =
    "iteration,elapsed_seconds,learning_rate,train_loss,val_loss,train_accuracy,val_accuracy";

/// Logs evaluation metrics to a CSV file and the console
pub struct TrainingLogger {
    log_file: File,
    start_time: Instant,
    last_log_time: Instant,
}

impl TrainingLogger {
    /// Create the CSV file and write its header
    pub fn new(log_path: impl AsRef<Path>) -> Result<Self> {
        let mut log_file = File::create(log_path)?;
        writeln!(log_file, "{}", CSV_HEADER)?;

        let now = Instant::now();
        Ok(Self {
            log_file,
            start_time: now,
            last_log_time: now,
        })
    }

    pub fn log(
        &mut self,
        iteration: usize,
        learning_rate: f64,
        train: Evaluation,
        val: Evaluation,
    ) -> Result<()> {
        let elapsed = self.start_time.elapsed().as_secs_f64();

        writeln!(
            self.log_file,
            "{},{:.2},{:.6},{:.6},{:.6},{:.4},{:.4}",
            iteration,
            elapsed,
            learning_rate,
            train.loss,
            val.loss,
            train.accuracy,
            val.accuracy
        )?;
        // Keep the file complete if training is interrupted
        self.log_file.flush()?;

        let step_time = self.last_log_time.elapsed().as_secs_f64();
        println!(
            "iter {:5} | {:7.1}s (+{:.1}s) | lr: {:.6} | train_loss: {:.6} | val_loss: {:.6} | train_acc: {:6.2}% | val_acc: {:6.2}%",
            iteration,
            elapsed,
            step_time,
            learning_rate,
            train.loss,
            val.loss,
            train.accuracy * 100.0,
            val.accuracy * 100.0
        );

        self.last_log_time = Instant::now();
        Ok(())
    }
}
