//! Train a Small CNN on Synthetic Images
//!
//! Generates 8×8 single-channel images of three classes (a horizontal bar, a
//! vertical bar, or a diagonal) with gaussian noise, and trains the network
//! described by a JSON configuration on them.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --release --example train_synthetic -- --config demos/configs/tiny_cnn.json
//!
//! # Override the optimizer and write a CSV log
//! cargo run --release --example train_synthetic -- \
//!     --config demos/configs/tiny_cnn.json --method rmsprop --lr 0.005 --log run.csv
//! ```

use blobnet::{Blob, Dataset, NetConfig, Network, Shape, Trainer, TrainingLogger};
use clap::Parser;
use log::{info, LevelFilter, Log, Metadata, Record};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, NormalError};

const SIDE: usize = 8;
const CLASSES: usize = 3;

#[derive(Parser)]
#[command(name = "train_synthetic", about = "Train a CNN on synthetic bar images")]
struct Args {
    /// Network and training configuration (JSON)
    #[arg(long, default_value = "demos/configs/tiny_cnn.json")]
    config: String,

    /// Number of generated samples
    #[arg(long, default_value = "600")]
    samples: usize,

    /// Fraction of samples held out for validation
    #[arg(long, default_value = "0.2")]
    val_fraction: f64,

    /// Standard deviation of the pixel noise
    #[arg(long, default_value = "0.3")]
    noise: f64,

    /// Override the update method (sgd, momentum, rmsprop)
    #[arg(long)]
    method: Option<String>,

    /// Override the learning rate
    #[arg(long)]
    lr: Option<f64>,

    /// Override the number of epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Write evaluation results to this CSV file
    #[arg(long)]
    log: Option<String>,

    /// Save the trained weights to this checkpoint
    #[arg(long)]
    save: Option<String>,

    /// Print debug-level diagnostics
    #[arg(long)]
    verbose: bool,
}

struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{:5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

/// One-hot labelled images of bars and diagonals
fn synthesize(samples: usize, noise: f64, rng: &mut StdRng) -> Result<(Blob, Blob), NormalError> {
    let mut x = Blob::zeros(Shape::new(samples, 1, SIDE, SIDE));
    let mut y = Blob::zeros(Shape::new(samples, CLASSES, 1, 1));
    let normal = Normal::new(0.0, noise)?;

    for n in 0..samples {
        let class = n % CLASSES;
        let line = rng.random_range(1..SIDE - 1);
        for h in 0..SIDE {
            for w in 0..SIDE {
                let on = match class {
                    0 => h == line,
                    1 => w == line,
                    _ => h == w,
                };
                let base = if on { 1.0 } else { 0.0 };
                x.set(n, 0, h, w, base + normal.sample(rng));
            }
        }
        y.set(n, class, 0, 0, 1.0);
    }
    Ok((x, y))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    log::set_logger(&LOGGER).map(|()| log::set_max_level(level))?;
    info!("loading configuration {}", args.config);

    let mut config = NetConfig::from_json_file(&args.config)?;
    if let Some(method) = args.method {
        config.train.update_method = method;
    }
    if let Some(lr) = args.lr {
        config.train.learning_rate = lr;
    }
    if let Some(epochs) = args.epochs {
        config.train.epochs = epochs;
    }
    config.validate()?;

    let mut rng = StdRng::seed_from_u64(config.train.seed);
    let (x, y) = synthesize(args.samples, args.noise, &mut rng)?;
    let data = Dataset::split(&x, &y, args.val_fraction)?;
    println!(
        "Dataset: {} training / {} validation samples of {}",
        data.train_len(),
        data.val_x.n(),
        data.sample_shape()
    );

    let mut net = Network::from_config(&config, data.sample_shape())?;
    println!(
        "Network: {} -> {} ({:?} loss), {} parameters",
        net.input_shape(),
        net.output_shape(),
        net.loss_kind(),
        net.num_parameters()
    );

    let mut trainer = Trainer::new(&config.train)?;
    if let Some(path) = &args.log {
        trainer = trainer.with_logger(TrainingLogger::new(path)?);
    }
    let ctx = trainer.run(&mut net, &data)?;

    let final_val = net.evaluate(&data.val_x, &data.val_y)?;
    println!();
    println!("Finished {} iterations", ctx.iteration);
    println!(
        "Validation: loss {:.4}, accuracy {:.2}% (best loss {:.4} at iteration {})",
        final_val.loss,
        final_val.accuracy * 100.0,
        ctx.best_val_loss,
        ctx.best_val_iteration
    );

    if let Some(path) = &args.save {
        net.save_weights(path)?;
        println!("Saved weights to {}", path);
    }
    Ok(())
}
