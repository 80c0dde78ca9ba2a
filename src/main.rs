use anyhow::Result;
use chrono::Local;
use clap::Parser;
use digit_sgd::dataset::error_fraction;
use digit_sgd::evaluator::accuracy;
use digit_sgd::persist::{artifact_stem, save_history, save_network};
use digit_sgd::{Dataset, Evaluator, Hyperparameters, MnistData, Network, Sgd};
use ndarray_rand::rand::{SeedableRng, rngs::StdRng};
use std::{fs, path::PathBuf};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "digit-sgd")]
#[command(about = "Train a feed-forward network on the MNIST digits", long_about = None)]
struct Cli {
    /// Initial learning rate
    learning_rate: Option<f64>,

    /// Momentum coefficient, in [0, 1)
    momentum: Option<f64>,

    /// Factor applied to the learning rate when accuracy stalls
    decay: Option<f64>,

    /// Epochs without improvement before decaying
    decay_threshold: Option<usize>,

    /// Epochs without improvement before stopping
    stop_threshold: Option<usize>,

    /// Minibatch size
    minibatch_size: Option<usize>,

    /// Layer sizes, comma separated
    #[arg(long, value_delimiter = ',')]
    architecture: Option<Vec<usize>>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    max_epochs: Option<usize>,

    /// Minibatches between training cost reports [default: a fiftieth of an epoch]
    #[arg(long)]
    log_interval: Option<usize>,

    /// Directory holding the gzipped MNIST files
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Directory the trained network and its history are written to
    #[arg(long, default_value = "networks")]
    output_dir: PathBuf,

    /// Verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

impl Cli {
    // Anything not given on the command line keeps its default.
    fn hyperparameters(&self) -> Hyperparameters {
        let defaults = Hyperparameters::default();
        Hyperparameters {
            learning_rate: self.learning_rate.unwrap_or(defaults.learning_rate),
            momentum: self.momentum.unwrap_or(defaults.momentum),
            decay: self.decay.unwrap_or(defaults.decay),
            decay_threshold: self.decay_threshold.unwrap_or(defaults.decay_threshold),
            stop_threshold: self.stop_threshold.unwrap_or(defaults.stop_threshold),
            minibatch_size: self.minibatch_size.unwrap_or(defaults.minibatch_size),
            max_epochs: self.max_epochs.unwrap_or(defaults.max_epochs),
            architecture: self.architecture.clone().unwrap_or(defaults.architecture),
            seed: self.seed.unwrap_or(defaults.seed),
            ..defaults
        }
    }
}

// The error on `dataset` as a percentage.
fn error_percentage(dataset: &Dataset, network: &Network, chunk_size: usize) -> Result<f64> {
    let correct = accuracy(dataset, network, chunk_size)?;
    Ok(100.0 * error_fraction(correct, dataset.len()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut hyperparameters = cli.hyperparameters();
    hyperparameters.validate()?;

    let mnist = MnistData::load(&cli.data_dir)?;
    hyperparameters.log_interval = cli
        .log_interval
        .unwrap_or((mnist.training.len() / 50).max(1));
    info!("Hyperparameters: {hyperparameters:?}");

    // One seeded generator drives both the initial weights and the shuffling, so a run can be
    // repeated exactly.
    let mut rng = StdRng::seed_from_u64(hyperparameters.seed);
    let mut network = Network::new(
        &hyperparameters.architecture,
        hyperparameters.initial_weight_magnitude,
        &mut rng,
    )?;

    let mut scheduler = hyperparameters.decay_scheduler();
    let mut evaluator = Evaluator::new(&mnist.training, &mnist.validation)
        .with_log_interval(hyperparameters.log_interval)
        .with_chunk_size(hyperparameters.chunk_size);

    let history = Sgd::new().sgd(
        &mut network,
        &mnist.training,
        hyperparameters.minibatch_size,
        hyperparameters.momentum,
        &mut evaluator,
        &mut scheduler,
        &mut rng,
    )?;

    // Keep whichever network did best on the validation set, not the one training ended with.
    let best = scheduler.into_best_network().unwrap_or(network);
    let validation_error = error_percentage(&mnist.validation, &best, hyperparameters.chunk_size)?;
    let test_error = error_percentage(&mnist.test, &best, hyperparameters.chunk_size)?;
    info!("Validation error: {validation_error}%");
    info!("Test error: {test_error}%");

    fs::create_dir_all(&cli.output_dir)?;
    let stem = artifact_stem(
        &Local::now(),
        &best.architecture(),
        validation_error,
        test_error,
        &hyperparameters,
    );
    save_network(&best, cli.output_dir.join(format!("{stem}.json")))?;
    save_history(&history, cli.output_dir.join(format!("{stem}_history.json")))?;

    Ok(())
}
