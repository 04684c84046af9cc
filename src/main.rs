use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use burn::backend::ndarray::NdArrayDevice;
use burn::backend::wgpu::WgpuDevice;
use burn::backend::{Autodiff, NdArray, Wgpu};
use clap::{Args, Parser, Subcommand, ValueEnum};

use vae_trainer::config::{
    Architecture, DatasetConfig, DatasetSource, ModelConfig, OptimizerKind, ReconstructionKind,
    TrainingConfig,
};
use vae_trainer::logging::init_tracing;
use vae_trainer::training::{launch, sample_from_checkpoint};

#[derive(Parser)]
#[command(name = "vae-trainer")]
#[command(about = "Train a variational autoencoder on an image dataset")]
struct Cli {
    /// Compute backend
    #[arg(long, value_enum, default_value_t = BackendKind::Wgpu, global = true)]
    backend: BackendKind,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// GPU through wgpu
    Wgpu,
    /// CPU through ndarray
    Ndarray,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model, writing reconstructions, losses and checkpoints
    Train(TrainArgs),

    /// Decode samples from the prior with a trained checkpoint
    Sample {
        /// Run directory holding config.json
        #[arg(long, default_value = "results")]
        run: PathBuf,
        /// Checkpoint path (without extension)
        #[arg(long)]
        checkpoint: PathBuf,
        #[arg(long, default_value_t = 64)]
        count: usize,
        #[arg(short, long, default_value = "samples.png")]
        output: PathBuf,
    },
}

/// Flags left unset keep the value from `--config`, or the default.
#[derive(Args, Debug)]
struct TrainArgs {
    /// JSON training configuration to start from
    #[arg(long)]
    config: Option<PathBuf>,

    /// Learning rate
    #[arg(long)]
    lr: Option<f64>,
    /// Number of epochs to train
    #[arg(long)]
    epochs: Option<usize>,
    #[arg(long, value_enum)]
    optimizer: Option<OptimizerKind>,

    #[arg(long, value_enum)]
    dataset: Option<DatasetSource>,
    /// STL-10 binary directory, or folder holding train/ and test/
    #[arg(long)]
    data_root: Option<String>,
    #[arg(long)]
    image_size: Option<usize>,
    #[arg(long)]
    channels: Option<usize>,
    /// Threads decoding each batch
    #[arg(long)]
    num_workers: Option<usize>,
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long)]
    no_shuffle: bool,
    #[arg(long)]
    augment: bool,

    #[arg(long, value_enum)]
    architecture: Option<Architecture>,
    #[arg(long)]
    latent_dim: Option<usize>,
    #[arg(long)]
    hidden_dim: Option<usize>,
    #[arg(long)]
    base_channels: Option<usize>,

    #[arg(long, value_enum)]
    reconstruction: Option<ReconstructionKind>,
    /// Weight of the KL term (1.0 is the plain ELBO)
    #[arg(long)]
    kl_weight: Option<f32>,
    #[arg(long)]
    kl_warmup_epochs: Option<usize>,

    /// Directory for reconstructions, loss data and checkpoints
    #[arg(long)]
    output_dir_name: Option<String>,
    /// How many batches to wait before logging training status
    #[arg(long)]
    log_interval: Option<usize>,
    /// Prior samples to decode after each epoch
    #[arg(long)]
    samples: Option<usize>,
    /// Epochs between checkpoints (the final epoch is always saved)
    #[arg(long)]
    checkpoint_interval: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
    /// Checkpoint to start from
    #[arg(long)]
    resume: Option<String>,
}

impl TrainArgs {
    fn into_config(self) -> Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::from_file(path)?,
            None => TrainingConfig::new(ModelConfig::new(), DatasetConfig::new()),
        };

        if let Some(v) = self.lr {
            config.learning_rate = v;
        }
        if let Some(v) = self.epochs {
            config.epochs = v;
        }
        if let Some(v) = self.optimizer {
            config.optimizer = v;
        }
        if let Some(v) = self.dataset {
            config.dataset.source = v;
        }
        if let Some(v) = self.data_root {
            config.dataset.root = v;
        }
        if let Some(v) = self.image_size {
            config.dataset.image_size = v;
        }
        if let Some(v) = self.channels {
            config.dataset.channels = v;
        }
        if let Some(v) = self.num_workers {
            config.num_workers = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if self.no_shuffle {
            config.shuffle = false;
        }
        if self.augment {
            config.augment = true;
        }
        if let Some(v) = self.architecture {
            config.model.architecture = v;
        }
        if let Some(v) = self.latent_dim {
            config.model.latent_dim = v;
        }
        if let Some(v) = self.hidden_dim {
            config.model.hidden_dim = v;
        }
        if let Some(v) = self.base_channels {
            config.model.base_channels = v;
        }
        if let Some(v) = self.reconstruction {
            config.reconstruction = v;
        }
        if let Some(v) = self.kl_weight {
            config.kl_weight = v;
        }
        if let Some(v) = self.kl_warmup_epochs {
            config.kl_warmup_epochs = v;
        }
        if let Some(v) = self.output_dir_name {
            config.output_dir = v;
        }
        if let Some(v) = self.log_interval {
            config.log_interval = v;
        }
        if let Some(v) = self.samples {
            config.num_samples = v;
        }
        if let Some(v) = self.checkpoint_interval {
            config.checkpoint_interval = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if self.resume.is_some() {
            config.resume = self.resume;
        }
        Ok(config)
    }
}

fn train(backend: BackendKind, args: TrainArgs) -> Result<()> {
    let config = args.into_config()?;
    let output_dir = config.output_dir.clone();

    let history = match backend {
        BackendKind::Wgpu => {
            let device = WgpuDevice::default();
            tracing::info!("Using device: {:?}", device);
            launch::<Autodiff<Wgpu>>(config, device)
        }
        BackendKind::Ndarray => launch::<Autodiff<NdArray>>(config, NdArrayDevice::Cpu),
    }
    .context("training failed")?;

    if let Some(last) = history.test.last() {
        tracing::info!("Final test loss {last:.4}; results in {output_dir}");
    }
    Ok(())
}

fn sample(
    backend: BackendKind,
    run: PathBuf,
    checkpoint: PathBuf,
    count: usize,
    output: PathBuf,
) -> Result<()> {
    let config_path = run.join("config.json");
    let config = TrainingConfig::from_file(&config_path)
        .with_context(|| format!("loading run configuration {}", config_path.display()))?;

    match backend {
        BackendKind::Wgpu => {
            sample_from_checkpoint::<Wgpu>(&config, &checkpoint, count, &output, &WgpuDevice::default())
        }
        BackendKind::Ndarray => {
            sample_from_checkpoint::<NdArray>(&config, &checkpoint, count, &output, &NdArrayDevice::Cpu)
        }
    }
    .with_context(|| format!("sampling from {}", checkpoint.display()))?;

    tracing::info!("Wrote {count} samples to {}", output.display());
    Ok(())
}

fn main() -> ExitCode {
    init_tracing("info");
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Train(args) => train(cli.backend, args),
        Commands::Sample {
            run,
            checkpoint,
            count,
            output,
        } => sample(cli.backend, run, checkpoint, count, output),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
