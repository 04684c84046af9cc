use std::path::Path;

use burn::config::Config;
use serde::{Deserialize, Serialize};

use crate::data::{ImageShape, STL10_CHANNELS, STL10_IMAGE_SIZE};
use crate::error::{self, Error};

/// Encoder/decoder family.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    /// Fully connected encoder and decoder.
    Dense,
    /// Strided convolutions with batch norm.
    Conv,
    /// Inception blocks between strided convolutions.
    Inception,
}

impl Architecture {
    pub fn name(&self) -> &'static str {
        match self {
            Architecture::Dense => "DenseVae",
            Architecture::Conv => "ConvVae",
            Architecture::Inception => "InceptionVae",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Adam,
    Adagrad,
    Adadelta,
}

/// Reconstruction term of the evidence lower bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReconstructionKind {
    /// Summed binary cross entropy, pixels treated as Bernoulli.
    Bce,
    /// Summed squared error.
    Mse,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DatasetSource {
    /// STL-10 binary distribution (`train_X.bin`, `test_X.bin`, ...).
    Stl10,
    /// `train/` and `test/` directories of image files.
    Folder,
}

#[derive(Config, Debug, PartialEq)]
pub struct ModelConfig {
    #[config(default = "Architecture::Inception")]
    pub architecture: Architecture,

    #[config(default = 128)]
    pub latent_dim: usize,

    /// Width of the hidden layer of the dense architecture.
    #[config(default = 400)]
    pub hidden_dim: usize,

    /// Channels after the first convolution; deeper stages use multiples.
    #[config(default = 32)]
    pub base_channels: usize,
}

impl ModelConfig {
    pub fn validate(&self, shape: ImageShape) -> error::Result<()> {
        if self.latent_dim == 0 {
            return Err(Error::Config("latent_dim must be positive".into()));
        }
        if self.architecture == Architecture::Dense && self.hidden_dim == 0 {
            return Err(Error::Config("hidden_dim must be positive".into()));
        }
        if self.architecture != Architecture::Dense
            && (self.base_channels == 0 || self.base_channels % 2 != 0)
        {
            return Err(Error::Config(format!(
                "base_channels must be a positive even number, got {}",
                self.base_channels
            )));
        }
        let factor = match self.architecture {
            Architecture::Dense => 1,
            Architecture::Conv => 4,
            Architecture::Inception => 16,
        };
        if shape.size % factor != 0 {
            return Err(Error::Config(format!(
                "{} needs an image size divisible by {factor}, got {}",
                self.architecture.name(),
                shape.size
            )));
        }
        Ok(())
    }
}

#[derive(Config, Debug)]
pub struct DatasetConfig {
    #[config(default = "DatasetSource::Stl10")]
    pub source: DatasetSource,

    #[config(default = "String::from(\"data/stl10_binary\")")]
    pub root: String,

    #[config(default = 96)]
    pub image_size: usize,

    #[config(default = 3)]
    pub channels: usize,
}

impl DatasetConfig {
    pub fn shape(&self) -> ImageShape {
        ImageShape::new(self.channels, self.image_size)
    }

    pub fn validate(&self) -> error::Result<()> {
        if self.image_size == 0 {
            return Err(Error::Config("image_size must be positive".into()));
        }
        if !matches!(self.channels, 1 | 3) {
            return Err(Error::Config(format!(
                "channels must be 1 or 3, got {}",
                self.channels
            )));
        }
        if self.source == DatasetSource::Stl10
            && (self.image_size != STL10_IMAGE_SIZE || self.channels != STL10_CHANNELS)
        {
            return Err(Error::Config(format!(
                "STL-10 images are {STL10_CHANNELS}x{STL10_IMAGE_SIZE}x{STL10_IMAGE_SIZE}, \
                 got {}x{}x{}",
                self.channels, self.image_size, self.image_size
            )));
        }
        Ok(())
    }
}

#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub model: ModelConfig,

    pub dataset: DatasetConfig,

    #[config(default = "OptimizerKind::Adam")]
    pub optimizer: OptimizerKind,

    #[config(default = 1e-3)]
    pub learning_rate: f64,

    #[config(default = 10)]
    pub epochs: usize,

    #[config(default = 64)]
    pub batch_size: usize,

    /// Threads decoding images for each batch.
    #[config(default = 2)]
    pub num_workers: usize,

    /// Batches between two progress lines.
    #[config(default = 100)]
    pub log_interval: usize,

    #[config(default = "ReconstructionKind::Bce")]
    pub reconstruction: ReconstructionKind,

    /// Multiplier of the KL term; 1.0 is the plain ELBO.
    #[config(default = 1.0)]
    pub kl_weight: f32,

    /// Epochs over which the KL weight ramps up to `kl_weight`, 0 disables.
    #[config(default = 0)]
    pub kl_warmup_epochs: usize,

    /// Images decoded from the prior after every epoch, 0 disables.
    #[config(default = 0)]
    pub num_samples: usize,

    /// Epochs between model checkpoints, 0 keeps only the final one.
    #[config(default = 0)]
    pub checkpoint_interval: usize,

    #[config(default = true)]
    pub shuffle: bool,

    #[config(default = false)]
    pub augment: bool,

    #[config(default = 42)]
    pub seed: u64,

    #[config(default = "String::from(\"results\")")]
    pub output_dir: String,

    /// Checkpoint to initialise the model weights from.
    pub resume: Option<String>,
}

impl TrainingConfig {
    pub fn from_file(path: impl AsRef<Path>) -> error::Result<Self> {
        let path = path.as_ref();
        Self::load(path).map_err(|err| {
            Error::Config(format!("cannot read {}: {err:?}", path.display()))
        })
    }

    pub fn validate(&self) -> error::Result<()> {
        self.dataset.validate()?;
        self.model.validate(self.dataset.shape())?;
        if self.epochs == 0 {
            return Err(Error::Config("epochs must be positive".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".into()));
        }
        if self.log_interval == 0 {
            return Err(Error::Config("log_interval must be positive".into()));
        }
        if !(self.learning_rate > 0.0) {
            return Err(Error::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.kl_weight >= 0.0) {
            return Err(Error::Config(format!(
                "kl_weight must be non-negative, got {}",
                self.kl_weight
            )));
        }
        Ok(())
    }

    /// KL weight used during `epoch` (1-based).
    pub fn kl_weight_at(&self, epoch: usize) -> f32 {
        if self.kl_warmup_epochs == 0 || epoch >= self.kl_warmup_epochs {
            return self.kl_weight;
        }
        self.kl_weight * epoch.max(1) as f32 / self.kl_warmup_epochs as f32
    }
}
