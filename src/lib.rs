//! Variational autoencoder training on image datasets with burn.
//!
//! [`training::launch`] wires a [`config::TrainingConfig`] to one of the
//! architectures in [`model`], an optimizer from [`optim`] or burn, and the
//! datasets in [`data`], then trains it while writing reconstructions, loss
//! curves and checkpoints through [`artifacts`].

pub mod artifacts;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod loss;
pub mod model;
pub mod optim;
pub mod training;

pub use config::{
    Architecture, DatasetConfig, DatasetSource, ModelConfig, OptimizerKind, ReconstructionKind,
    TrainingConfig,
};
pub use error::{Error, Result};
pub use training::{launch, Trainer};
