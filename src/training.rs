//! Epoch loop: optimise on the training split, evaluate on the test split,
//! write reconstructions, samples, checkpoints and loss history.

use std::path::{Path, PathBuf};

use burn::config::Config;
use burn::data::dataset::Dataset;
use burn::module::{AutodiffModule, Module};
use burn::optim::{AdaGradConfig, AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};

use crate::artifacts::{
    checkpoint_path, load_checkpoint, make_output_dir, save_checkpoint, save_image_grid,
    save_training_data, CheckpointMeta, LossHistory,
};
use crate::config::{Architecture, OptimizerKind, TrainingConfig};
use crate::data::{items_to_tensor, Augmentation, BatchLoader, ImageItem, ImageShape, Split};
use crate::error::{Error, Result};
use crate::loss::elbo;
use crate::model::{ConvVae, DenseVae, InceptionVae, VariationalModel};
use crate::optim::AdadeltaConfig;

/// Images per row of the reconstruction comparison.
const MAX_COMPARISON: usize = 8;
const SAMPLES_PER_ROW: usize = 8;

pub struct Trainer<B: AutodiffBackend> {
    config: TrainingConfig,
    device: B::Device,
    shape: ImageShape,
    output_dir: PathBuf,
    train_loader: BatchLoader,
    test_loader: BatchLoader,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(config: TrainingConfig, device: B::Device) -> Result<Self> {
        let shape = config.dataset.shape();
        let augmentation = config.augment.then(Augmentation::default);
        let train_loader =
            BatchLoader::new(config.batch_size, shape, config.num_workers, config.seed)?
                .with_shuffle(config.shuffle)
                .with_augmentation(augmentation);
        let test_loader = BatchLoader::new(
            config.batch_size,
            shape,
            config.num_workers,
            config.seed.wrapping_add(1),
        )?;

        Ok(Self {
            output_dir: PathBuf::from(&config.output_dir),
            config,
            device,
            shape,
            train_loader,
            test_loader,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// One pass over `dataset` with gradient updates. Returns the model after
    /// the last step and the per-image loss of every batch.
    pub fn train_epoch<M, O, D>(
        &mut self,
        mut model: M,
        optimizer: &mut O,
        epoch: usize,
        dataset: &D,
    ) -> Result<(M, Vec<f32>)>
    where
        M: AutodiffModule<B> + VariationalModel<B>,
        O: Optimizer<M, B>,
        D: Dataset<ImageItem> + ?Sized,
    {
        let total = dataset.len();
        let kl_weight = self.config.kl_weight_at(epoch);
        let batches = self.train_loader.batch_indices(total);
        let num_batches = batches.len();

        let mut epoch_loss = Vec::with_capacity(num_batches);
        let mut train_loss = 0.0f64;
        let mut recon_loss = 0.0f64;
        let mut kl_loss = 0.0f64;
        let mut seen = 0usize;

        for (batch_idx, indices) in batches.iter().enumerate() {
            let items = self.train_loader.load(dataset, indices);
            if items.is_empty() {
                tracing::warn!("Epoch {epoch}: batch {batch_idx} produced no images, skipping");
                continue;
            }
            let batch_len = items.len();
            let images = items_to_tensor::<B>(&items, self.shape, &self.device)?;

            let output = model.forward(images.clone());
            let loss = elbo(&output, images, self.config.reconstruction, kl_weight);

            let loss_value = loss.total.clone().into_scalar().elem::<f32>();
            if !loss_value.is_finite() {
                return Err(Error::Diverged {
                    epoch,
                    batch: batch_idx,
                    loss: loss_value,
                });
            }

            let grads = loss.total.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(self.config.learning_rate, model, grads);

            let per_image = loss_value / batch_len as f32;
            epoch_loss.push(per_image);
            train_loss += loss_value as f64;
            recon_loss += loss.reconstruction.into_scalar().elem::<f32>() as f64;
            kl_loss += loss.kl.into_scalar().elem::<f32>() as f64;

            if batch_idx % self.config.log_interval == 0 {
                tracing::info!(
                    "Train Epoch: {} [{}/{} ({:.0}%)]\tLoss: {:.6}",
                    epoch,
                    seen,
                    total,
                    100.0 * batch_idx as f64 / num_batches as f64,
                    per_image
                );
            }
            seen += batch_len;
        }

        let denominator = total.max(1) as f64;
        tracing::info!("{}", epoch_summary(epoch, train_loss / denominator));
        tracing::debug!(
            "Epoch {}: reconstruction {:.4}, kl {:.4}, kl weight {}",
            epoch,
            recon_loss / denominator,
            kl_loss / denominator,
            kl_weight
        );

        Ok((model, epoch_loss))
    }

    /// Loss over `dataset` without gradient tracking, averaged per image.
    /// The first batch is also written as `reconstruction_<epoch>.png`:
    /// inputs on the first row, reconstructions on the second.
    pub fn test_epoch<M, D>(&mut self, model: &M, epoch: usize, dataset: &D) -> Result<f32>
    where
        M: VariationalModel<B::InnerBackend>,
        D: Dataset<ImageItem> + ?Sized,
    {
        let total = dataset.len();
        let batches = self.test_loader.batch_indices(total);
        let mut test_loss = 0.0f64;
        let mut compared = false;

        for indices in batches.iter() {
            let items = self.test_loader.load(dataset, indices);
            if items.is_empty() {
                continue;
            }
            let images =
                items_to_tensor::<B::InnerBackend>(&items, self.shape, &self.device)?;

            let output = model.forward(images.clone());
            let loss = elbo(
                &output,
                images.clone(),
                self.config.reconstruction,
                self.config.kl_weight,
            );
            test_loss += loss.total.into_scalar().elem::<f32>() as f64;

            if !compared {
                let n = items.len().min(MAX_COMPARISON);
                let comparison = Tensor::cat(
                    vec![images.slice([0..n]), output.reconstruction.slice([0..n])],
                    0,
                );
                let path = self.output_dir.join(format!("reconstruction_{epoch}.png"));
                save_image_grid(comparison, n, &path)?;
                compared = true;
            }
        }

        let test_loss = (test_loss / total.max(1) as f64) as f32;
        tracing::info!("{}", test_summary(test_loss as f64));
        Ok(test_loss)
    }

    /// Decode draws from the prior into `sample_<epoch>.png`.
    pub fn save_samples<M>(&self, model: &M, epoch: usize) -> Result<()>
    where
        M: VariationalModel<B::InnerBackend>,
    {
        if self.config.num_samples == 0 {
            return Ok(());
        }
        let samples = model.sample(self.config.num_samples, &self.device);
        let path = self.output_dir.join(format!("sample_{epoch}.png"));
        save_image_grid(samples, SAMPLES_PER_ROW, &path)
    }

    /// Run every epoch, checkpointing along the way, and persist the loss
    /// history. Returns the trained model.
    pub fn fit<M, O, D1, D2>(
        &mut self,
        mut model: M,
        mut optimizer: O,
        train: &D1,
        test: &D2,
    ) -> Result<(M, LossHistory)>
    where
        M: AutodiffModule<B> + VariationalModel<B>,
        M::InnerModule: VariationalModel<B::InnerBackend>,
        O: Optimizer<M, B>,
        D1: Dataset<ImageItem> + ?Sized,
        D2: Dataset<ImageItem> + ?Sized,
    {
        if train.is_empty() {
            return Err(Error::Dataset("training split is empty".into()));
        }
        if test.is_empty() {
            return Err(Error::Dataset("test split is empty".into()));
        }
        make_output_dir(&self.output_dir)?;

        let epochs = self.config.epochs;
        let mut history = LossHistory::default();

        for epoch in 1..=epochs {
            let (trained, epoch_loss) = self.train_epoch(model, &mut optimizer, epoch, train)?;
            model = trained;

            let eval_model = model.valid();
            let test_loss = self.test_epoch(&eval_model, epoch, test)?;
            self.save_samples(&eval_model, epoch)?;

            history.train.extend(epoch_loss);
            history.test.push(test_loss);

            let interval = self.config.checkpoint_interval;
            if epoch == epochs || (interval > 0 && epoch % interval == 0) {
                let meta = checkpoint_meta(&self.config);
                save_checkpoint(&model, &meta, &checkpoint_path(&self.output_dir, epoch))?;
            }
        }

        save_training_data(&history, &self.output_dir)?;
        Ok((model, history))
    }
}

/// Build the configured model and optimizer, then train on the configured
/// dataset. The resolved configuration is written to `config.json` in the
/// output directory.
pub fn launch<B: AutodiffBackend>(config: TrainingConfig, device: B::Device) -> Result<LossHistory> {
    config.validate()?;
    B::seed(config.seed);

    let output_dir = PathBuf::from(&config.output_dir);
    make_output_dir(&output_dir)?;
    let config_path = output_dir.join("config.json");
    config
        .save(&config_path)
        .map_err(|err| Error::io(&config_path, err))?;

    let train = config.dataset.open(Split::Train)?;
    let test = config.dataset.open(Split::Test)?;
    let shape = config.dataset.shape();

    match config.model.architecture {
        Architecture::Dense => {
            let model = DenseVae::<B>::new(&config.model, shape, &device);
            run(model, config, device, &*train, &*test)
        }
        Architecture::Conv => {
            let model = ConvVae::<B>::new(&config.model, shape, &device);
            run(model, config, device, &*train, &*test)
        }
        Architecture::Inception => {
            let model = InceptionVae::<B>::new(&config.model, shape, &device);
            run(model, config, device, &*train, &*test)
        }
    }
}

/// Train an already constructed model with the configured optimizer.
pub fn run<B, M, D1, D2>(
    model: M,
    config: TrainingConfig,
    device: B::Device,
    train: &D1,
    test: &D2,
) -> Result<LossHistory>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + VariationalModel<B>,
    M::InnerModule: VariationalModel<B::InnerBackend>,
    D1: Dataset<ImageItem> + ?Sized,
    D2: Dataset<ImageItem> + ?Sized,
{
    let model = match &config.resume {
        Some(path) => {
            let meta = checkpoint_meta(&config);
            load_checkpoint(model, &meta, Path::new(path), &device)?
        }
        None => model,
    };
    log_summary::<B, M>(&model, &config);

    let optimizer_kind = config.optimizer;
    let mut trainer = Trainer::<B>::new(config, device)?;
    let (_, history) = match optimizer_kind {
        OptimizerKind::Adam => {
            trainer.fit(model, AdamConfig::new().init::<B, M>(), train, test)?
        }
        OptimizerKind::Adagrad => {
            trainer.fit(model, AdaGradConfig::new().init::<B, M>(), train, test)?
        }
        OptimizerKind::Adadelta => {
            trainer.fit(model, AdadeltaConfig::new().init::<B, M>(), train, test)?
        }
    };
    Ok(history)
}

fn epoch_summary(epoch: usize, average: f64) -> String {
    format!("====> Epoch: {epoch} Average loss: {average:.4}")
}

fn test_summary(loss: f64) -> String {
    format!("====> Test set loss: {loss:.4}")
}

fn checkpoint_meta(config: &TrainingConfig) -> CheckpointMeta {
    CheckpointMeta {
        model: config.model.clone(),
        shape: config.dataset.shape(),
    }
}

fn log_summary<B: Backend, M: Module<B>>(model: &M, config: &TrainingConfig) {
    tracing::info!(
        "Model: {} ({} parameters, latent dim {}, input {}x{}x{})",
        config.model.architecture.name(),
        model.num_params(),
        config.model.latent_dim,
        config.dataset.channels,
        config.dataset.image_size,
        config.dataset.image_size
    );
    tracing::info!(
        "Optimizer: {:?} (learning rate {}), batch size {}, {} epochs",
        config.optimizer,
        config.learning_rate,
        config.batch_size,
        config.epochs
    );
}

/// Decode `count` prior samples with the weights stored at `checkpoint`,
/// rebuilding the architecture described by `config`.
pub fn sample_from_checkpoint<B: Backend>(
    config: &TrainingConfig,
    checkpoint: &Path,
    count: usize,
    output: &Path,
    device: &B::Device,
) -> Result<()> {
    config.validate()?;
    if count == 0 {
        return Err(Error::Config("sample count must be positive".into()));
    }
    let shape = config.dataset.shape();
    let meta = checkpoint_meta(config);

    let samples = match config.model.architecture {
        Architecture::Dense => {
            let model = DenseVae::<B>::new(&config.model, shape, device);
            load_checkpoint(model, &meta, checkpoint, device)?.sample(count, device)
        }
        Architecture::Conv => {
            let model = ConvVae::<B>::new(&config.model, shape, device);
            load_checkpoint(model, &meta, checkpoint, device)?.sample(count, device)
        }
        Architecture::Inception => {
            let model = InceptionVae::<B>::new(&config.model, shape, device);
            load_checkpoint(model, &meta, checkpoint, device)?.sample(count, device)
        }
    };
    save_image_grid(samples, SAMPLES_PER_ROW, output)
}
