//! Files written next to a training run: image grids, loss history and
//! model checkpoints.

use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{CompactRecorder, Recorder};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::data::ImageShape;
use crate::error::{Error, Result};

/// Border between and around grid tiles, in pixels.
pub const GRID_PADDING: usize = 2;

const CHECKPOINT_DIR: &str = "checkpoints";

/// Loss curves of a run: one entry per training batch (per-image loss) and
/// one per epoch for the test split.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LossHistory {
    pub train: Vec<f32>,
    pub test: Vec<f32>,
}

/// Model layout stored as `<checkpoint>.json` and checked before weights
/// are loaded into a freshly built model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub model: ModelConfig,
    pub shape: ImageShape,
}

pub fn make_output_dir(dir: &Path) -> Result<()> {
    let checkpoints = dir.join(CHECKPOINT_DIR);
    fs::create_dir_all(&checkpoints).map_err(|err| Error::io(&checkpoints, err))
}

pub fn checkpoint_path(dir: &Path, epoch: usize) -> PathBuf {
    dir.join(CHECKPOINT_DIR).join(format!("model_epoch_{epoch}"))
}

/// Tile `[N, C, H, W]` images in `[0, 1]`, `nrow` per row, on a black
/// background. Single-channel images are expanded to grey RGB.
pub fn image_grid<B: Backend>(images: Tensor<B, 4>, nrow: usize) -> Result<RgbImage> {
    let [n, channels, height, width] = images.dims();
    if n == 0 || !matches!(channels, 1 | 3) {
        return Err(Error::Tensor(format!(
            "cannot build an image grid from {n} images with {channels} channels"
        )));
    }
    let values: Vec<f32> = images
        .into_data()
        .convert::<f32>()
        .to_vec()
        .map_err(|err| Error::Tensor(format!("{err:?}")))?;

    let columns = nrow.clamp(1, n);
    let rows = n.div_ceil(columns);
    let tile_h = height + GRID_PADDING;
    let tile_w = width + GRID_PADDING;
    let mut grid = RgbImage::new(
        (columns * tile_w + GRID_PADDING) as u32,
        (rows * tile_h + GRID_PADDING) as u32,
    );

    let plane = height * width;
    for (index, image) in values.chunks_exact(channels * plane).enumerate() {
        let top = (index / columns) * tile_h + GRID_PADDING;
        let left = (index % columns) * tile_w + GRID_PADDING;
        for y in 0..height {
            for x in 0..width {
                let offset = y * width + x;
                let channel = |c: usize| to_u8(image[c.min(channels - 1) * plane + offset]);
                grid.put_pixel(
                    (left + x) as u32,
                    (top + y) as u32,
                    Rgb([channel(0), channel(1), channel(2)]),
                );
            }
        }
    }

    Ok(grid)
}

fn to_u8(value: f32) -> u8 {
    (value * 255.0 + 0.5).clamp(0.0, 255.0) as u8
}

pub fn save_image_grid<B: Backend>(images: Tensor<B, 4>, nrow: usize, path: &Path) -> Result<()> {
    image_grid(images, nrow)?
        .save(path)
        .map_err(|err| Error::image(path, err))
}

/// Write `loss_history.json`, `train_loss.csv` and `test_loss.csv`.
pub fn save_training_data(history: &LossHistory, dir: &Path) -> Result<()> {
    let json_path = dir.join("loss_history.json");
    let json = serde_json::to_string_pretty(history)?;
    fs::write(&json_path, json).map_err(|err| Error::io(&json_path, err))?;

    write_csv(&dir.join("train_loss.csv"), "step", &history.train, 0)?;
    write_csv(&dir.join("test_loss.csv"), "epoch", &history.test, 1)?;

    tracing::info!(
        "Saved {} training and {} test losses to {}",
        history.train.len(),
        history.test.len(),
        dir.display()
    );
    Ok(())
}

fn write_csv(path: &Path, index_name: &str, values: &[f32], first_index: usize) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([index_name, "loss"])?;
    for (i, value) in values.iter().enumerate() {
        writer.write_record(&[(i + first_index).to_string(), value.to_string()])?;
    }
    writer.flush().map_err(|err| Error::io(path, err))
}

pub fn save_model<B: Backend, M: Module<B>>(model: &M, path: &Path) -> Result<()> {
    CompactRecorder::new().record(model.clone().into_record(), path.to_path_buf())?;
    tracing::info!("Model saved to {}", path.display());
    Ok(())
}

pub fn load_model<B: Backend, M: Module<B>>(
    model: M,
    path: &Path,
    device: &B::Device,
) -> Result<M> {
    let record = CompactRecorder::new().load(path.to_path_buf(), device)?;
    tracing::info!("Model loaded from {}", path.display());
    Ok(model.load_record(record))
}

/// Save the weights together with the layout they belong to.
pub fn save_checkpoint<B: Backend, M: Module<B>>(
    model: &M,
    meta: &CheckpointMeta,
    path: &Path,
) -> Result<()> {
    save_model(model, path)?;
    let meta_path = path.with_extension("json");
    let json = serde_json::to_string_pretty(meta)?;
    fs::write(&meta_path, json).map_err(|err| Error::io(&meta_path, err))
}

/// Load weights saved by [`save_checkpoint`], refusing checkpoints whose
/// layout differs from `meta`.
pub fn load_checkpoint<B: Backend, M: Module<B>>(
    model: M,
    meta: &CheckpointMeta,
    path: &Path,
    device: &B::Device,
) -> Result<M> {
    let meta_path = path.with_extension("json");
    let json = fs::read_to_string(&meta_path).map_err(|err| Error::io(&meta_path, err))?;
    let stored: CheckpointMeta = serde_json::from_str(&json)?;
    if &stored != meta {
        return Err(Error::Config(format!(
            "checkpoint {} holds a {} (latent {}, hidden {}, base channels {}) for {}x{}x{} \
             images, expected a {} (latent {}, hidden {}, base channels {}) for {}x{}x{}",
            path.display(),
            stored.model.architecture.name(),
            stored.model.latent_dim,
            stored.model.hidden_dim,
            stored.model.base_channels,
            stored.shape.channels,
            stored.shape.size,
            stored.shape.size,
            meta.model.architecture.name(),
            meta.model.latent_dim,
            meta.model.hidden_dim,
            meta.model.base_channels,
            meta.shape.channels,
            meta.shape.size,
            meta.shape.size,
        )));
    }
    load_model(model, path, device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::nn::{Linear, LinearConfig};

    type TestBackend = NdArray;

    #[test]
    fn grid_places_tiles_with_padding() {
        let device = Default::default();
        let mut data = vec![0.0f32; 3 * 3 * 2 * 2];
        // second image fully white
        for v in data[12..24].iter_mut() {
            *v = 1.0;
        }
        let images = Tensor::<TestBackend, 1>::from_floats(data.as_slice(), &device)
            .reshape([3, 3, 2, 2]);

        let grid = image_grid(images, 2).unwrap();
        // two columns, two rows of 2x2 tiles
        assert_eq!(grid.dimensions(), (2 * 4 + 2, 2 * 4 + 2));
        assert_eq!(grid.get_pixel(2, 2), &Rgb([0, 0, 0]));
        assert_eq!(grid.get_pixel(6, 2), &Rgb([255, 255, 255]));
        assert_eq!(grid.get_pixel(7, 3), &Rgb([255, 255, 255]));
        assert_eq!(grid.get_pixel(5, 2), &Rgb([0, 0, 0]));
    }

    #[test]
    fn grayscale_tiles_expand_to_rgb() {
        let device = Default::default();
        let images = Tensor::<TestBackend, 4>::full([1, 1, 1, 1], 0.5, &device);
        let grid = image_grid(images, 8).unwrap();
        assert_eq!(grid.dimensions(), (5, 5));
        assert_eq!(grid.get_pixel(2, 2), &Rgb([128, 128, 128]));
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        assert_eq!(to_u8(-0.3), 0);
        assert_eq!(to_u8(1.7), 255);
        assert_eq!(to_u8(0.0), 0);
        assert_eq!(to_u8(1.0), 255);
    }

    #[test]
    fn writes_loss_history_files() {
        let dir = tempfile::tempdir().unwrap();
        let history = LossHistory {
            train: vec![3.0, 2.5, 2.0],
            test: vec![2.2],
        };
        save_training_data(&history, dir.path()).unwrap();

        let json = fs::read_to_string(dir.path().join("loss_history.json")).unwrap();
        let parsed: LossHistory = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, history);

        let train = fs::read_to_string(dir.path().join("train_loss.csv")).unwrap();
        assert_eq!(train, "step,loss\n0,3\n1,2.5\n2,2\n");
        let test = fs::read_to_string(dir.path().join("test_loss.csv")).unwrap();
        assert_eq!(test, "epoch,loss\n1,2.2\n");
    }

    #[test]
    fn loss_csv_parses_back() {
        let dir = tempfile::tempdir().unwrap();
        let history = LossHistory {
            train: vec![0.125, 4.0],
            test: vec![1.5, 0.75, 0.5],
        };
        save_training_data(&history, dir.path()).unwrap();

        let mut reader = csv::Reader::from_path(dir.path().join("test_loss.csv")).unwrap();
        assert_eq!(reader.headers().unwrap().iter().collect::<Vec<_>>(), vec!["epoch", "loss"]);
        let rows: Vec<(usize, f32)> = reader.deserialize().map(|row| row.unwrap()).collect();
        assert_eq!(rows, vec![(1, 1.5), (2, 0.75), (3, 0.5)]);

        let mut reader = csv::Reader::from_path(dir.path().join("train_loss.csv")).unwrap();
        assert_eq!(reader.headers().unwrap().iter().collect::<Vec<_>>(), vec!["step", "loss"]);
        let rows: Vec<(usize, f32)> = reader.deserialize().map(|row| row.unwrap()).collect();
        assert_eq!(rows, vec![(0, 0.125), (1, 4.0)]);
    }

    #[test]
    fn checkpoint_with_other_layout_is_rejected() {
        use crate::config::Architecture;
        use crate::model::{DenseVae, VariationalModel};

        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        make_output_dir(dir.path()).unwrap();
        let path = checkpoint_path(dir.path(), 1);
        let shape = ImageShape::new(1, 4);
        let config = ModelConfig::new()
            .with_architecture(Architecture::Dense)
            .with_latent_dim(4)
            .with_hidden_dim(8);
        let meta = CheckpointMeta {
            model: config.clone(),
            shape,
        };

        let saved = DenseVae::<TestBackend>::new(&config, shape, &device);
        save_checkpoint(&saved, &meta, &path).unwrap();
        assert!(path.with_extension("json").is_file());

        let restored = load_checkpoint(
            DenseVae::<TestBackend>::new(&config, shape, &device),
            &meta,
            &path,
            &device,
        )
        .unwrap();
        assert_eq!(restored.sample(2, &device).dims(), [2, 1, 4, 4]);

        let wider = config.with_latent_dim(6);
        let other = CheckpointMeta {
            model: wider.clone(),
            shape,
        };
        let err = load_checkpoint(
            DenseVae::<TestBackend>::new(&wider, shape, &device),
            &other,
            &path,
            &device,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn checkpoints_restore_weights() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        make_output_dir(dir.path()).unwrap();
        let path = checkpoint_path(dir.path(), 3);

        let saved: Linear<TestBackend> = LinearConfig::new(4, 2).init(&device);
        save_model(&saved, &path).unwrap();

        let fresh: Linear<TestBackend> = LinearConfig::new(4, 2).init(&device);
        let restored = load_model(fresh, &path, &device).unwrap();
        restored
            .weight
            .val()
            .into_data()
            .assert_eq(&saved.weight.val().into_data(), true);
    }
}
