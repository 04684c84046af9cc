//! Image datasets and batching.
//!
//! Every dataset yields [`ImageItem`]s holding a CHW float buffer in `[0, 1]`
//! and implements burn's [`Dataset`] trait, so in-memory datasets from burn
//! can be used interchangeably with the file-backed ones here.

mod augment;
mod folder;
mod loader;
mod stl10;

pub use augment::Augmentation;
pub use folder::ImageFolderDataset;
pub use loader::{items_to_tensor, BatchLoader};
pub use stl10::{Stl10Dataset, STL10_CHANNELS, STL10_CLASSES, STL10_IMAGE_SIZE};

use std::path::Path;

use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

use crate::config::{DatasetConfig, DatasetSource};
use crate::error::Result;

/// Channel count and side length of the square images fed to the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub channels: usize,
    pub size: usize,
}

impl ImageShape {
    pub fn new(channels: usize, size: usize) -> Self {
        Self { channels, size }
    }

    /// Values per image.
    pub fn numel(&self) -> usize {
        self.channels * self.size * self.size
    }

    pub fn plane(&self) -> usize {
        self.size * self.size
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageItem {
    /// Channel-major pixels scaled to `[0, 1]`.
    pub pixels: Vec<f32>,
    pub label: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }
}

pub type BoxedDataset = Box<dyn Dataset<ImageItem>>;

impl DatasetConfig {
    /// Open one split of the configured dataset.
    pub fn open(&self, split: Split) -> Result<BoxedDataset> {
        let root = Path::new(&self.root);
        let dataset: BoxedDataset = match self.source {
            DatasetSource::Stl10 => Box::new(Stl10Dataset::open(root, split.name())?),
            DatasetSource::Folder => Box::new(ImageFolderDataset::new(
                root.join(split.name()),
                self.shape(),
            )?),
        };
        tracing::info!(
            "{} split: {} images from {}",
            split.name(),
            dataset.len(),
            root.display()
        );
        Ok(dataset)
    }
}
