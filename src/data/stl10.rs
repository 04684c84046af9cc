use std::fs;
use std::path::Path;

use burn::data::dataset::Dataset;

use super::ImageItem;
use crate::error::{Error, Result};

pub const STL10_IMAGE_SIZE: usize = 96;
pub const STL10_CHANNELS: usize = 3;
pub const STL10_CLASSES: u8 = 10;

const PLANE: usize = STL10_IMAGE_SIZE * STL10_IMAGE_SIZE;
const IMAGE_BYTES: usize = STL10_CHANNELS * PLANE;

/// STL-10 binary split (`<split>_X.bin` with an optional `<split>_y.bin`).
///
/// Each image is stored as three 96x96 planes, each plane column-major.
/// Labels on disk run from 1 to 10 and are exposed as 0 to 9.
pub struct Stl10Dataset {
    images: Vec<u8>,
    labels: Option<Vec<u8>>,
    len: usize,
}

impl Stl10Dataset {
    pub fn open(root: &Path, split: &str) -> Result<Self> {
        let images_path = root.join(format!("{split}_X.bin"));
        let images = fs::read(&images_path).map_err(|err| Error::io(&images_path, err))?;

        let labels_path = root.join(format!("{split}_y.bin"));
        let labels = if labels_path.exists() {
            Some(fs::read(&labels_path).map_err(|err| Error::io(&labels_path, err))?)
        } else {
            None
        };

        Self::from_bytes(images, labels)
    }

    pub fn from_bytes(images: Vec<u8>, labels: Option<Vec<u8>>) -> Result<Self> {
        if images.is_empty() || images.len() % IMAGE_BYTES != 0 {
            return Err(Error::Dataset(format!(
                "STL-10 image data has {} bytes, expected a positive multiple of {IMAGE_BYTES}",
                images.len()
            )));
        }
        let len = images.len() / IMAGE_BYTES;

        if let Some(labels) = &labels {
            if labels.len() != len {
                return Err(Error::Dataset(format!(
                    "STL-10 split has {len} images but {} labels",
                    labels.len()
                )));
            }
            if let Some(position) = labels
                .iter()
                .position(|label| !(1..=STL10_CLASSES).contains(label))
            {
                return Err(Error::Dataset(format!(
                    "STL-10 label {} of image {position} is outside 1..={STL10_CLASSES}",
                    labels[position]
                )));
            }
        }

        Ok(Self {
            images,
            labels,
            len,
        })
    }
}

impl Dataset<ImageItem> for Stl10Dataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        if index >= self.len {
            return None;
        }
        let raw = &self.images[index * IMAGE_BYTES..(index + 1) * IMAGE_BYTES];

        let mut pixels = Vec::with_capacity(IMAGE_BYTES);
        for channel in raw.chunks_exact(PLANE) {
            for row in 0..STL10_IMAGE_SIZE {
                for col in 0..STL10_IMAGE_SIZE {
                    pixels.push(channel[col * STL10_IMAGE_SIZE + row] as f32 / 255.0);
                }
            }
        }

        let label = self
            .labels
            .as_ref()
            .map(|labels| (labels[index] - 1) as usize);

        Some(ImageItem { pixels, label })
    }

    fn len(&self) -> usize {
        self.len
    }
}
