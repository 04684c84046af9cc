use std::fs;
use std::path::{Path, PathBuf};

use burn::data::dataset::Dataset;
use image::imageops::FilterType;

use super::{ImageItem, ImageShape};
use crate::error::{Error, Result};

const EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "gif"];

/// Flat directory of image files, decoded lazily and resized to `shape`.
pub struct ImageFolderDataset {
    image_paths: Vec<PathBuf>,
    shape: ImageShape,
}

impl ImageFolderDataset {
    pub fn new(dir: impl AsRef<Path>, shape: ImageShape) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(Error::Dataset(format!(
                "directory does not exist: {}",
                dir.display()
            )));
        }

        let mut image_paths = Vec::new();
        for entry in fs::read_dir(dir).map_err(|err| Error::io(dir, err))? {
            let path = entry.map_err(|err| Error::io(dir, err))?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                .unwrap_or(false);
            if is_image {
                image_paths.push(path);
            }
        }

        if image_paths.is_empty() {
            return Err(Error::Dataset(format!(
                "no images found in {}",
                dir.display()
            )));
        }
        image_paths.sort();

        Ok(Self { image_paths, shape })
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.image_paths
    }

    /// Decode one image into a CHW buffer.
    pub fn load(&self, index: usize) -> Result<ImageItem> {
        let path = self.image_paths.get(index).ok_or_else(|| {
            Error::Dataset(format!(
                "index {index} out of bounds (size: {})",
                self.image_paths.len()
            ))
        })?;

        let size = self.shape.size as u32;
        let img = image::open(path)
            .map_err(|err| Error::image(path, err))?
            .resize_exact(size, size, FilterType::Lanczos3);

        let plane = self.shape.plane();
        let mut pixels = vec![0.0f32; self.shape.numel()];
        if self.shape.channels == 1 {
            for (i, p) in img.to_luma8().pixels().enumerate() {
                pixels[i] = p[0] as f32 / 255.0;
            }
        } else {
            for (i, p) in img.to_rgb8().pixels().enumerate() {
                for c in 0..3 {
                    pixels[c * plane + i] = p[c] as f32 / 255.0;
                }
            }
        }

        Ok(ImageItem {
            pixels,
            label: None,
        })
    }
}

impl Dataset<ImageItem> for ImageFolderDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        match self.load(index) {
            Ok(item) => Some(item),
            Err(err) => {
                tracing::warn!("skipping image {index}: {err}");
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.image_paths.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn loads_sorted_images_as_chw() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(4, 4, Rgb([255, 0, 0]))
            .save(dir.path().join("b.png"))
            .unwrap();
        RgbImage::from_pixel(4, 4, Rgb([0, 0, 255]))
            .save(dir.path().join("a.png"))
            .unwrap();
        fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let dataset = ImageFolderDataset::new(dir.path(), ImageShape::new(3, 4)).unwrap();
        assert_eq!(dataset.len(), 2);
        assert!(dataset.paths()[0].ends_with("a.png"));

        let blue = dataset.get(0).unwrap();
        assert_eq!(blue.pixels.len(), 48);
        assert!(blue.pixels[..16].iter().all(|&p| p < 0.01));
        assert!(blue.pixels[32..].iter().all(|&p| p > 0.99));

        let red = dataset.get(1).unwrap();
        assert!(red.pixels[..16].iter().all(|&p| p > 0.99));
    }

    #[test]
    fn resizes_and_converts_to_grayscale() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(10, 6, Rgb([255, 255, 255]))
            .save(dir.path().join("white.png"))
            .unwrap();

        let dataset = ImageFolderDataset::new(dir.path(), ImageShape::new(1, 8)).unwrap();
        let item = dataset.get(0).unwrap();
        assert_eq!(item.pixels.len(), 64);
        assert!(item.pixels.iter().all(|&p| p > 0.99));
    }

    #[test]
    fn missing_or_empty_directories_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ImageFolderDataset::new(dir.path(), ImageShape::new(3, 8)),
            Err(Error::Dataset(_))
        ));
        assert!(ImageFolderDataset::new(dir.path().join("missing"), ImageShape::new(3, 8)).is_err());
    }

    #[test]
    fn corrupt_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.png"), b"garbage").unwrap();
        let dataset = ImageFolderDataset::new(dir.path(), ImageShape::new(3, 8)).unwrap();
        assert!(dataset.load(0).is_err());
        assert!(dataset.get(0).is_none());
    }
}
