use burn::data::dataset::Dataset;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::{Augmentation, ImageItem, ImageShape};
use crate::error::{Error, Result};

/// Splits a dataset into batches and decodes them on a worker pool.
pub struct BatchLoader {
    batch_size: usize,
    shape: ImageShape,
    shuffle: bool,
    augmentation: Option<Augmentation>,
    rng: StdRng,
    pool: ThreadPool,
}

impl BatchLoader {
    pub fn new(batch_size: usize, shape: ImageShape, num_workers: usize, seed: u64) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".into()));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_workers.max(1))
            .thread_name(|i| format!("loader-{i}"))
            .build()?;

        Ok(Self {
            batch_size,
            shape,
            shuffle: false,
            augmentation: None,
            rng: StdRng::seed_from_u64(seed),
            pool,
        })
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_augmentation(mut self, augmentation: Option<Augmentation>) -> Self {
        self.augmentation = augmentation;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_batches(&self, len: usize) -> usize {
        len.div_ceil(self.batch_size)
    }

    /// Index batches covering `0..len` once; the last batch may be short.
    pub fn batch_indices(&mut self, len: usize) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..len).collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }
        order
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect()
    }

    /// Fetch the items of one batch. Items the dataset fails to produce are
    /// dropped, so the result can be shorter than `indices`.
    pub fn load<D>(&mut self, dataset: &D, indices: &[usize]) -> Vec<ImageItem>
    where
        D: Dataset<ImageItem> + ?Sized,
    {
        let mut items: Vec<ImageItem> = self.pool.install(|| {
            indices
                .par_iter()
                .filter_map(|&index| dataset.get(index))
                .collect()
        });

        if let Some(augmentation) = &self.augmentation {
            for item in items.iter_mut() {
                augmentation.apply(item, self.shape, &mut self.rng);
            }
        }
        items
    }
}

/// Stack items into a `[N, C, H, W]` tensor.
pub fn items_to_tensor<B: Backend>(
    items: &[ImageItem],
    shape: ImageShape,
    device: &B::Device,
) -> Result<Tensor<B, 4>> {
    if items.is_empty() {
        return Err(Error::Dataset("cannot build a tensor from an empty batch".into()));
    }

    let mut data = Vec::with_capacity(items.len() * shape.numel());
    for item in items {
        if item.pixels.len() != shape.numel() {
            return Err(Error::Dataset(format!(
                "item has {} values, expected {} for {}x{}x{}",
                item.pixels.len(),
                shape.numel(),
                shape.channels,
                shape.size,
                shape.size
            )));
        }
        data.extend_from_slice(&item.pixels);
    }

    let data = TensorData::new(data, [items.len(), shape.channels, shape.size, shape.size]);
    Ok(Tensor::from_data(data, device))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::data::dataset::InMemDataset;

    type TestBackend = NdArray;

    fn dataset(len: usize, shape: ImageShape) -> InMemDataset<ImageItem> {
        let items = (0..len)
            .map(|i| ImageItem {
                pixels: vec![i as f32 / len as f32; shape.numel()],
                label: Some(i),
            })
            .collect();
        InMemDataset::new(items)
    }

    #[test]
    fn batches_cover_every_index_once() {
        let shape = ImageShape::new(1, 2);
        let mut loader = BatchLoader::new(4, shape, 2, 3).unwrap().with_shuffle(true);

        let batches = loader.batch_indices(10);
        assert_eq!(batches.len(), 3);
        assert_eq!(loader.num_batches(10), 3);
        assert_eq!(batches[2].len(), 2);

        let mut seen: Vec<usize> = batches.into_iter().flatten().collect();
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn unshuffled_batches_keep_dataset_order() {
        let mut loader = BatchLoader::new(3, ImageShape::new(1, 2), 1, 0).unwrap();
        assert_eq!(loader.batch_indices(5), vec![vec![0, 1, 2], vec![3, 4]]);
    }

    #[test]
    fn shuffling_changes_between_epochs() {
        let mut loader = BatchLoader::new(100, ImageShape::new(1, 2), 1, 9)
            .unwrap()
            .with_shuffle(true);
        let first = loader.batch_indices(100);
        let second = loader.batch_indices(100);
        assert_ne!(first, second);
    }

    #[test]
    fn loads_items_in_index_order() {
        let shape = ImageShape::new(1, 2);
        let data = dataset(6, shape);
        let mut loader = BatchLoader::new(3, shape, 4, 0).unwrap();

        let items = loader.load(&data, &[5, 0, 3]);
        let labels: Vec<_> = items.iter().map(|item| item.label).collect();
        assert_eq!(labels, vec![Some(5), Some(0), Some(3)]);
    }

    #[test]
    fn stacks_items_into_nchw() {
        let device = Default::default();
        let shape = ImageShape::new(3, 2);
        let data = dataset(2, shape);
        let mut loader = BatchLoader::new(2, shape, 1, 0).unwrap();
        let items = loader.load(&data, &[0, 1]);

        let tensor = items_to_tensor::<TestBackend>(&items, shape, &device).unwrap();
        assert_eq!(tensor.dims(), [2, 3, 2, 2]);
        let values: Vec<f32> = tensor.into_data().to_vec().unwrap();
        assert_eq!(values[0], 0.0);
        assert_eq!(values[12], 0.5);
    }

    #[test]
    fn rejects_mismatched_items() {
        let device = Default::default();
        let items = vec![ImageItem {
            pixels: vec![0.0; 5],
            label: None,
        }];
        assert!(items_to_tensor::<TestBackend>(&items, ImageShape::new(1, 2), &device).is_err());
        assert!(items_to_tensor::<TestBackend>(&[], ImageShape::new(1, 2), &device).is_err());
    }
}
