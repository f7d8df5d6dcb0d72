use crate::cifar10::{Cifar10Data, Cifar10Error};
use crate::transforms::Compose;
use ndarray::{Array4, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// A transformed mini-batch ready for the network.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `(B, 3, H, W)` normalized images
    pub images: Array4<f32>,
    pub targets: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Splits a dataset into mini-batches, applying a [`Compose`] to each image.
///
/// The final batch holds the remainder and may be smaller than `batch_size`.
pub struct DataLoader<'a> {
    data: &'a Cifar10Data,
    batch_size: usize,
    shuffle: bool,
    transform: Compose,
}

impl<'a> DataLoader<'a> {
    pub fn new(
        data: &'a Cifar10Data,
        batch_size: usize,
        shuffle: bool,
        transform: Compose,
    ) -> Result<Self, Cifar10Error> {
        if batch_size == 0 {
            return Err(Cifar10Error::InvalidBatchSize);
        }
        Ok(Self {
            data,
            batch_size,
            shuffle,
            transform,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of samples in the underlying dataset.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn num_batches(&self) -> usize {
        self.data.len().div_ceil(self.batch_size)
    }

    /// One pass over the dataset. With `shuffle` set, every call draws a
    /// new order from `rng`. Random transforms also draw from `rng`, so a
    /// seeded `rng` reproduces the pass exactly.
    pub fn batches<'r, R: Rng + ?Sized>(&'r self, rng: &'r mut R) -> Batches<'r, 'a, R> {
        let mut order: Vec<usize> = (0..self.data.len()).collect();
        if self.shuffle {
            order.shuffle(&mut *rng);
        }
        Batches {
            loader: self,
            order,
            position: 0,
            rng,
        }
    }

    /// Transforms the samples at `indices` in parallel. Each sample gets its
    /// own RNG seeded from `rng`, which keeps the result independent of
    /// thread scheduling.
    fn assemble<R: Rng + ?Sized>(&self, indices: &[usize], rng: &mut R) -> Batch {
        let seeds: Vec<u64> = indices.iter().map(|_| rng.random()).collect();
        let images: Vec<_> = indices
            .par_iter()
            .zip(seeds.par_iter())
            .filter_map(|(&index, &seed)| {
                let image = self.data.image(index)?;
                Some(self.transform.apply(image, &mut StdRng::seed_from_u64(seed)))
            })
            .collect();
        let targets: Vec<usize> = indices
            .iter()
            .filter_map(|&index| self.data.label(index))
            .collect();

        let (channels, height, width) = images.first().map_or((0, 0, 0), |img| img.dim());
        let mut batch = Array4::<f32>::zeros((images.len(), channels, height, width));
        for (mut slot, image) in batch.axis_iter_mut(Axis(0)).zip(&images) {
            slot.assign(image);
        }
        Batch {
            images: batch,
            targets,
        }
    }
}

/// Iterator over the batches of one pass, created by [`DataLoader::batches`].
pub struct Batches<'r, 'a, R: ?Sized> {
    loader: &'r DataLoader<'a>,
    order: Vec<usize>,
    position: usize,
    rng: &'r mut R,
}

impl<R: Rng + ?Sized> Iterator for Batches<'_, '_, R> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.position >= self.order.len() {
            return None;
        }
        let end = (self.position + self.loader.batch_size).min(self.order.len());
        let batch = self
            .loader
            .assemble(&self.order[self.position..end], &mut *self.rng);
        self.position = end;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.order.len() - self.position).div_ceil(self.loader.batch_size);
        (remaining, Some(remaining))
    }
}

impl<R: Rng + ?Sized> ExactSizeIterator for Batches<'_, '_, R> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::Transform;
    use ndarray::Array;

    /// `count` images; every pixel of image `i` is `i`, and its label is `i % 10`.
    fn numbered_data(count: usize) -> Cifar10Data {
        let images = Array::from_shape_fn((count, 3, 32, 32), |(n, _, _, _)| n as u8);
        let labels = (0..count).map(|i| i % 10).collect();
        Cifar10Data::new(images, labels).unwrap()
    }

    fn identity() -> Compose {
        Compose::new(vec![])
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let data = numbered_data(4);
        assert!(matches!(
            DataLoader::new(&data, 0, false, identity()),
            Err(Cifar10Error::InvalidBatchSize)
        ));
    }

    #[test]
    fn test_last_batch_is_partial() {
        let data = numbered_data(10);
        let loader = DataLoader::new(&data, 4, false, identity()).unwrap();
        assert_eq!(loader.num_batches(), 3);

        let mut rng = StdRng::seed_from_u64(0);
        let sizes: Vec<usize> = loader.batches(&mut rng).map(|b| b.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
    }

    #[test]
    fn test_unshuffled_order_and_scaling() {
        let data = numbered_data(5);
        let loader = DataLoader::new(&data, 2, false, identity()).unwrap();
        let mut rng = StdRng::seed_from_u64(0);

        let batches: Vec<Batch> = loader.batches(&mut rng).collect();
        assert_eq!(batches[0].targets, vec![0, 1]);
        assert_eq!(batches[2].targets, vec![4]);
        assert_eq!(batches[1].images.dim(), (2, 3, 32, 32));
        assert_eq!(batches[1].images[[1, 2, 5, 5]], 3.0 / 255.0);
    }

    #[test]
    fn test_shuffle_covers_every_sample_once() {
        let data = numbered_data(37);
        let loader = DataLoader::new(&data, 8, true, identity()).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        let mut seen: Vec<usize> = loader
            .batches(&mut rng)
            .flat_map(|b| {
                // Recover the sample index from the pixel value.
                b.images
                    .axis_iter(Axis(0))
                    .map(|img| (img[[0, 0, 0]] * 255.0).round() as usize)
                    .collect::<Vec<_>>()
            })
            .collect();
        let first_pass = seen.clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..37).collect::<Vec<_>>());

        let second_pass: Vec<usize> = loader
            .batches(&mut rng)
            .flat_map(|b| b.targets)
            .collect();
        assert_eq!(second_pass.len(), 37);
        assert_ne!(
            first_pass.iter().map(|i| i % 10).collect::<Vec<_>>(),
            second_pass
        );
    }

    #[test]
    fn test_seeded_augmentation_is_reproducible() {
        let images = Array::from_shape_fn((6, 3, 32, 32), |(n, c, y, x)| {
            ((n * 31 + c * 7 + y * 3 + x) % 256) as u8
        });
        let data = Cifar10Data::new(images, vec![0; 6]).unwrap();
        let transform = Compose::new(vec![
            Transform::RandomCrop {
                size: 32,
                padding: 4,
            },
            Transform::RandomHorizontalFlip { p: 0.5 },
        ]);
        let loader = DataLoader::new(&data, 4, true, transform).unwrap();

        let run = |seed| -> Vec<Array4<f32>> {
            loader
                .batches(&mut StdRng::seed_from_u64(seed))
                .map(|b| b.images)
                .collect()
        };
        assert_eq!(run(3), run(3));
    }
}
