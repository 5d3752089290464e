//! Burn Dataset Integration
//!
//! `KidneyCtDataset` implements Burn's `Dataset` trait over one side of an
//! `ImageFolder` split, loading and resizing images lazily. `KidneyBatcher`
//! turns items into tensors, rescaling pixels to [0, 1] and optionally
//! augmenting them first.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::imageops::FilterType;
use image::{ImageReader, RgbImage};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::augmentation::Augmenter;
use super::folder::{ImageFolder, ImageSample, Subset};
use crate::utils::error::{KidneyError, Result};

/// A resized RGB image with its label
#[derive(Clone, Debug)]
pub struct KidneyItem {
    pub image: RgbImage,
    pub label: usize,
    pub path: String,
}

impl KidneyItem {
    /// Load an image and resize it (bilinear) to `height` x `width`.
    pub fn from_path(path: &Path, label: usize, height: usize, width: usize) -> Result<Self> {
        let img = ImageReader::open(path)
            .map_err(|e| KidneyError::Image(path.to_path_buf(), e.to_string()))?
            .with_guessed_format()
            .map_err(|e| KidneyError::Image(path.to_path_buf(), e.to_string()))?
            .decode()
            .map_err(|e| KidneyError::Image(path.to_path_buf(), e.to_string()))?;

        Ok(Self {
            image: resize_rgb(&img, height, width),
            label,
            path: path.to_string_lossy().to_string(),
        })
    }
}

/// Resize to the network input with bilinear filtering and drop alpha.
pub fn resize_rgb(img: &image::DynamicImage, height: usize, width: usize) -> RgbImage {
    img.resize_exact(width as u32, height as u32, FilterType::Triangle)
        .to_rgb8()
}

/// Convert an RGB image to CHW floats rescaled by 1/255.
pub fn to_chw_rescaled(img: &RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    for (i, pixel) in img.pixels().enumerate() {
        data[i] = pixel[0] as f32 / 255.0;
        data[plane + i] = pixel[1] as f32 / 255.0;
        data[2 * plane + i] = pixel[2] as f32 / 255.0;
    }
    data
}

/// One side of the train/validation split as a Burn dataset
#[derive(Debug, Clone)]
pub struct KidneyCtDataset {
    samples: Vec<ImageSample>,
    image_size: (usize, usize),
}

impl KidneyCtDataset {
    pub fn new(samples: Vec<ImageSample>, image_size: (usize, usize)) -> Self {
        Self {
            samples,
            image_size,
        }
    }

    /// Build the dataset for `subset` of `folder`.
    pub fn from_folder(
        folder: &ImageFolder,
        subset: Subset,
        validation_split: f64,
        image_size: (usize, usize),
    ) -> Self {
        Self::new(folder.subset(subset, validation_split), image_size)
    }

    pub fn samples(&self) -> &[ImageSample] {
        &self.samples
    }

    /// Load one item, surfacing decode errors instead of skipping them.
    pub fn try_get(&self, index: usize) -> Result<KidneyItem> {
        let sample = self.samples.get(index).ok_or_else(|| {
            KidneyError::Dataset(format!(
                "index {} out of range for {} samples",
                index,
                self.samples.len()
            ))
        })?;
        KidneyItem::from_path(&sample.path, sample.label, self.image_size.0, self.image_size.1)
    }

    /// Load the items at `indices`, in order.
    pub fn load_batch(&self, indices: &[usize]) -> Result<Vec<KidneyItem>> {
        indices.iter().map(|&i| self.try_get(i)).collect()
    }
}

impl Dataset<KidneyItem> for KidneyCtDataset {
    fn get(&self, index: usize) -> Option<KidneyItem> {
        self.try_get(index).ok()
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A batch of images and labels
#[derive(Clone, Debug)]
pub struct KidneyBatch<B: Backend> {
    /// `[batch, 3, height, width]`
    pub images: Tensor<B, 4>,
    /// `[batch]`
    pub targets: Tensor<B, 1, Int>,
}

/// Batcher with optional on-the-fly augmentation
///
/// Each augmented batch gets its own RNG derived from the base seed and a
/// batch counter, so a run is reproducible for a fixed seed.
#[derive(Debug)]
pub struct KidneyBatcher {
    augmenter: Option<Augmenter>,
    seed: u64,
    batch_counter: AtomicU64,
}

impl Clone for KidneyBatcher {
    fn clone(&self) -> Self {
        Self {
            augmenter: self.augmenter.clone(),
            seed: self.seed,
            batch_counter: AtomicU64::new(self.batch_counter.load(Ordering::Relaxed)),
        }
    }
}

impl KidneyBatcher {
    /// Plain rescaling batcher (validation, evaluation, inference)
    pub fn new() -> Self {
        Self {
            augmenter: None,
            seed: 0,
            batch_counter: AtomicU64::new(0),
        }
    }

    /// Batcher that augments every image before rescaling
    pub fn augmenting(augmenter: Augmenter, seed: u64) -> Self {
        Self {
            augmenter: Some(augmenter),
            seed,
            batch_counter: AtomicU64::new(0),
        }
    }

    pub fn is_augmenting(&self) -> bool {
        self.augmenter.is_some()
    }
}

impl Default for KidneyBatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Batcher<B, KidneyItem, KidneyBatch<B>> for KidneyBatcher {
    fn batch(&self, items: Vec<KidneyItem>, device: &B::Device) -> KidneyBatch<B> {
        let batch_size = items.len();
        let (width, height) = items
            .first()
            .map(|item| item.image.dimensions())
            .unwrap_or((0, 0));

        let mut rng = self.augmenter.as_ref().map(|_| {
            let n = self.batch_counter.fetch_add(1, Ordering::Relaxed);
            ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(n))
        });

        let mut images_data = Vec::with_capacity(batch_size * 3 * (width * height) as usize);
        let mut targets_data = Vec::with_capacity(batch_size);
        for item in &items {
            match (&self.augmenter, rng.as_mut()) {
                (Some(augmenter), Some(rng)) => {
                    images_data.extend(to_chw_rescaled(&augmenter.augment(&item.image, rng)))
                }
                _ => images_data.extend(to_chw_rescaled(&item.image)),
            }
            targets_data.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(
                images_data,
                [batch_size, 3, height as usize, width as usize],
            ),
            device,
        );
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        KidneyBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DefaultBackend;
    use crate::dataset::augmentation::Augmenter;
    use image::Rgb;
    use tempfile::tempdir;

    fn write_images(root: &Path) {
        for (class, shade) in [("Cyst", 10u8), ("Normal", 80), ("Stone", 160), ("Tumor", 240)] {
            let dir = root.join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..4 {
                RgbImage::from_pixel(40, 24, Rgb([shade, i * 10, 255]))
                    .save(dir.join(format!("{}_{}.png", class, i)))
                    .unwrap();
            }
        }
    }

    #[test]
    fn test_item_resized_to_target() {
        let dir = tempdir().unwrap();
        write_images(dir.path());
        let path = dir.path().join("Cyst/Cyst_0.png");
        let item = KidneyItem::from_path(&path, 0, 32, 32).unwrap();
        assert_eq!(item.image.dimensions(), (32, 32));
    }

    #[test]
    fn test_rescale_range_and_layout() {
        let img = RgbImage::from_pixel(2, 2, Rgb([255, 0, 51]));
        let data = to_chw_rescaled(&img);
        assert_eq!(data.len(), 12);
        assert_eq!(&data[0..4], &[1.0; 4]);
        assert_eq!(&data[4..8], &[0.0; 4]);
        assert!((data[8] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_batch_shapes() {
        let dir = tempdir().unwrap();
        write_images(dir.path());
        let folder = ImageFolder::open(dir.path()).unwrap();
        let dataset = KidneyCtDataset::from_folder(&folder, Subset::Training, 0.3, (32, 32));
        assert_eq!(dataset.len(), 12);

        let items = dataset.load_batch(&[0, 3, 6]).unwrap();
        let device = Default::default();
        let batch: KidneyBatch<DefaultBackend> = KidneyBatcher::new().batch(items, &device);
        assert_eq!(batch.images.dims(), [3, 3, 32, 32]);
        assert_eq!(batch.targets.dims(), [3]);

        let max: f32 = batch.images.max().into_scalar().elem();
        assert!(max <= 1.0);
    }

    #[test]
    fn test_augmenting_batcher_keeps_shape() {
        let dir = tempdir().unwrap();
        write_images(dir.path());
        let folder = ImageFolder::open(dir.path()).unwrap();
        let dataset = KidneyCtDataset::from_folder(&folder, Subset::Training, 0.3, (32, 32));
        let items = dataset.load_batch(&[0, 1]).unwrap();

        let batcher = KidneyBatcher::augmenting(Augmenter::with_defaults(), 42);
        assert!(batcher.is_augmenting());
        let device = Default::default();
        let batch: KidneyBatch<DefaultBackend> = batcher.batch(items, &device);
        assert_eq!(batch.images.dims(), [2, 3, 32, 32]);
    }

    #[test]
    fn test_out_of_range_index() {
        let dataset = KidneyCtDataset::new(Vec::new(), (32, 32));
        assert!(dataset.get(0).is_none());
        assert!(matches!(dataset.try_get(0), Err(KidneyError::Dataset(_))));
    }
}
