//! Manual SGD training loop
//!
//! Mini-batch SGD on cross-entropy plus the head's L2 penalty, with
//! epoch-end validation, learning-rate reduction on plateau and early
//! stopping that restores the best weights.

use std::path::Path;

use burn::{
    data::dataloader::batcher::Batcher,
    data::dataset::Dataset,
    module::{AutodiffModule, Module},
    nn::loss::CrossEntropyLossConfig,
    optim::{GradientsParams, Optimizer, SgdConfig},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::callbacks::{EarlyStopDecision, EarlyStopping, ReduceLrOnPlateau};
use crate::dataset::{Augmenter, KidneyBatch, KidneyBatcher, KidneyCtDataset};
use crate::evaluation::evaluate_model;
use crate::model::KidneyClassifier;
use crate::utils::charts::{generate_line_chart, DataSeries, COLOR_TRAIN, COLOR_VALIDATION};
use crate::utils::common::save_json;
use crate::utils::error::{KidneyError, Result};
use crate::utils::logging::TrainingLogger;

/// Knobs of a single `fit` call
#[derive(Debug, Clone)]
pub struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub l2: f64,
    pub augmentation: bool,
    pub seed: u64,
    /// Fresh stopper; `EarlyStopping::new()` gives patience 10, min_delta 1e-4
    pub early_stopping: EarlyStopping,
}

/// Batches per epoch; the last one may be partial.
pub fn steps_per_epoch(samples: usize, batch_size: usize) -> usize {
    samples.div_ceil(batch_size.max(1))
}

/// Per-epoch metrics, written to `history.json`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub loss: Vec<f64>,
    pub accuracy: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub val_accuracy: Vec<f64>,
    pub learning_rate: Vec<f64>,
    /// 0-based epoch of the lowest validation loss
    pub best_epoch: Option<usize>,
    pub stopped_epoch: Option<usize>,
}

impl TrainingHistory {
    pub fn epochs_run(&self) -> usize {
        self.loss.len()
    }

    pub fn best_val_loss(&self) -> Option<f64> {
        self.best_epoch.and_then(|e| self.val_loss.get(e).copied())
    }

    /// Write `history.json`, `accuracy.svg` and `loss.svg` into `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        save_json(&dir.join("history.json"), self)?;

        let accuracy = [
            DataSeries::per_epoch("train", &self.accuracy, COLOR_TRAIN),
            DataSeries::per_epoch("validation", &self.val_accuracy, COLOR_VALIDATION),
        ];
        generate_line_chart(
            "Model accuracy",
            "Epoch",
            "Accuracy",
            &accuracy,
            &dir.join("accuracy.svg"),
        )?;

        let loss = [
            DataSeries::per_epoch("train", &self.loss, COLOR_TRAIN),
            DataSeries::per_epoch("validation", &self.val_loss, COLOR_VALIDATION),
        ];
        generate_line_chart("Model loss", "Epoch", "Loss", &loss, &dir.join("loss.svg"))?;
        Ok(())
    }
}

/// Train `model` and return it together with its history.
///
/// When early stopping triggers, the returned model carries the weights of
/// the best validation epoch.
pub fn fit<B: AutodiffBackend>(
    mut model: KidneyClassifier<B>,
    train: &KidneyCtDataset,
    validation: &KidneyCtDataset,
    options: &FitOptions,
    device: &B::Device,
) -> Result<(KidneyClassifier<B>, TrainingHistory)> {
    if train.is_empty() {
        return Err(KidneyError::Dataset("training subset is empty".into()));
    }
    if validation.is_empty() {
        return Err(KidneyError::Dataset(
            "validation subset is empty; add images or raise validation_split".into(),
        ));
    }

    let batch_size = options.batch_size.max(1);
    let batcher = if options.augmentation {
        KidneyBatcher::augmenting(Augmenter::with_defaults(), options.seed)
    } else {
        KidneyBatcher::new()
    };
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let mut optim = SgdConfig::new().init();

    let mut plateau = ReduceLrOnPlateau::new(options.learning_rate);
    let mut stopper = options.early_stopping.clone();
    // Stored as a record: module clones share BatchNorm running stats with
    // the model that keeps training.
    let mut best_record: Option<<KidneyClassifier<B> as Module<B>>::Record> = None;
    let mut history = TrainingHistory::default();
    let mut logger = TrainingLogger::new(options.epochs);
    let mut rng = ChaCha8Rng::seed_from_u64(options.seed);

    let mut indices: Vec<usize> = (0..train.len()).collect();
    let num_batches = steps_per_epoch(indices.len(), batch_size);

    for epoch in 0..options.epochs {
        logger.start_epoch(epoch);
        let lr = plateau.lr();
        indices.shuffle(&mut rng);

        let mut loss_sum = 0.0f64;
        let mut correct = 0usize;
        for (batch_idx, chunk) in indices.chunks(batch_size).enumerate() {
            let items = train.load_batch(chunk)?;
            let batch: KidneyBatch<B> = batcher.batch(items, device);
            let n = chunk.len();

            let logits = model.forward(batch.images);
            let ce = loss_fn.forward(logits.clone(), batch.targets.clone());
            let loss = ce + model.l2_penalty(options.l2);

            let loss_value: f64 = loss.clone().into_scalar().elem();
            let hits: i64 = logits
                .argmax(1)
                .reshape([n])
                .equal(batch.targets)
                .int()
                .sum()
                .into_scalar()
                .elem();
            loss_sum += loss_value * n as f64;
            correct += hits as usize;

            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(lr, model, grads);

            debug!(
                "batch {}/{}: loss = {:.4}",
                batch_idx + 1,
                num_batches,
                loss_value
            );
        }

        let train_loss = loss_sum / indices.len() as f64;
        let train_acc = correct as f64 / indices.len() as f64;
        let val = evaluate_model(&model.valid(), validation, batch_size, options.l2, device)?;
        logger.end_epoch(train_loss, train_acc, val.loss, val.accuracy, lr);

        history.loss.push(train_loss);
        history.accuracy.push(train_acc);
        history.val_loss.push(val.loss);
        history.val_accuracy.push(val.accuracy);
        history.learning_rate.push(lr);

        let next_lr = plateau.step(val.loss);
        if next_lr < lr {
            logger.log_lr_reduced(lr, next_lr);
        }

        match stopper.step(epoch, val.loss) {
            EarlyStopDecision::Improved => best_record = Some(model.clone().into_record()),
            EarlyStopDecision::Continue => {}
            EarlyStopDecision::Stop => {
                let best_epoch = stopper.best_epoch().unwrap_or(epoch);
                logger.log_early_stop(best_epoch, stopper.patience());
                if let Some(best) = best_record.take() {
                    model = model.load_record(best);
                }
                break;
            }
        }
    }

    history.best_epoch = stopper.best_epoch();
    history.stopped_epoch = stopper.stopped_epoch();
    logger.log_complete(history.epochs_run(), stopper.best());
    Ok((model, history))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::TrainingBackend;
    use crate::dataset::{ImageFolder, Subset};
    use crate::model::KidneyClassifierConfig;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    fn write_dataset(root: &Path) {
        for (class, shade) in [("Cyst", 0u8), ("Normal", 80), ("Stone", 160), ("Tumor", 240)] {
            let dir = root.join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..4u8 {
                RgbImage::from_pixel(32, 32, Rgb([shade, shade, i * 20]))
                    .save(dir.join(format!("{}_{}.png", class, i)))
                    .unwrap();
            }
        }
    }

    fn options(epochs: usize) -> FitOptions {
        FitOptions {
            epochs,
            batch_size: 4,
            learning_rate: 0.01,
            l2: 0.001,
            augmentation: true,
            seed: 42,
            early_stopping: EarlyStopping::new(),
        }
    }

    fn small_model(
        device: &<TrainingBackend as burn::tensor::backend::Backend>::Device,
    ) -> KidneyClassifier<TrainingBackend> {
        KidneyClassifierConfig::new()
            .with_image_height(32)
            .with_image_width(32)
            .with_base_filters(4)
            .init(device)
    }

    #[test]
    fn test_steps_per_epoch_rounds_up() {
        assert_eq!(steps_per_epoch(16, 4), 4);
        assert_eq!(steps_per_epoch(17, 4), 5);
        assert_eq!(steps_per_epoch(3, 16), 1);
        assert_eq!(steps_per_epoch(0, 16), 0);
        assert_eq!(steps_per_epoch(5, 0), 5);
    }

    #[test]
    fn test_stop_restores_best_weights() {
        let dir = tempdir().unwrap();
        write_dataset(dir.path());
        let folder = ImageFolder::open(dir.path()).unwrap();
        let train = KidneyCtDataset::from_folder(&folder, Subset::Training, 0.3, (32, 32));
        let validation = KidneyCtDataset::from_folder(&folder, Subset::Validation, 0.3, (32, 32));
        let device = Default::default();

        // Only the first epoch can count as an improvement, so epoch 1 stops
        // and the epoch-0 weights come back.
        let mut opts = options(5);
        opts.learning_rate = 0.05;
        opts.augmentation = false;
        opts.early_stopping = EarlyStopping::new().with_patience(1).with_min_delta(1e6);

        let (model, history) =
            fit(small_model(&device), &train, &validation, &opts, &device).unwrap();
        assert_eq!(history.epochs_run(), 2);
        assert_eq!(history.best_epoch, Some(0));
        assert_eq!(history.stopped_epoch, Some(1));

        let restored = evaluate_model(&model.valid(), &validation, 4, opts.l2, &device).unwrap();
        assert!((restored.loss - history.val_loss[0]).abs() < 1e-4);
    }

    #[test]
    fn test_fit_records_every_epoch() {
        let dir = tempdir().unwrap();
        write_dataset(dir.path());
        let folder = ImageFolder::open(dir.path()).unwrap();
        let train = KidneyCtDataset::from_folder(&folder, Subset::Training, 0.3, (32, 32));
        let validation = KidneyCtDataset::from_folder(&folder, Subset::Validation, 0.3, (32, 32));

        let device = Default::default();
        let model = small_model(&device);

        let (_, history) = fit(model, &train, &validation, &options(2), &device).unwrap();
        assert_eq!(history.epochs_run(), 2);
        assert_eq!(history.learning_rate, vec![0.01, 0.01]);
        assert!(history.val_accuracy.iter().all(|a| (0.0..=1.0).contains(a)));
        assert!(history.best_epoch.is_some());
        assert!(history.stopped_epoch.is_none());
    }

    #[test]
    fn test_empty_validation_rejected() {
        let dir = tempdir().unwrap();
        write_dataset(dir.path());
        let folder = ImageFolder::open(dir.path()).unwrap();
        let train = KidneyCtDataset::from_folder(&folder, Subset::Training, 0.0, (32, 32));
        let validation = KidneyCtDataset::from_folder(&folder, Subset::Validation, 0.0, (32, 32));

        let device = Default::default();
        let model = small_model(&device);
        assert!(matches!(
            fit(model, &train, &validation, &options(1), &device),
            Err(KidneyError::Dataset(_))
        ));
    }

    #[test]
    fn test_history_files_written() {
        let dir = tempdir().unwrap();
        let history = TrainingHistory {
            loss: vec![1.2, 0.9],
            accuracy: vec![0.3, 0.5],
            val_loss: vec![1.1, 1.0],
            val_accuracy: vec![0.25, 0.5],
            learning_rate: vec![0.01, 0.01],
            best_epoch: Some(1),
            stopped_epoch: None,
        };
        history.save(dir.path()).unwrap();
        assert!(dir.path().join("history.json").exists());
        assert!(dir.path().join("accuracy.svg").exists());
        assert!(dir.path().join("loss.svg").exists());
        assert_eq!(history.best_val_loss(), Some(1.0));
    }
}
