//! Training stage
//!
//! Loads the adapted model written by the preparation stage, fits it on the
//! training subset and saves the result with the class order it learned.

pub mod callbacks;
pub mod trainer;

use burn::tensor::backend::AutodiffBackend;
use tracing::info;

pub use callbacks::{EarlyStopDecision, EarlyStopping, PlateauMode, ReduceLrOnPlateau};
pub use trainer::{fit, FitOptions, TrainingHistory};

use crate::config::TrainingConfig;
use crate::dataset::{ImageFolder, KidneyCtDataset, Subset};
use crate::model::{load_classifier, save_classifier, KidneyClassifier, ModelMetadata};
use crate::utils::error::{KidneyError, Result};

/// Learning rate used when the model sidecar carries no optimizer
pub const DEFAULT_LEARNING_RATE: f64 = 0.01;

pub struct Training {
    config: TrainingConfig,
}

impl Training {
    pub fn new(config: TrainingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Load the adapted model produced by the preparation stage.
    pub fn get_base_model<B: AutodiffBackend>(
        &self,
        device: &B::Device,
    ) -> Result<(KidneyClassifier<B>, ModelMetadata)> {
        load_classifier::<B>(&self.config.updated_base_model_path, device)
    }

    /// Build the two sides of the split.
    pub fn datasets(&self) -> Result<(ImageFolder, KidneyCtDataset, KidneyCtDataset)> {
        let folder = ImageFolder::open(&self.config.training_data)?;
        let split = self.config.validation_split;
        let size = self.config.image_size;
        let train = KidneyCtDataset::from_folder(&folder, Subset::Training, split, size);
        let validation = KidneyCtDataset::from_folder(&folder, Subset::Validation, split, size);
        info!(
            "Split: {} training / {} validation images (validation_split = {})",
            train.samples().len(),
            validation.samples().len(),
            split
        );
        Ok((folder, train, validation))
    }

    /// Fit the model and write the trained artifact, `history.json` and the curves.
    pub fn train<B: AutodiffBackend>(&self, device: &B::Device) -> Result<TrainingHistory> {
        let (model, metadata) = self.get_base_model::<B>(device)?;
        let (folder, train, validation) = self.datasets()?;

        if folder.num_classes() != model.num_classes() {
            return Err(KidneyError::Dataset(format!(
                "model predicts {} classes but {} holds {} class folders",
                model.num_classes(),
                folder.root().display(),
                folder.num_classes()
            )));
        }

        let options = FitOptions {
            epochs: self.config.epochs,
            batch_size: self.config.batch_size,
            learning_rate: metadata
                .optimizer
                .as_ref()
                .map(|o| o.learning_rate)
                .unwrap_or(DEFAULT_LEARNING_RATE),
            l2: metadata.classifier.as_ref().map(|c| c.l2).unwrap_or(0.0),
            augmentation: self.config.augmentation,
            seed: self.config.seed,
            early_stopping: EarlyStopping::new(),
        };
        info!(
            "Training for {} epochs, batch size {}, lr {}, augmentation {}",
            options.epochs, options.batch_size, options.learning_rate, options.augmentation
        );

        let (model, history) = fit(model, &train, &validation, &options, device)?;

        let metadata = metadata.with_class_names(folder.class_names().to_vec());
        save_classifier(&model, &self.config.trained_model_path, &metadata)?;
        history.save(&self.config.root_dir)?;
        Ok(history)
    }
}
