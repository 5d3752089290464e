//! Base model preparation stage
//!
//! Builds the VGG19 base (random or pretrained), saves it untouched, then
//! freezes it, attaches the dense head and saves the adapted classifier
//! together with its optimizer settings.

use burn::tensor::backend::Backend;
use tracing::info;

use super::artifact::{save_base_network, save_classifier, ModelMetadata, OptimizerSpec};
use super::classifier::{ArchitectureSummary, KidneyClassifier, KidneyClassifierConfig};
use super::pretrained::{ensure_checkpoint, load_torchvision_vgg19};
use super::vgg::{Vgg19, Vgg19Config};
use super::{FreezePolicy, WeightsSource};
use crate::config::PrepareBaseModelConfig;
use crate::utils::error::Result;

pub struct PrepareBaseModel {
    config: PrepareBaseModelConfig,
}

impl PrepareBaseModel {
    pub fn new(config: PrepareBaseModelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PrepareBaseModelConfig {
        &self.config
    }

    pub fn base_config(&self) -> Vgg19Config {
        self.classifier_config().base_config()
    }

    pub fn classifier_config(&self) -> KidneyClassifierConfig {
        let (height, width) = self.config.image_size;
        KidneyClassifierConfig::new()
            .with_num_classes(self.config.classes)
            .with_image_height(height)
            .with_image_width(width)
            .with_dropout(self.config.dropout)
            .with_include_top(self.config.include_top)
            .with_base_filters(self.config.base_filters)
    }

    /// Build the base network and save it before any layer is frozen.
    pub fn get_base_model<B: Backend>(&self, device: &B::Device) -> Result<Vgg19<B>> {
        let base_config = self.base_config();
        let base = match &self.config.weights {
            WeightsSource::Random => {
                info!("Initialising VGG19 base with random weights");
                base_config.init::<B>(device)
            }
            WeightsSource::ImageNet => {
                let checkpoint = ensure_checkpoint(
                    self.config.pretrained_weights_path.as_deref(),
                    self.config.pretrained_weights_url.as_deref(),
                )?;
                load_torchvision_vgg19::<B>(&base_config, &checkpoint, device)?
            }
            WeightsSource::File(path) => load_torchvision_vgg19::<B>(&base_config, path, device)?,
        };

        let untouched = FreezePolicy::AllButLast(base.num_layers());
        let metadata =
            ModelMetadata::base_network(base_config, untouched, self.config.weights.clone());
        save_base_network(&base, &self.config.base_model_path, &metadata)?;
        Ok(base)
    }

    /// Freeze the base, attach the head and save the adapted classifier.
    pub fn update_base_model<B: Backend>(
        &self,
        base: Vgg19<B>,
        device: &B::Device,
    ) -> Result<(KidneyClassifier<B>, ArchitectureSummary)> {
        let config = self.classifier_config();
        let policy = self.config.freeze;
        let model = config.init_with_base(base, device).freeze(policy);

        let summary = model.summary(&config, policy);
        info!("Adapted model:\n{}", summary.render());

        let metadata = ModelMetadata::classifier(
            config,
            policy,
            self.config.weights.clone(),
            OptimizerSpec::sgd(self.config.learning_rate),
        );
        save_classifier(&model, &self.config.updated_base_model_path, &metadata)?;
        Ok((model, summary))
    }

    /// Run both steps.
    pub fn run<B: Backend>(&self, device: &B::Device) -> Result<ArchitectureSummary> {
        let base = self.get_base_model::<B>(device)?;
        let (_, summary) = self.update_base_model(base, device)?;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DefaultBackend;
    use crate::model::artifact::{load_base_network, load_classifier, record_path};
    use std::path::Path;
    use tempfile::tempdir;

    fn config(root: &Path, freeze: FreezePolicy) -> PrepareBaseModelConfig {
        PrepareBaseModelConfig {
            root_dir: root.to_path_buf(),
            base_model_path: root.join("base_model.mpk"),
            updated_base_model_path: root.join("base_model_updated.mpk"),
            pretrained_weights_path: None,
            pretrained_weights_url: None,
            image_size: (32, 32),
            learning_rate: 0.01,
            include_top: false,
            weights: WeightsSource::Random,
            classes: 4,
            dropout: 0.5,
            freeze,
            base_filters: 4,
        }
    }

    #[test]
    fn test_writes_both_artifacts() {
        let dir = tempdir().unwrap();
        let stage = PrepareBaseModel::new(config(dir.path(), FreezePolicy::All));
        let device = Default::default();
        let summary = stage.run::<DefaultBackend>(&device).unwrap();

        assert!(record_path(&dir.path().join("base_model.mpk")).exists());
        assert!(record_path(&dir.path().join("base_model_updated.mpk")).exists());
        assert_eq!(summary.frozen_layers, 16);
        assert_eq!(summary.num_classes, 4);

        let (_, base_meta) =
            load_base_network::<DefaultBackend>(&dir.path().join("base_model.mpk"), &device).unwrap();
        assert_eq!(base_meta.freeze.frozen_count(16), 0);

        let (_, meta) = load_classifier::<DefaultBackend>(
            &dir.path().join("base_model_updated.mpk"),
            &device,
        )
        .unwrap();
        assert_eq!(meta.optimizer, Some(OptimizerSpec::sgd(0.01)));
        assert_eq!(meta.freeze, FreezePolicy::All);
    }

    #[test]
    fn test_partial_freeze_counts_trainable_layers() {
        let dir = tempdir().unwrap();
        let stage = PrepareBaseModel::new(config(dir.path(), FreezePolicy::AllButLast(4)));
        let summary = stage.run::<DefaultBackend>(&Default::default()).unwrap();
        assert_eq!(summary.frozen_layers, 12);
        assert!(summary.layers[12].trainable);
        assert!(!summary.layers[11].trainable);
    }

    #[test]
    fn test_preparing_twice_gives_equal_summaries() {
        let dir = tempdir().unwrap();
        let stage = PrepareBaseModel::new(config(dir.path(), FreezePolicy::All));
        let device = Default::default();
        let first = stage.run::<DefaultBackend>(&device).unwrap();
        let second = stage.run::<DefaultBackend>(&device).unwrap();
        assert_eq!(first, second);
    }
}
