//! Model artifacts
//!
//! Every artifact is a burn record (`<path>.mpk`, written by
//! `CompactRecorder`) plus a JSON sidecar (`<path>.json`) describing how to
//! rebuild the module before the record is loaded into it. Freeze flags are
//! not part of the record, so loaders re-apply the policy from the sidecar.

use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::CompactRecorder,
    tensor::backend::Backend,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::classifier::{KidneyClassifier, KidneyClassifierConfig};
use super::vgg::{Vgg19, Vgg19Config};
use super::{FreezePolicy, WeightsSource};
use crate::utils::common::{load_json, save_json, sidecar_path};
use crate::utils::error::{KidneyError, Result};

/// Extension `CompactRecorder` gives its files
pub const RECORD_EXTENSION: &str = "mpk";

/// What a record holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    BaseNetwork,
    Classifier,
}

/// Optimizer and objective the classifier is trained with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSpec {
    pub optimizer: String,
    pub learning_rate: f64,
    pub loss: String,
    pub metrics: Vec<String>,
}

impl OptimizerSpec {
    /// Plain SGD on categorical cross-entropy, tracking accuracy
    pub fn sgd(learning_rate: f64) -> Self {
        Self {
            optimizer: "sgd".to_string(),
            learning_rate,
            loss: "categorical_crossentropy".to_string(),
            metrics: vec!["accuracy".to_string()],
        }
    }
}

/// JSON sidecar stored next to every record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub kind: ArtifactKind,
    pub base: Vgg19Config,
    #[serde(default)]
    pub classifier: Option<KidneyClassifierConfig>,
    pub freeze: FreezePolicy,
    pub weights: WeightsSource,
    #[serde(default)]
    pub optimizer: Option<OptimizerSpec>,
    /// Label order used in training, index-for-index
    #[serde(default)]
    pub class_names: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub version: String,
}

impl ModelMetadata {
    pub fn base_network(base: Vgg19Config, freeze: FreezePolicy, weights: WeightsSource) -> Self {
        Self {
            kind: ArtifactKind::BaseNetwork,
            base,
            classifier: None,
            freeze,
            weights,
            optimizer: None,
            class_names: None,
            created_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn classifier(
        config: KidneyClassifierConfig,
        freeze: FreezePolicy,
        weights: WeightsSource,
        optimizer: OptimizerSpec,
    ) -> Self {
        Self {
            kind: ArtifactKind::Classifier,
            base: config.base_config(),
            classifier: Some(config),
            freeze,
            weights,
            optimizer: Some(optimizer),
            class_names: None,
            created_at: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Same metadata, stamped now and carrying the training label order
    pub fn with_class_names(mut self, class_names: Vec<String>) -> Self {
        self.class_names = Some(class_names);
        self.created_at = Utc::now();
        self
    }

    fn classifier_config(&self) -> Result<&KidneyClassifierConfig> {
        match (self.kind, &self.classifier) {
            (ArtifactKind::Classifier, Some(config)) => Ok(config),
            _ => Err(KidneyError::ModelLoad(format!(
                "expected a classifier artifact, found {:?}",
                self.kind
            ))),
        }
    }
}

/// Path of the record file burn writes for `path`
pub fn record_path(path: &Path) -> PathBuf {
    path.with_extension(RECORD_EXTENSION)
}

/// Record and sidecar of an artifact
pub fn artifact_files(path: &Path) -> Vec<PathBuf> {
    vec![record_path(path), sidecar_path(path)]
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn read_metadata(path: &Path) -> Result<ModelMetadata> {
    let sidecar = sidecar_path(path);
    if !sidecar.exists() {
        return Err(KidneyError::ModelLoad(format!(
            "no model metadata at {}",
            sidecar.display()
        )));
    }
    load_json(&sidecar)
}

/// Persist a classifier and its sidecar.
pub fn save_classifier<B: Backend>(
    model: &KidneyClassifier<B>,
    path: &Path,
    metadata: &ModelMetadata,
) -> Result<()> {
    metadata.classifier_config()?;
    ensure_parent(path)?;
    model
        .clone()
        .save_file(path.to_path_buf(), &CompactRecorder::new())
        .map_err(|e| KidneyError::ModelLoad(format!("failed to save {}: {:?}", path.display(), e)))?;
    save_json(&sidecar_path(path), metadata)?;
    info!("Model saved to {}", record_path(path).display());
    Ok(())
}

/// Rebuild a classifier from its sidecar, load the record and re-apply the freeze policy.
pub fn load_classifier<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> Result<(KidneyClassifier<B>, ModelMetadata)> {
    let metadata = read_metadata(path)?;
    let config = metadata.classifier_config()?;

    let model = config
        .init::<B>(device)
        .load_file(path.to_path_buf(), &CompactRecorder::new(), device)
        .map_err(|e| KidneyError::ModelLoad(format!("failed to load {}: {:?}", path.display(), e)))?
        .freeze(metadata.freeze);

    if metadata.class_names.is_none() {
        warn!("{} carries no class names", sidecar_path(path).display());
    }
    Ok((model, metadata))
}

/// Persist the base network and its sidecar.
pub fn save_base_network<B: Backend>(
    model: &Vgg19<B>,
    path: &Path,
    metadata: &ModelMetadata,
) -> Result<()> {
    ensure_parent(path)?;
    model
        .clone()
        .save_file(path.to_path_buf(), &CompactRecorder::new())
        .map_err(|e| KidneyError::ModelLoad(format!("failed to save {}: {:?}", path.display(), e)))?;
    save_json(&sidecar_path(path), metadata)?;
    info!("Base network saved to {}", record_path(path).display());
    Ok(())
}

/// Load a base network written by `save_base_network`.
pub fn load_base_network<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> Result<(Vgg19<B>, ModelMetadata)> {
    let metadata = read_metadata(path)?;
    if metadata.kind != ArtifactKind::BaseNetwork {
        return Err(KidneyError::ModelLoad(format!(
            "expected a base network at {}, found {:?}",
            path.display(),
            metadata.kind
        )));
    }

    let model = metadata
        .base
        .init::<B>(device)
        .load_file(path.to_path_buf(), &CompactRecorder::new(), device)
        .map_err(|e| KidneyError::ModelLoad(format!("failed to load {}: {:?}", path.display(), e)))?
        .freeze(metadata.freeze);
    Ok((model, metadata))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DefaultBackend;
    use tempfile::tempdir;

    fn small_config() -> KidneyClassifierConfig {
        KidneyClassifierConfig::new()
            .with_image_height(32)
            .with_image_width(32)
            .with_base_filters(4)
    }

    #[test]
    fn test_classifier_roundtrip_keeps_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("model/trained.mpk");
        let device = Default::default();
        let config = small_config();
        let model: KidneyClassifier<DefaultBackend> = config.init(&device);

        let names: Vec<String> = ["Cyst", "Normal", "Stone", "Tumor"].map(String::from).to_vec();
        let metadata = ModelMetadata::classifier(
            config.clone(),
            FreezePolicy::All,
            WeightsSource::Random,
            OptimizerSpec::sgd(0.01),
        )
        .with_class_names(names.clone());
        save_classifier(&model, &path, &metadata).unwrap();
        assert!(record_path(&path).exists());
        assert!(sidecar_path(&path).exists());

        let (loaded, meta) = load_classifier::<DefaultBackend>(&path, &device).unwrap();
        assert_eq!(meta.class_names, Some(names));
        assert_eq!(meta.classifier, Some(config));
        assert_eq!(loaded.num_params(), model.num_params());
    }

    #[test]
    fn test_missing_sidecar_is_model_load_error() {
        let dir = tempdir().unwrap();
        let result = load_classifier::<DefaultBackend>(&dir.path().join("absent"), &Default::default());
        assert!(matches!(result, Err(KidneyError::ModelLoad(_))));
    }

    #[test]
    fn test_base_network_is_not_a_classifier() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("base_model.mpk");
        let device = Default::default();
        let base_config = Vgg19Config::new().with_base_filters(2);
        let base: Vgg19<DefaultBackend> = base_config.init(&device);
        let metadata = ModelMetadata::base_network(base_config, FreezePolicy::All, WeightsSource::Random);
        save_base_network(&base, &path, &metadata).unwrap();

        assert!(load_base_network::<DefaultBackend>(&path, &device).is_ok());
        assert!(matches!(
            load_classifier::<DefaultBackend>(&path, &device),
            Err(KidneyError::ModelLoad(_))
        ));
    }
}
