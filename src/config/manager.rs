//! Loads the two configuration documents once and hands out per-stage records.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::info;

use super::entity::{
    DataIngestionConfig, EvaluationConfig, Params, PathsConfig, PrepareBaseModelConfig,
    TrainingConfig,
};
use crate::model::WeightsSource;
use crate::utils::common::create_directories;
use crate::utils::error::{KidneyError, Result};

/// Default location of the paths document
pub const CONFIG_FILE_PATH: &str = "config/config.toml";

/// Default location of the hyperparameter document
pub const PARAMS_FILE_PATH: &str = "params.toml";

/// Parse a TOML document, rejecting empty files explicitly.
pub fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path).map_err(|e| {
        KidneyError::Config(format!("cannot read {}: {}", path.display(), e))
    })?;
    if text.trim().is_empty() {
        return Err(KidneyError::Config(format!(
            "configuration file is empty: {}",
            path.display()
        )));
    }
    let value = toml::from_str(&text)
        .map_err(|e| KidneyError::Config(format!("{}: {}", path.display(), e)))?;
    info!("toml file: {} loaded successfully", path.display());
    Ok(value)
}

/// Typed view over `config.toml` + `params.toml`
#[derive(Debug, Clone)]
pub struct ConfigurationManager {
    config: PathsConfig,
    params: Params,
}

impl ConfigurationManager {
    /// Read and validate both documents and create `artifacts_root`.
    pub fn new(config_path: impl AsRef<Path>, params_path: impl AsRef<Path>) -> Result<Self> {
        let config: PathsConfig = read_toml(config_path.as_ref())?;
        let params: Params = read_toml(params_path.as_ref())?;
        Self::from_parts(config, params)
    }

    /// Build from already-parsed documents.
    pub fn from_parts(config: PathsConfig, params: Params) -> Result<Self> {
        params.validate().map_err(KidneyError::Config)?;
        create_directories(&[&config.artifacts_root], true)?;
        Ok(Self { config, params })
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn paths(&self) -> &PathsConfig {
        &self.config
    }

    /// Directory holding the class folders after extraction
    pub fn training_data_dir(&self) -> PathBuf {
        self.config
            .data_ingestion
            .unzip_dir
            .join(&self.config.data_ingestion.dataset_dir)
    }

    pub fn data_ingestion_config(&self) -> Result<DataIngestionConfig> {
        let section = &self.config.data_ingestion;
        create_directories(&[&section.root_dir], true)?;

        Ok(DataIngestionConfig {
            root_dir: section.root_dir.clone(),
            source_url: section.source_url.clone(),
            local_data_file: section.local_data_file.clone(),
            unzip_dir: section.unzip_dir.clone(),
            dataset_dir: self.training_data_dir(),
            skip_if_present: section.skip_if_present,
        })
    }

    pub fn prepare_base_model_config(&self) -> Result<PrepareBaseModelConfig> {
        let section = &self.config.prepare_base_model;
        create_directories(&[&section.root_dir], true)?;

        let weights: WeightsSource = self
            .params
            .weights
            .parse()
            .map_err(KidneyError::Config)?;

        Ok(PrepareBaseModelConfig {
            root_dir: section.root_dir.clone(),
            base_model_path: section.base_model_path.clone(),
            updated_base_model_path: section.updated_base_model_path.clone(),
            pretrained_weights_path: section.pretrained_weights_path.clone(),
            pretrained_weights_url: section.pretrained_weights_url.clone(),
            image_size: self.params.input_size(),
            learning_rate: self.params.learning_rate,
            include_top: self.params.include_top,
            weights,
            classes: self.params.classes,
            dropout: self.params.dropout,
            freeze: self.params.freeze_policy(),
            base_filters: self.params.base_filters,
        })
    }

    pub fn training_config(&self) -> Result<TrainingConfig> {
        let section = &self.config.training;
        create_directories(&[&section.root_dir], true)?;

        Ok(TrainingConfig {
            root_dir: section.root_dir.clone(),
            trained_model_path: section.trained_model_path.clone(),
            updated_base_model_path: self.config.prepare_base_model.updated_base_model_path.clone(),
            training_data: self.training_data_dir(),
            epochs: self.params.epochs,
            batch_size: self.params.batch_size,
            augmentation: self.params.augmentation,
            image_size: self.params.input_size(),
            validation_split: self.params.validation_split,
            seed: self.params.seed,
        })
    }

    pub fn evaluation_config(&self) -> EvaluationConfig {
        let section = &self.config.evaluation;
        EvaluationConfig {
            trained_model_path: self.config.training.trained_model_path.clone(),
            training_data: self.training_data_dir(),
            score_path: section.score_path.clone(),
            mlflow_uri: section.mlflow_uri.clone(),
            experiment_name: section.experiment_name.clone(),
            registered_model_name: section.registered_model_name.clone(),
            all_params: self.params.clone(),
            image_size: self.params.input_size(),
            batch_size: self.params.batch_size,
            validation_split: self.params.validation_split,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_config(root: &Path) -> (PathBuf, PathBuf) {
        let art = root.join("artifacts");
        let config = format!(
            r#"
artifacts_root = "{art}"

[data_ingestion]
root_dir = "{art}/data_ingestion"
source_url = "https://drive.google.com/file/d/abc123/view?usp=sharing"
local_data_file = "{art}/data_ingestion/data.zip"
unzip_dir = "{art}/data_ingestion"

[prepare_base_model]
root_dir = "{art}/prepare_base_model"
base_model_path = "{art}/prepare_base_model/base_model.mpk"
updated_base_model_path = "{art}/prepare_base_model/base_model_updated.mpk"

[training]
root_dir = "{art}/training"
trained_model_path = "{art}/training/model.mpk"
"#,
            art = art.display()
        );
        let params = r#"
augmentation = true
image_size = [224, 224, 3]
batch_size = 16
include_top = false
epochs = 1
classes = 4
weights = "imagenet"
learning_rate = 0.01
dropout = 0.5
validation_split = 0.3
"#;
        let config_path = root.join("config.toml");
        let params_path = root.join("params.toml");
        fs::write(&config_path, config).unwrap();
        fs::write(&params_path, params).unwrap();
        (config_path, params_path)
    }

    #[test]
    fn test_loads_and_creates_artifacts_root() {
        let dir = tempdir().unwrap();
        let (config_path, params_path) = write_config(dir.path());
        let manager = ConfigurationManager::new(&config_path, &params_path).unwrap();

        assert!(dir.path().join("artifacts").is_dir());
        assert_eq!(manager.params().classes, 4);
        assert_eq!(manager.params().seed, 42);
        assert!(manager.params().freeze_all);
    }

    #[test]
    fn test_training_and_evaluation_share_split() {
        let dir = tempdir().unwrap();
        let (config_path, params_path) = write_config(dir.path());
        let manager = ConfigurationManager::new(&config_path, &params_path).unwrap();

        let training = manager.training_config().unwrap();
        let evaluation = manager.evaluation_config();
        assert_eq!(training.validation_split, evaluation.validation_split);
        assert_eq!(training.training_data, evaluation.training_data);
        assert_eq!(training.trained_model_path, evaluation.trained_model_path);
        assert!(training
            .training_data
            .ends_with("CT-KIDNEY-DATASET-Normal-Cyst-Tumor-Stone"));
    }

    #[test]
    fn test_stage_configs_create_root_dirs() {
        let dir = tempdir().unwrap();
        let (config_path, params_path) = write_config(dir.path());
        let manager = ConfigurationManager::new(&config_path, &params_path).unwrap();

        let ingestion = manager.data_ingestion_config().unwrap();
        let prepare = manager.prepare_base_model_config().unwrap();
        assert!(ingestion.root_dir.is_dir());
        assert!(prepare.root_dir.is_dir());
        assert_eq!(prepare.weights, WeightsSource::ImageNet);
        assert_eq!(prepare.image_size, (224, 224));
    }

    #[test]
    fn test_empty_file_is_config_error() {
        let dir = tempdir().unwrap();
        let (config_path, _) = write_config(dir.path());
        let empty = dir.path().join("empty.toml");
        fs::write(&empty, "   \n").unwrap();

        let err = ConfigurationManager::new(&config_path, &empty).unwrap_err();
        assert!(err.to_string().contains("configuration file is empty"));
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempdir().unwrap();
        let (config_path, _) = write_config(dir.path());
        let bad = dir.path().join("bad.toml");
        fs::write(&bad, "batch_size = \"sixteen\"").unwrap();

        assert!(matches!(
            ConfigurationManager::new(&config_path, &bad),
            Err(KidneyError::Config(_))
        ));
    }
}
