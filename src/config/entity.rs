//! Configuration records
//!
//! Two layers live here:
//! - the on-disk documents (`PathsConfig` from `config/config.toml`,
//!   `Params` from `params.toml`), deserialized with serde + toml
//! - the immutable per-stage records handed out by `ConfigurationManager`

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::model::{FreezePolicy, WeightsSource};

/// Dataset folder name inside the extracted archive
pub const DEFAULT_DATASET_DIR: &str = "CT-KIDNEY-DATASET-Normal-Cyst-Tumor-Stone";

/// Name under which the trained model is registered in a networked registry
pub const DEFAULT_REGISTERED_MODEL_NAME: &str = "VGG19Model";

// ------------------------------------------------------------------
// On-disk documents
// ------------------------------------------------------------------

/// `config/config.toml`: paths, URLs and tracking settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub artifacts_root: PathBuf,
    pub data_ingestion: DataIngestionSection,
    pub prepare_base_model: PrepareBaseModelSection,
    pub training: TrainingSection,
    #[serde(default)]
    pub evaluation: EvaluationSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataIngestionSection {
    pub root_dir: PathBuf,
    pub source_url: String,
    pub local_data_file: PathBuf,
    pub unzip_dir: PathBuf,
    #[serde(default = "default_dataset_dir")]
    pub dataset_dir: String,
    #[serde(default)]
    pub skip_if_present: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareBaseModelSection {
    pub root_dir: PathBuf,
    pub base_model_path: PathBuf,
    pub updated_base_model_path: PathBuf,
    #[serde(default)]
    pub pretrained_weights_path: Option<PathBuf>,
    #[serde(default)]
    pub pretrained_weights_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSection {
    pub root_dir: PathBuf,
    pub trained_model_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSection {
    #[serde(default = "default_score_path")]
    pub score_path: PathBuf,
    #[serde(default)]
    pub mlflow_uri: Option<String>,
    #[serde(default = "default_experiment_name")]
    pub experiment_name: String,
    #[serde(default = "default_registered_model_name")]
    pub registered_model_name: String,
}

impl Default for EvaluationSection {
    fn default() -> Self {
        Self {
            score_path: default_score_path(),
            mlflow_uri: None,
            experiment_name: default_experiment_name(),
            registered_model_name: default_registered_model_name(),
        }
    }
}

/// `params.toml`: hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Params {
    pub augmentation: bool,
    /// `[height, width, channels]`
    pub image_size: [usize; 3],
    pub batch_size: usize,
    pub include_top: bool,
    pub epochs: usize,
    pub classes: usize,
    /// `"imagenet"`, `"none"`, or a path to a PyTorch checkpoint
    pub weights: String,
    pub learning_rate: f64,
    pub dropout: f64,
    /// Fraction of every class held out for validation; shared by training and evaluation
    #[serde(default = "default_validation_split")]
    pub validation_split: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_true")]
    pub freeze_all: bool,
    /// Trailing conv layers left trainable when `freeze_all` is false
    #[serde(default)]
    pub freeze_till: Option<usize>,
    #[serde(default = "default_base_filters")]
    pub base_filters: usize,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            augmentation: true,
            image_size: [224, 224, 3],
            batch_size: 16,
            include_top: false,
            epochs: 1,
            classes: 4,
            weights: "imagenet".to_string(),
            learning_rate: 0.01,
            dropout: 0.5,
            validation_split: default_validation_split(),
            seed: default_seed(),
            freeze_all: true,
            freeze_till: None,
            base_filters: default_base_filters(),
        }
    }
}

impl Params {
    /// Validate the hyperparameters
    pub fn validate(&self) -> Result<(), String> {
        let [height, width, channels] = self.image_size;
        if channels != 3 {
            return Err(format!("image_size must have 3 channels, got {}", channels));
        }
        if height == 0 || height % 32 != 0 || width == 0 || width % 32 != 0 {
            return Err(format!(
                "image_size {}x{} must be a non-zero multiple of 32",
                height, width
            ));
        }
        if self.include_top && (height != 224 || width != 224) && self.weights != "none" {
            return Err("include_top with pretrained weights requires a 224x224 input".into());
        }
        if self.batch_size == 0 {
            return Err("batch_size must be > 0".into());
        }
        if self.classes < 2 {
            return Err("classes must be at least 2".into());
        }
        if self.learning_rate <= 0.0 {
            return Err("learning_rate must be > 0".into());
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err("dropout must be in [0, 1)".into());
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err("validation_split must be in [0, 1)".into());
        }
        if self.base_filters == 0 {
            return Err("base_filters must be > 0".into());
        }
        if !self.freeze_all && self.freeze_till.is_none() {
            return Err("freeze_till is required when freeze_all is false".into());
        }
        Ok(())
    }

    /// Flatten every hyperparameter to string key/value pairs, sorted by key
    pub fn as_key_values(&self) -> Vec<(String, String)> {
        let value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        let mut pairs: Vec<(String, String)> = match value {
            serde_json::Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| {
                    let text = match v {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (k, text)
                })
                .collect(),
            _ => Vec::new(),
        };
        pairs.sort();
        pairs
    }

    pub fn freeze_policy(&self) -> FreezePolicy {
        if self.freeze_all {
            FreezePolicy::All
        } else {
            FreezePolicy::AllButLast(self.freeze_till.unwrap_or(0))
        }
    }

    /// `(height, width)` of the network input
    pub fn input_size(&self) -> (usize, usize) {
        (self.image_size[0], self.image_size[1])
    }
}

// ------------------------------------------------------------------
// Per-stage records
// ------------------------------------------------------------------

/// Data ingestion stage
#[derive(Debug, Clone, PartialEq)]
pub struct DataIngestionConfig {
    pub root_dir: PathBuf,
    pub source_url: String,
    pub local_data_file: PathBuf,
    pub unzip_dir: PathBuf,
    /// `unzip_dir/<dataset_dir>`; presence means the archive was already extracted
    pub dataset_dir: PathBuf,
    pub skip_if_present: bool,
}

/// Base model preparation stage
#[derive(Debug, Clone, PartialEq)]
pub struct PrepareBaseModelConfig {
    pub root_dir: PathBuf,
    pub base_model_path: PathBuf,
    pub updated_base_model_path: PathBuf,
    pub pretrained_weights_path: Option<PathBuf>,
    pub pretrained_weights_url: Option<String>,
    pub image_size: (usize, usize),
    pub learning_rate: f64,
    pub include_top: bool,
    pub weights: WeightsSource,
    pub classes: usize,
    pub dropout: f64,
    pub freeze: FreezePolicy,
    pub base_filters: usize,
}

/// Training stage
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    pub root_dir: PathBuf,
    pub trained_model_path: PathBuf,
    pub updated_base_model_path: PathBuf,
    pub training_data: PathBuf,
    pub epochs: usize,
    pub batch_size: usize,
    pub augmentation: bool,
    pub image_size: (usize, usize),
    pub validation_split: f64,
    pub seed: u64,
}

/// Evaluation stage
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationConfig {
    pub trained_model_path: PathBuf,
    pub training_data: PathBuf,
    pub score_path: PathBuf,
    pub mlflow_uri: Option<String>,
    pub experiment_name: String,
    pub registered_model_name: String,
    pub all_params: Params,
    pub image_size: (usize, usize),
    pub batch_size: usize,
    pub validation_split: f64,
}

fn default_dataset_dir() -> String {
    DEFAULT_DATASET_DIR.to_string()
}

fn default_score_path() -> PathBuf {
    PathBuf::from("scores.json")
}

fn default_experiment_name() -> String {
    "kidney-ct-classification".to_string()
}

fn default_registered_model_name() -> String {
    DEFAULT_REGISTERED_MODEL_NAME.to_string()
}

fn default_validation_split() -> f64 {
    0.30
}

fn default_seed() -> u64 {
    42
}

fn default_true() -> bool {
    true
}

fn default_base_filters() -> usize {
    64
}
