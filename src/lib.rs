//! # Kidney CT Classification
//!
//! A four-stage transfer-learning pipeline that classifies kidney CT slices
//! as Cyst, Normal, Stone or Tumor, built on the Burn framework.
//!
//! ## Modules
//!
//! - `config`: typed `config.toml` / `params.toml` and per-stage records
//! - `ingestion`: dataset download and zip extraction
//! - `dataset`: class folders, the deterministic split, augmentation, batching
//! - `model`: VGG19 base, classification head, artifacts, preparation stage
//! - `training`: SGD loop with plateau LR reduction and early stopping
//! - `evaluation`: held-out scoring, `scores.json`, experiment tracking
//! - `tracking`: local file store and MLflow REST backends
//! - `inference`: single-image prediction
//! - `pipeline`: stage orchestration
//! - `utils`: logging, errors, charts and helpers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kidney_ct::config::{ConfigurationManager, CONFIG_FILE_PATH, PARAMS_FILE_PATH};
//! use kidney_ct::pipeline::run_pipeline;
//!
//! let manager = ConfigurationManager::new(CONFIG_FILE_PATH, PARAMS_FILE_PATH)?;
//! run_pipeline(&manager, false)?;
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod evaluation;
pub mod inference;
pub mod ingestion;
pub mod model;
pub mod pipeline;
pub mod tracking;
pub mod training;
pub mod utils;

pub use config::ConfigurationManager;
pub use dataset::{ImageFolder, KidneyBatcher, KidneyCtDataset, CLASS_LABELS, NUM_CLASSES};
pub use evaluation::{Evaluation, Scores};
pub use inference::{PredictionResult, Predictor};
pub use model::{KidneyClassifier, KidneyClassifierConfig, PrepareBaseModel};
pub use pipeline::{run_pipeline, run_stage, Stage};
pub use training::{Training, TrainingHistory};
pub use utils::error::{KidneyError, Result};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
