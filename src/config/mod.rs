//! Configuration layer
//!
//! `config/config.toml` holds paths and URLs, `params.toml` holds
//! hyperparameters. Both are parsed once into typed records; every stage
//! receives only its own immutable record.

pub mod entity;
pub mod manager;

pub use entity::{
    DataIngestionConfig, EvaluationConfig, Params, PathsConfig, PrepareBaseModelConfig,
    TrainingConfig,
};
pub use manager::{ConfigurationManager, CONFIG_FILE_PATH, PARAMS_FILE_PATH};
