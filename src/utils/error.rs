//! Error Handling Module
//!
//! Defines the error taxonomy shared by every pipeline stage and the
//! inference service. Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for kidney CT pipeline operations
#[derive(Error, Debug)]
pub enum KidneyError {
    /// Remote fetch failed (network, HTTP status, unexpected payload)
    #[error("Download error: {0}")]
    Download(String),

    /// Archive could not be parsed or extracted
    #[error("Corrupt archive '{0}': {1}")]
    CorruptArchive(PathBuf, String),

    /// Configuration file missing, empty or malformed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Model artifact could not be built, saved or loaded
    #[error("Model load error: {0}")]
    ModelLoad(String),

    /// Dataset layout or iterator problem
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Experiment tracking backend failure
    #[error("Tracking error: {0}")]
    Tracking(String),

    /// Error with inference
    #[error("Inference error: {0}")]
    Inference(String),

    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    Image(PathBuf, String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<serde_json::Error> for KidneyError {
    fn from(err: serde_json::Error) -> Self {
        KidneyError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for KidneyError {
    fn from(err: toml::de::Error) -> Self {
        KidneyError::Config(err.to_string())
    }
}

impl From<image::ImageError> for KidneyError {
    fn from(err: image::ImageError) -> Self {
        KidneyError::Image(PathBuf::from("<memory>"), err.to_string())
    }
}

/// Convenience Result type for pipeline operations
pub type Result<T> = std::result::Result<T, KidneyError>;

/// Attach a message to a foreign error or a missing value, yielding `InvalidInput`
pub trait ResultExt<T> {
    fn context(self, msg: &str) -> Result<T>;

    /// Lazy variant of `context`
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: &str) -> Result<T> {
        self.map_err(|e| KidneyError::InvalidInput(format!("{}: {}", msg, e)))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| KidneyError::InvalidInput(format!("{}: {}", f(), e)))
    }
}

impl<T> ResultExt<T> for Option<T> {
    fn context(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| KidneyError::InvalidInput(msg.to_string()))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.ok_or_else(|| KidneyError::InvalidInput(f()))
    }
}
