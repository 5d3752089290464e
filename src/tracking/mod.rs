//! Experiment tracking
//!
//! `ExperimentTracker` abstracts the two run stores the evaluation stage can
//! log into:
//!
//! - `FileStoreTracker`: a local directory (`file:` URIs and bare paths).
//!   Models are logged but never registered.
//! - `MlflowRestTracker`: an MLflow-compatible REST server (`http`/`https`).
//!   Models are logged and registered under a name.

pub mod file_store;
pub mod mlflow;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use file_store::FileStoreTracker;
pub use mlflow::MlflowRestTracker;

use crate::utils::error::{KidneyError, Result};

/// Final state of a tracked run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
        }
    }
}

/// A run store that records params, metrics and model artifacts
pub trait ExperimentTracker: Send {
    /// Short backend name for logs
    fn backend(&self) -> &'static str;

    /// Whether `log_model` also registers the model
    fn registers_models(&self) -> bool;

    /// Open a run in `experiment`, creating the experiment when needed.
    fn start_run(&mut self, experiment: &str) -> Result<String>;

    fn log_params(&mut self, params: &[(String, String)]) -> Result<()>;

    fn log_metrics(&mut self, metrics: &[(String, f64)]) -> Result<()>;

    /// Upload the model files under `artifact_path`; register them as
    /// `registered_name` when the backend has a registry.
    fn log_model(
        &mut self,
        files: &[PathBuf],
        artifact_path: &str,
        registered_name: Option<&str>,
    ) -> Result<()>;

    fn end_run(&mut self, status: RunStatus) -> Result<()>;
}

/// Pick the tracker for a tracking URI.
///
/// `http://` and `https://` go to the REST client; `file:` URIs and bare
/// paths go to the local file store. Other schemes are rejected.
pub fn tracker_for_uri(uri: &str) -> Result<Box<dyn ExperimentTracker>> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(KidneyError::Tracking("empty tracking URI".into()));
    }

    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Ok(Box::new(MlflowRestTracker::new(uri)?));
    }
    if let Some(path) = uri.strip_prefix("file://").or_else(|| uri.strip_prefix("file:")) {
        return Ok(Box::new(FileStoreTracker::new(Path::new(path))));
    }
    match uri.split_once("://") {
        Some((scheme, _)) => Err(KidneyError::Tracking(format!(
            "unsupported tracking URI scheme '{}'",
            scheme
        ))),
        None => Ok(Box::new(FileStoreTracker::new(Path::new(uri)))),
    }
}

/// Milliseconds since the Unix epoch
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
