//! Application state for the kidney CT server
//!
//! Holds the loaded predictor behind a read-mostly lock, swapped in place
//! after a successful retrain, and the single-flight guard for `/train`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use kidney_ct::backend::{default_device, DefaultBackend};
use kidney_ct::inference::Predictor;
use kidney_ct::utils::error::{KidneyError, Result};
use tokio::sync::RwLock;
use tracing::info;

pub type ServerPredictor = Predictor<DefaultBackend>;

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Pipeline binary started by `/train`
    pub binary_path: PathBuf,
    /// Forwarded to the pipeline binary
    pub config_path: PathBuf,
    pub params_path: PathBuf,
    /// Trained model served by `/predict`
    pub model_path: PathBuf,
}

/// What is being served, captured when a model is installed
#[derive(Clone, Debug, Serialize)]
pub struct ServedModel {
    pub path: PathBuf,
    pub loaded_at: DateTime<Utc>,
    /// When the pipeline wrote the artifact
    pub trained_at: DateTime<Utc>,
    pub labels: Vec<String>,
    pub input_size: [usize; 2],
}

/// Outcome of the most recent `/train` run
#[derive(Clone, Debug, Serialize)]
pub struct TrainingOutcome {
    pub finished_at: DateTime<Utc>,
    pub succeeded: bool,
}

struct Slot {
    predictor: Arc<Mutex<ServerPredictor>>,
    served: ServedModel,
}

/// Shared application state
pub struct AppState {
    pub config: ServerConfig,
    slot: RwLock<Option<Slot>>,
    last_training: RwLock<Option<TrainingOutcome>>,
    /// Held for the whole duration of a training run
    pub training_lock: tokio::sync::Mutex<()>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            slot: RwLock::new(None),
            last_training: RwLock::new(None),
            training_lock: tokio::sync::Mutex::new(()),
            started_at: Instant::now(),
        }
    }

    /// Current predictor, if a model has been loaded
    pub async fn predictor(&self) -> Option<Arc<Mutex<ServerPredictor>>> {
        self.slot.read().await.as_ref().map(|slot| slot.predictor.clone())
    }

    /// Description of the served model, if any
    pub async fn served_model(&self) -> Option<ServedModel> {
        self.slot.read().await.as_ref().map(|slot| slot.served.clone())
    }

    /// Replace the served model.
    pub async fn install(&self, predictor: ServerPredictor) {
        let (height, width) = predictor.image_size();
        let served = ServedModel {
            path: self.config.model_path.clone(),
            loaded_at: Utc::now(),
            trained_at: predictor.metadata().created_at,
            labels: predictor.labels().to_vec(),
            input_size: [height, width],
        };
        *self.slot.write().await = Some(Slot {
            predictor: Arc::new(Mutex::new(predictor)),
            served,
        });
    }

    pub async fn record_training(&self, succeeded: bool) {
        *self.last_training.write().await = Some(TrainingOutcome {
            finished_at: Utc::now(),
            succeeded,
        });
    }

    pub async fn last_training(&self) -> Option<TrainingOutcome> {
        self.last_training.read().await.clone()
    }

    /// True while a `/train` run holds the lock
    pub fn training_in_progress(&self) -> bool {
        self.training_lock.try_lock().is_err()
    }

    /// Load the trained model from disk and start serving it.
    pub async fn reload_model(&self) -> Result<()> {
        let path = self.config.model_path.clone();
        let predictor = tokio::task::spawn_blocking(move || {
            ServerPredictor::load(&path, &default_device())
        })
        .await
        .map_err(|e| KidneyError::ModelLoad(format!("model loader task failed: {}", e)))??;

        self.install(predictor).await;
        info!("Serving model from {}", self.config.model_path.display());
        Ok(())
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub type SharedState = Arc<AppState>;
