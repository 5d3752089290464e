//! Training trigger
//!
//! Runs the whole pipeline as a child process. Only one run at a time; a
//! second request while one is in flight gets 409.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::state::SharedState;

pub const TRAINING_DONE: &str = "Training done successfully!";

/// GET|POST /train - Run the pipeline and reload the model
pub async fn train(State(state): State<SharedState>) -> Response {
    let Ok(_guard) = state.training_lock.try_lock() else {
        return (StatusCode::CONFLICT, "Training is already in progress").into_response();
    };

    let config = &state.config;
    info!("Starting pipeline: {}", config.binary_path.display());
    let status = Command::new(&config.binary_path)
        .arg("--config")
        .arg(&config.config_path)
        .arg("--params")
        .arg(&config.params_path)
        .arg("run")
        .kill_on_drop(true)
        .status()
        .await;

    match status {
        Ok(status) if status.success() => {
            state.record_training(true).await;
            if let Err(e) = state.reload_model().await {
                warn!("Training finished but the model could not be reloaded: {}", e);
            }
            (StatusCode::OK, TRAINING_DONE).into_response()
        }
        Ok(status) => {
            state.record_training(false).await;
            error!("Pipeline exited with {}", status);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Training failed: pipeline exited with {}", status),
            )
                .into_response()
        }
        Err(e) => {
            state.record_training(false).await;
            error!("Could not start {}: {}", config.binary_path.display(), e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Training failed: could not start pipeline: {}", e),
            )
                .into_response()
        }
    }
}
