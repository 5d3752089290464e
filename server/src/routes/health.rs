//! Readiness report
//!
//! `status` is `ready` once a model is being served and `no_model` before
//! the first successful load. The route always answers 200 so health checks can
//! read the body either way.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::{ServedModel, SharedState, TrainingOutcome};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub model: Option<ServedModel>,
    pub training_in_progress: bool,
    pub last_training: Option<TrainingOutcome>,
    pub uptime_seconds: u64,
    pub version: &'static str,
}

/// GET /health
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    let model = state.served_model().await;
    Json(HealthResponse {
        status: if model.is_some() { "ready" } else { "no_model" },
        model_loaded: model.is_some(),
        model,
        training_in_progress: state.training_in_progress(),
        last_training: state.last_training().await,
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION"),
    })
}
