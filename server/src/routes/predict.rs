//! Prediction endpoint
//!
//! The base64 payload is decoded in memory and the forward pass runs on the
//! blocking pool, so the async workers never wait on the model.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use kidney_ct::inference::PredictionResponse;
use kidney_ct::utils::common::decode_image_base64;
use kidney_ct::KidneyError;
use serde::Deserialize;
use tracing::error;

use super::ApiError;
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    /// Base64 encoded image (a `data:` URL prefix is accepted)
    pub image: String,
}

/// POST /predict - Classify one image
pub async fn predict(
    State(state): State<SharedState>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<Vec<PredictionResponse>>, ApiError> {
    let Json(request) =
        payload.map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?;

    let predictor = state.predictor().await.ok_or_else(|| {
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "no trained model is loaded; call /train first",
        )
    })?;

    let result = tokio::task::spawn_blocking(move || {
        let image = decode_image_base64(&request.image)?;
        let predictor = predictor
            .lock()
            .map_err(|_| KidneyError::Inference("predictor lock poisoned".into()))?;
        predictor.predict_image(&image)
    })
    .await
    .map_err(|e| {
        error!("Prediction task failed: {}", e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "prediction task failed")
    })?;

    match result {
        Ok(prediction) => Ok(Json(prediction.to_response())),
        Err(KidneyError::InvalidInput(msg)) => Err(ApiError::new(StatusCode::BAD_REQUEST, msg)),
        Err(e) => {
            error!("Prediction failed: {}", e);
            Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}
