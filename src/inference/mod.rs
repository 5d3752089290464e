//! Inference: load a trained model once and classify images with it.

pub mod predictor;

pub use predictor::{resolve_labels, PredictionResponse, PredictionResult, Predictor};
