//! Single-image prediction with a trained classifier
//!
//! The image is resized (bilinear) to the model input, rescaled to [0, 1],
//! run through the network and softmax, and the argmax is mapped to a label
//! from the class order persisted with the model.

use std::path::Path;
use std::time::{Duration, Instant};

use burn::prelude::*;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dataset::burn_dataset::{resize_rgb, to_chw_rescaled};
use crate::dataset::CLASS_LABELS;
use crate::model::{load_classifier, KidneyClassifier, ModelMetadata};
use crate::utils::common::decode_image_base64;
use crate::utils::error::{KidneyError, Result};

/// One entry of the `/predict` response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub image: String,
}

/// Result of a single prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResult {
    pub class_index: usize,
    pub label: String,
    /// Softmax probability of the predicted class
    pub confidence: f32,
    pub probabilities: Vec<f32>,
    pub inference_time_ms: f64,
}

impl PredictionResult {
    fn new(probabilities: Vec<f32>, labels: &[String], elapsed: Duration) -> Result<Self> {
        let (class_index, confidence) = probabilities
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
                Some((_, bp)) if bp >= p => best,
                _ => Some((i, p)),
            })
            .ok_or_else(|| KidneyError::Inference("model returned no probabilities".into()))?;

        let label = labels.get(class_index).cloned().ok_or_else(|| {
            KidneyError::Inference(format!("no label for class index {}", class_index))
        })?;

        Ok(Self {
            class_index,
            label,
            confidence,
            probabilities,
            inference_time_ms: elapsed.as_secs_f64() * 1000.0,
        })
    }

    /// `[{"image": "<label>"}]`
    pub fn to_response(&self) -> Vec<PredictionResponse> {
        vec![PredictionResponse {
            image: self.label.clone(),
        }]
    }

    pub fn display(&self, labels: &[String]) -> String {
        let mut output = format!(
            "Prediction: {} (class {})\nConfidence: {:.2}%\nInference time: {:.2} ms\n",
            self.label,
            self.class_index,
            self.confidence * 100.0,
            self.inference_time_ms
        );
        for (label, p) in labels.iter().zip(&self.probabilities) {
            output.push_str(&format!("  {:<8} {:.2}%\n", label, p * 100.0));
        }
        output
    }
}

/// Label order for a model: the persisted class names when present,
/// otherwise the fixed table.
pub fn resolve_labels(persisted: Option<&[String]>, num_classes: usize) -> Result<Vec<String>> {
    let defaults: Vec<String> = CLASS_LABELS.iter().map(|s| s.to_string()).collect();
    let labels = match persisted {
        Some(names) => {
            if names != defaults.as_slice() {
                warn!(
                    "Persisted class order {:?} differs from the default table {:?}; using the persisted order",
                    names, defaults
                );
            }
            names.to_vec()
        }
        None => defaults,
    };

    if labels.len() != num_classes {
        return Err(KidneyError::ModelLoad(format!(
            "model has {} outputs but {} labels are known",
            num_classes,
            labels.len()
        )));
    }
    Ok(labels)
}

/// A loaded classifier ready to answer requests
pub struct Predictor<B: Backend> {
    model: KidneyClassifier<B>,
    metadata: ModelMetadata,
    labels: Vec<String>,
    image_size: (usize, usize),
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    /// Load a trained model and its label order.
    pub fn load(path: &Path, device: &B::Device) -> Result<Self> {
        let (model, metadata) = load_classifier::<B>(path, device)?;
        let image_size = metadata
            .classifier
            .as_ref()
            .map(|c| (c.image_height, c.image_width))
            .ok_or_else(|| KidneyError::ModelLoad("classifier config missing".into()))?;
        let labels = resolve_labels(metadata.class_names.as_deref(), model.num_classes())?;
        info!(
            "Loaded model from {} ({}x{} input, classes {:?})",
            path.display(),
            image_size.0,
            image_size.1,
            labels
        );

        Ok(Self {
            model,
            metadata,
            labels,
            image_size,
            device: device.clone(),
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn image_size(&self) -> (usize, usize) {
        self.image_size
    }

    /// Classify one decoded image.
    pub fn predict_image(&self, image: &DynamicImage) -> Result<PredictionResult> {
        let start = Instant::now();
        let (height, width) = self.image_size;
        let rgb = resize_rgb(image, height, width);
        let input = Tensor::<B, 4>::from_floats(
            TensorData::new(to_chw_rescaled(&rgb), [1, 3, height, width]),
            &self.device,
        );

        let probabilities = self
            .model
            .forward_softmax(input)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| KidneyError::Inference(format!("{:?}", e)))?;

        PredictionResult::new(probabilities, &self.labels, start.elapsed())
    }

    /// Classify an image file.
    pub fn predict_path(&self, path: &Path) -> Result<PredictionResult> {
        let image = image::open(path)
            .map_err(|e| KidneyError::Image(path.to_path_buf(), e.to_string()))?;
        self.predict_image(&image)
    }

    /// Classify a base64 payload, decoded in memory.
    pub fn predict_base64(&self, payload: &str) -> Result<PredictionResult> {
        self.predict_image(&decode_image_base64(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DefaultBackend;
    use crate::model::{save_classifier, FreezePolicy, KidneyClassifierConfig, OptimizerSpec, WeightsSource};
    use base64::Engine;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    fn saved_model(dir: &Path, class_names: Option<Vec<String>>) -> std::path::PathBuf {
        let config = KidneyClassifierConfig::new()
            .with_image_height(32)
            .with_image_width(32)
            .with_base_filters(4);
        let model: KidneyClassifier<DefaultBackend> = config.init(&Default::default());
        let mut metadata = ModelMetadata::classifier(
            config,
            FreezePolicy::All,
            WeightsSource::Random,
            OptimizerSpec::sgd(0.01),
        );
        if let Some(names) = class_names {
            metadata = metadata.with_class_names(names);
        }
        let path = dir.join("model.mpk");
        save_classifier(&model, &path, &metadata).unwrap();
        path
    }

    fn png_base64() -> String {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(50, 40, Rgb([120, 30, 200])))
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[test]
    fn test_predicts_one_of_four_labels() {
        let dir = tempdir().unwrap();
        let path = saved_model(dir.path(), None);
        let predictor = Predictor::<DefaultBackend>::load(&path, &Default::default()).unwrap();

        let result = predictor.predict_base64(&png_base64()).unwrap();
        assert!(CLASS_LABELS.contains(&result.label.as_str()));
        let sum: f32 = result.probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        assert_eq!(result.to_response().len(), 1);
    }

    #[test]
    fn test_persisted_order_wins() {
        let dir = tempdir().unwrap();
        let names: Vec<String> = ["a", "b", "c", "d"].map(String::from).to_vec();
        let path = saved_model(dir.path(), Some(names.clone()));
        let predictor = Predictor::<DefaultBackend>::load(&path, &Default::default()).unwrap();
        assert_eq!(predictor.labels(), names.as_slice());
    }

    #[test]
    fn test_label_count_mismatch() {
        let names: Vec<String> = ["a", "b"].map(String::from).to_vec();
        assert!(matches!(
            resolve_labels(Some(names.as_slice()), 4),
            Err(KidneyError::ModelLoad(_))
        ));
        assert_eq!(resolve_labels(None, 4).unwrap()[2], "Stone");
    }

    #[test]
    fn test_bad_payload_is_invalid_input() {
        let dir = tempdir().unwrap();
        let path = saved_model(dir.path(), None);
        let predictor = Predictor::<DefaultBackend>::load(&path, &Default::default()).unwrap();
        assert!(matches!(
            predictor.predict_base64("not base64!"),
            Err(KidneyError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_response_shape() {
        let result = PredictionResult::new(
            vec![0.1, 0.2, 0.6, 0.1],
            &CLASS_LABELS.map(String::from),
            Duration::from_millis(3),
        )
        .unwrap();
        assert_eq!(
            serde_json::to_string(&result.to_response()).unwrap(),
            r#"[{"image":"Stone"}]"#
        );
    }
}
