//! Evaluation stage
//!
//! Scores the trained model on the validation subset, writes `scores.json`
//! and then, when a tracking URI is configured, records the run.

pub mod evaluator;

use burn::tensor::backend::Backend;
use tracing::{error, info, warn};

pub use evaluator::{evaluate_model, Scores};

use crate::config::EvaluationConfig;
use crate::dataset::{ImageFolder, KidneyCtDataset, Subset};
use crate::model::{artifact::artifact_files, load_classifier};
use crate::tracking::{tracker_for_uri, ExperimentTracker, RunStatus};
use crate::utils::common::save_json;
use crate::utils::error::{Result, ResultExt};

/// Artifact directory the model is logged under
pub const MODEL_ARTIFACT_PATH: &str = "model";

pub struct Evaluation {
    config: EvaluationConfig,
    scores: Option<Scores>,
}

impl Evaluation {
    pub fn new(config: EvaluationConfig) -> Self {
        Self {
            config,
            scores: None,
        }
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    pub fn scores(&self) -> Option<Scores> {
        self.scores
    }

    /// Load the trained model and score it on the validation subset.
    pub fn evaluate<B: Backend>(&mut self, device: &B::Device) -> Result<Scores> {
        let (model, metadata) =
            load_classifier::<B>(&self.config.trained_model_path, device)?;

        let folder = ImageFolder::open(&self.config.training_data)?;
        if let Some(names) = &metadata.class_names {
            if names.as_slice() != folder.class_names() {
                warn!(
                    "Model was trained on classes {:?} but {} holds {:?}",
                    names,
                    folder.root().display(),
                    folder.class_names()
                );
            }
        }

        let dataset = KidneyCtDataset::from_folder(
            &folder,
            Subset::Validation,
            self.config.validation_split,
            self.config.image_size,
        );
        info!("Evaluating on {} validation images", dataset.samples().len());

        let l2 = metadata.classifier.as_ref().map(|c| c.l2).unwrap_or(0.0);
        let scores = evaluate_model(&model, &dataset, self.config.batch_size, l2, device)?;
        info!(
            "Validation loss: {:.4} | accuracy: {:.2}%",
            scores.loss,
            scores.accuracy * 100.0
        );
        self.scores = Some(scores);
        Ok(scores)
    }

    fn require_scores(&self) -> Result<Scores> {
        self.scores.context("evaluate() has not been run")
    }

    /// Write `{"loss", "accuracy"}` to the score file.
    pub fn save_score(&self) -> Result<()> {
        let scores = self.require_scores()?;
        save_json(&self.config.score_path, &scores)?;
        info!("Scores written to {}", self.config.score_path.display());
        Ok(())
    }

    /// Record params, metrics and the model in the configured tracking store.
    pub fn log_into_tracking(&self) -> Result<()> {
        let scores = self.require_scores()?;
        let Some(uri) = self.config.mlflow_uri.as_deref() else {
            warn!("No evaluation.mlflow_uri configured, skipping experiment tracking");
            return Ok(());
        };

        let mut tracker = tracker_for_uri(uri)?;
        info!("Logging run to {} tracker at {}", tracker.backend(), uri);
        tracker.start_run(&self.config.experiment_name)?;

        match self.log_run(tracker.as_mut(), scores) {
            Ok(()) => tracker.end_run(RunStatus::Finished),
            Err(e) => {
                if let Err(close) = tracker.end_run(RunStatus::Failed) {
                    error!("Could not mark run as failed: {}", close);
                }
                Err(e)
            }
        }
    }

    fn log_run(&self, tracker: &mut dyn ExperimentTracker, scores: Scores) -> Result<()> {
        tracker.log_params(&self.config.all_params.as_key_values())?;
        tracker.log_metrics(&[
            ("loss".to_string(), scores.loss),
            ("accuracy".to_string(), scores.accuracy),
        ])?;

        let registered = tracker
            .registers_models()
            .then_some(self.config.registered_model_name.as_str());
        tracker.log_model(
            &artifact_files(&self.config.trained_model_path),
            MODEL_ARTIFACT_PATH,
            registered,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::KidneyError;
    use crate::config::Params;
    use crate::tracking::file_store::read_run_meta;
    use crate::utils::common::load_json;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn config(root: &std::path::Path, mlflow_uri: Option<String>) -> EvaluationConfig {
        EvaluationConfig {
            trained_model_path: root.join("model.mpk"),
            training_data: root.join("data"),
            score_path: root.join("scores.json"),
            mlflow_uri,
            experiment_name: "kidney".into(),
            registered_model_name: "VGG19Model".into(),
            all_params: Params::default(),
            image_size: (32, 32),
            batch_size: 4,
            validation_split: 0.3,
        }
    }

    #[test]
    fn test_save_score_requires_evaluation() {
        let dir = tempdir().unwrap();
        let evaluation = Evaluation::new(config(dir.path(), None));
        assert!(evaluation.save_score().is_err());
        assert!(!dir.path().join("scores.json").exists());
    }

    #[test]
    fn test_scores_written_then_tracked_to_file_store() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("model.mpk"), b"weights").unwrap();
        std::fs::write(dir.path().join("model.json"), b"{}").unwrap();
        let store = dir.path().join("mlruns");

        let mut evaluation = Evaluation::new(config(
            dir.path(),
            Some(store.to_string_lossy().to_string()),
        ));
        evaluation.scores = Some(Scores {
            loss: 0.4,
            accuracy: 0.75,
        });
        evaluation.save_score().unwrap();
        evaluation.log_into_tracking().unwrap();

        let written: Scores = load_json(&dir.path().join("scores.json")).unwrap();
        assert_eq!(written.accuracy, 0.75);

        let run_dir: PathBuf = std::fs::read_dir(store.join("kidney"))
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        assert!(run_dir.join("artifacts/model/model.mpk").exists());
        assert!(run_dir.join("artifacts/model/model.json").exists());
        assert!(run_dir.join("params/learning_rate").exists());
        assert_eq!(read_run_meta(&run_dir).unwrap().status, RunStatus::Finished);
    }

    #[test]
    fn test_tracking_failure_keeps_score_file() {
        let dir = tempdir().unwrap();
        let mut evaluation = Evaluation::new(config(dir.path(), Some("s3://bucket".into())));
        evaluation.scores = Some(Scores {
            loss: 1.0,
            accuracy: 0.5,
        });
        evaluation.save_score().unwrap();
        assert!(matches!(
            evaluation.log_into_tracking(),
            Err(KidneyError::Tracking(_))
        ));
        assert!(dir.path().join("scores.json").exists());
    }

    #[test]
    fn test_missing_uri_skips_tracking() {
        let dir = tempdir().unwrap();
        let mut evaluation = Evaluation::new(config(dir.path(), None));
        evaluation.scores = Some(Scores {
            loss: 1.0,
            accuracy: 0.5,
        });
        assert!(evaluation.log_into_tracking().is_ok());
    }
}
