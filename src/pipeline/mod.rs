//! Stage orchestration
//!
//! Runs ingestion, base model preparation, training and evaluation in that
//! order. Every stage is wrapped in start/completion banners; the first
//! failure is logged with its full cause chain and aborts the run.

use std::error::Error as StdError;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::backend::{default_device, DefaultBackend, TrainingBackend};
use crate::config::ConfigurationManager;
use crate::evaluation::Evaluation;
use crate::ingestion::DataIngestion;
use crate::model::PrepareBaseModel;
use crate::training::Training;
use crate::utils::error::Result;

/// One pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Ingest,
    Prepare,
    Train,
    Evaluate,
}

impl Stage {
    /// Every stage in execution order
    pub const ALL: [Stage; 4] = [Stage::Ingest, Stage::Prepare, Stage::Train, Stage::Evaluate];

    /// Name used in the stage banners
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Ingest => "Data Ingestion",
            Stage::Prepare => "Prepare Base Model",
            Stage::Train => "Training",
            Stage::Evaluate => "Evaluation",
        }
    }

    fn execute(&self, manager: &ConfigurationManager, resume: bool) -> Result<()> {
        let device = default_device();
        match self {
            Stage::Ingest => DataIngestion::new(manager.data_ingestion_config()?).run(resume),
            Stage::Prepare => {
                PrepareBaseModel::new(manager.prepare_base_model_config()?)
                    .run::<DefaultBackend>(&device)?;
                Ok(())
            }
            Stage::Train => {
                Training::new(manager.training_config()?).train::<TrainingBackend>(&device)?;
                Ok(())
            }
            Stage::Evaluate => {
                let mut evaluation = Evaluation::new(manager.evaluation_config());
                evaluation.evaluate::<DefaultBackend>(&device)?;
                evaluation.save_score()?;
                evaluation.log_into_tracking()
            }
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// `"outer: cause: root cause"`
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

/// Run `body` between the stage banners.
pub fn with_stage_banner<T>(name: &str, body: impl FnOnce() -> Result<T>) -> Result<T> {
    info!(">>>>>> stage {} started <<<<<<", name);
    match body() {
        Ok(value) => {
            info!(">>>>>> stage {} completed <<<<<<\n\nx==========x", name);
            Ok(value)
        }
        Err(e) => {
            error!("stage {} failed: {}", name, error_chain(&e));
            Err(e)
        }
    }
}

/// Run a single stage. `resume` only affects ingestion.
pub fn run_stage(stage: Stage, manager: &ConfigurationManager, resume: bool) -> Result<()> {
    with_stage_banner(stage.name(), || stage.execute(manager, resume))
}

/// Run every stage in order, stopping at the first failure.
pub fn run_pipeline(manager: &ConfigurationManager, resume: bool) -> Result<()> {
    for stage in Stage::ALL {
        run_stage(stage, manager, resume)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::KidneyError;

    #[test]
    fn test_stage_names() {
        let names: Vec<&str> = Stage::ALL.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            ["Data Ingestion", "Prepare Base Model", "Training", "Evaluation"]
        );
    }

    #[test]
    fn test_banner_propagates_error() {
        let result: Result<()> = with_stage_banner("Training", || {
            Err(KidneyError::Dataset("no class folders".into()))
        });
        assert!(matches!(result, Err(KidneyError::Dataset(_))));
        assert_eq!(with_stage_banner("Evaluation", || Ok(3)).unwrap(), 3);
    }

    #[test]
    fn test_error_chain_includes_sources() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = KidneyError::from(io);
        assert_eq!(error_chain(&err), "IO error: missing: missing");
    }
}
