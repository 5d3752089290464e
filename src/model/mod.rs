//! Model module
//!
//! - `vgg`: the VGG19 feature extractor (optionally with its ImageNet top)
//! - `classifier`: VGG19 base plus the dense classification head
//! - `pretrained`: torchvision checkpoint import
//! - `artifact`: record + JSON sidecar persistence
//! - `prepare`: the base model preparation stage

pub mod artifact;
pub mod classifier;
pub mod prepare;
pub mod pretrained;
pub mod vgg;

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use artifact::{
    load_base_network, load_classifier, save_base_network, save_classifier, ArtifactKind,
    ModelMetadata, OptimizerSpec,
};
pub use classifier::{ArchitectureSummary, KidneyClassifier, KidneyClassifierConfig, LayerSummary};
pub use prepare::PrepareBaseModel;
pub use vgg::{Vgg19, Vgg19Config};

/// Which base layers stop receiving gradients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "trainable", rename_all = "snake_case")]
pub enum FreezePolicy {
    /// Every base layer is frozen
    All,
    /// Everything except the trailing `n` weighted layers is frozen
    AllButLast(usize),
}

impl FreezePolicy {
    /// Number of leading layers frozen out of `total`
    pub fn frozen_count(&self, total: usize) -> usize {
        match *self {
            FreezePolicy::All => total,
            FreezePolicy::AllButLast(n) => total.saturating_sub(n),
        }
    }
}

/// Where the base network's initial weights come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightsSource {
    /// torchvision's ImageNet VGG19 checkpoint
    ImageNet,
    /// Random initialisation
    Random,
    /// A specific PyTorch checkpoint
    File(PathBuf),
}

impl FromStr for WeightsSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_lowercase().as_str() {
            "" => Err("weights must not be empty".to_string()),
            "imagenet" => Ok(WeightsSource::ImageNet),
            "none" | "random" => Ok(WeightsSource::Random),
            _ => {
                let path = PathBuf::from(trimmed);
                match path.extension().and_then(|e| e.to_str()) {
                    Some("pth") | Some("pt") => Ok(WeightsSource::File(path)),
                    _ => Err(format!(
                        "unknown weights '{}': expected imagenet, none or a .pth/.pt path",
                        trimmed
                    )),
                }
            }
        }
    }
}

impl std::fmt::Display for WeightsSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WeightsSource::ImageNet => write!(f, "imagenet"),
            WeightsSource::Random => write!(f, "none"),
            WeightsSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}
