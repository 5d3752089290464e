//! torchvision VGG19 checkpoint import
//!
//! torchvision stores the convolutions under `features.<i>` where `i` counts
//! every layer of its `nn.Sequential` (ReLUs and pools included), and the
//! top under `classifier.{0,3,6}`. The remaps below move those keys onto
//! `Vgg19`'s `features.<n>` vector and `top.fc{1,2,3}`.

use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use tracing::info;

use super::vgg::{Vgg19, Vgg19Config, Vgg19Record, VGG19_BLOCKS};
use crate::ingestion::http_client::{download_to_file, MAX_DOWNLOAD_BYTES};
use crate::utils::error::{KidneyError, Result};

/// Filters of the first block in the torchvision network
pub const PRETRAINED_BASE_FILTERS: usize = 64;

/// Index of every conv layer inside torchvision's `features` sequence
pub fn torchvision_conv_indices() -> Vec<usize> {
    let mut indices = Vec::with_capacity(16);
    let mut i = 0;
    for convs in VGG19_BLOCKS {
        for _ in 0..convs {
            indices.push(i);
            // conv, relu
            i += 2;
        }
        // max pool
        i += 1;
    }
    indices
}

/// `(pattern, replacement)` pairs that map torchvision keys onto `Vgg19`
pub fn key_remaps(include_top: bool) -> Vec<(String, String)> {
    let mut remaps: Vec<(String, String)> = torchvision_conv_indices()
        .into_iter()
        .enumerate()
        .map(|(pos, idx)| {
            (
                format!(r"^features\.{}\.(weight|bias)$", idx),
                format!("features.{}.$1", pos),
            )
        })
        .collect();

    if include_top {
        for (idx, name) in [(0, "fc1"), (3, "fc2"), (6, "fc3")] {
            remaps.push((
                format!(r"^classifier\.{}\.(weight|bias)$", idx),
                format!("top.{}.$1", name),
            ));
        }
    }
    remaps
}

/// Load torchvision VGG19 weights from a `.pth` checkpoint into a new network.
pub fn load_torchvision_vgg19<B: Backend>(
    config: &Vgg19Config,
    checkpoint: &Path,
    device: &B::Device,
) -> Result<Vgg19<B>> {
    if config.base_filters != PRETRAINED_BASE_FILTERS {
        return Err(KidneyError::Config(format!(
            "pretrained weights need base_filters = {}, got {}",
            PRETRAINED_BASE_FILTERS, config.base_filters
        )));
    }
    if !checkpoint.is_file() {
        return Err(KidneyError::ModelLoad(format!(
            "checkpoint not found: {}",
            checkpoint.display()
        )));
    }

    let mut args = LoadArgs::new(checkpoint.to_path_buf());
    for (pattern, replacement) in key_remaps(config.include_top) {
        args = args.with_key_remap(&pattern, &replacement);
    }

    let recorder = PyTorchFileRecorder::<FullPrecisionSettings>::default();
    let record: Vgg19Record<B> = Recorder::<B>::load(&recorder, args, device)
        .map_err(|e| {
            KidneyError::ModelLoad(format!(
                "failed to import {}: {:?}",
                checkpoint.display(),
                e
            ))
        })?;

    info!("Loaded pretrained VGG19 weights from {}", checkpoint.display());
    Ok(config.init::<B>(device).load_record(record))
}

/// Make sure the checkpoint exists locally, downloading it when a URL is configured.
pub fn ensure_checkpoint(path: Option<&Path>, url: Option<&str>) -> Result<PathBuf> {
    let path = path.ok_or_else(|| {
        KidneyError::Config(
            "weights = \"imagenet\" needs prepare_base_model.pretrained_weights_path".into(),
        )
    })?;
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    match url {
        Some(url) => {
            info!("Downloading pretrained weights from {}", url);
            download_to_file(url, path, MAX_DOWNLOAD_BYTES)?;
            Ok(path.to_path_buf())
        }
        None => Err(KidneyError::ModelLoad(format!(
            "pretrained weights not found at {} and no pretrained_weights_url is set",
            path.display()
        ))),
    }
}
