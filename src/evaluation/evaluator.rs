//! Held-out scoring shared by the training loop and the evaluation stage

use burn::{
    data::dataloader::batcher::Batcher,
    data::dataset::Dataset,
    nn::loss::CrossEntropyLossConfig,
    tensor::{backend::Backend, ElementConversion},
};
use serde::{Deserialize, Serialize};

use crate::dataset::{KidneyBatch, KidneyBatcher, KidneyCtDataset};
use crate::model::KidneyClassifier;
use crate::utils::error::{KidneyError, Result};

/// Loss and accuracy on a dataset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub loss: f64,
    pub accuracy: f64,
}

/// Score `model` on every item of `dataset`, in order and without augmentation.
///
/// The loss is the sample-weighted mean cross-entropy plus the L2 penalty
/// of the hidden dense kernels, the same objective training minimizes.
pub fn evaluate_model<B: Backend>(
    model: &KidneyClassifier<B>,
    dataset: &KidneyCtDataset,
    batch_size: usize,
    l2: f64,
    device: &B::Device,
) -> Result<Scores> {
    let len = dataset.len();
    if len == 0 {
        return Err(KidneyError::Dataset(
            "validation subset is empty; add images or raise validation_split".into(),
        ));
    }

    let batcher = KidneyBatcher::new();
    let loss_fn = CrossEntropyLossConfig::new().init(device);
    let mut loss_sum = 0.0f64;
    let mut correct = 0usize;

    let indices: Vec<usize> = (0..len).collect();
    for chunk in indices.chunks(batch_size.max(1)) {
        let items = dataset.load_batch(chunk)?;
        let batch: KidneyBatch<B> = batcher.batch(items, device);
        let n = chunk.len();

        let logits = model.forward(batch.images);
        let batch_loss: f64 = loss_fn
            .forward(logits.clone(), batch.targets.clone())
            .into_scalar()
            .elem();
        loss_sum += batch_loss * n as f64;

        let hits: i64 = logits
            .argmax(1)
            .reshape([n])
            .equal(batch.targets)
            .int()
            .sum()
            .into_scalar()
            .elem();
        correct += hits as usize;
    }

    let penalty: f64 = model.l2_penalty(l2).into_scalar().elem();
    Ok(Scores {
        loss: loss_sum / len as f64 + penalty,
        accuracy: correct as f64 / len as f64,
    })
}
