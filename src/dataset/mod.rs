//! Dataset module
//!
//! - `folder`: class discovery and the deterministic train/validation split
//! - `augmentation`: random affine perturbations for training images
//! - `burn_dataset`: Burn `Dataset` and `Batcher` implementations

pub mod augmentation;
pub mod burn_dataset;
pub mod folder;

pub use augmentation::{AugmentationConfig, Augmenter};
pub use burn_dataset::{KidneyBatch, KidneyBatcher, KidneyCtDataset, KidneyItem};
pub use folder::{discover_classes, ImageFolder, ImageSample, Subset};

/// Labels in the index order produced by alphabetical folder discovery
pub const CLASS_LABELS: [&str; 4] = ["Cyst", "Normal", "Stone", "Tumor"];

/// Number of classes in the kidney CT dataset
pub const NUM_CLASSES: usize = CLASS_LABELS.len();

/// Get the default label for an index
pub fn class_label(idx: usize) -> Option<&'static str> {
    CLASS_LABELS.get(idx).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_label_table_matches_folder_discovery() {
        let dir = tempdir().unwrap();
        for name in ["Tumor", "Normal", "Cyst", "Stone"] {
            std::fs::create_dir_all(dir.path().join(name)).unwrap();
        }
        let discovered = discover_classes(dir.path()).unwrap();
        for (idx, name) in discovered.iter().enumerate() {
            assert_eq!(class_label(idx), Some(name.as_str()));
        }
        assert_eq!(discovered.len(), NUM_CLASSES);
    }
}
