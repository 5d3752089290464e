//! Directory-backed image dataset
//!
//! Expects one sub-directory per class:
//! ```text
//! root/
//! ├── Cyst/
//! ├── Normal/
//! ├── Stone/
//! └── Tumor/
//! ```
//! Class indices follow the alphabetical order of the folder names. Within a
//! class, files are visited in sorted order, so the validation subset (the
//! leading `floor(split * n)` files of every class) is identical on every
//! construction.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::utils::error::{KidneyError, Result};

/// File extensions accepted as images
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

/// Which side of the train/validation split to iterate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Subset {
    Training,
    Validation,
}

/// A single image sample with its label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSample {
    pub path: PathBuf,
    pub label: usize,
}

/// Class-labelled image folders
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    class_names: Vec<String>,
    /// Sorted files per class, indexed by label
    files: Vec<Vec<PathBuf>>,
}

/// Sorted names of the class sub-directories of `root`.
pub fn discover_classes(root: &Path) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Err(KidneyError::Dataset(format!(
            "dataset directory does not exist: {}",
            root.display()
        )));
    }

    let mut classes = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                classes.push(name.to_string());
            }
        }
    }
    classes.sort();
    Ok(classes)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

impl ImageFolder {
    /// Scan `root` for class folders and their images.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let class_names = discover_classes(&root)?;
        if class_names.is_empty() {
            return Err(KidneyError::Dataset(format!(
                "no class folders found in {}",
                root.display()
            )));
        }

        let mut files = Vec::with_capacity(class_names.len());
        for class_name in &class_names {
            let class_files: Vec<PathBuf> = WalkDir::new(root.join(class_name))
                .min_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && is_image(e.path()))
                .map(|e| e.into_path())
                .collect();
            debug!("Class '{}': {} images", class_name, class_files.len());
            files.push(class_files);
        }

        let folder = Self {
            root,
            class_names,
            files,
        };
        info!(
            "Found {} images belonging to {} classes in {}",
            folder.len(),
            folder.num_classes(),
            folder.root.display()
        );
        Ok(folder)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Class names in label order
    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Total number of images across classes
    pub fn len(&self) -> usize {
        self.files.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn class_to_idx(&self) -> HashMap<String, usize> {
        self.class_names
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect()
    }

    /// Samples of one side of the split, in class order then file order.
    pub fn subset(&self, subset: Subset, validation_split: f64) -> Vec<ImageSample> {
        let mut samples = Vec::new();
        for (label, class_files) in self.files.iter().enumerate() {
            let n = class_files.len();
            let cut = ((validation_split * n as f64).floor() as usize).min(n);
            let range = match subset {
                Subset::Validation => 0..cut,
                Subset::Training => cut..n,
            };
            samples.extend(class_files[range].iter().map(|path| ImageSample {
                path: path.clone(),
                label,
            }));
        }
        samples
    }

    /// Per-class image counts for one side of the split
    pub fn subset_distribution(&self, subset: Subset, validation_split: f64) -> Vec<usize> {
        let mut counts = vec![0usize; self.num_classes()];
        for sample in self.subset(subset, validation_split) {
            counts[sample.label] += 1;
        }
        counts
    }
}
