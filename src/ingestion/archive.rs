//! Zip extraction with entry and size limits.

use std::fs::File;
use std::path::Path;

use tracing::{debug, warn};

use crate::utils::error::{KidneyError, Result};

const MAX_ZIP_ENTRIES: usize = 200_000;
const MAX_ZIP_ENTRY_UNCOMPRESSED_BYTES: u64 = 512 * 1024 * 1024;
const MAX_ZIP_TOTAL_UNCOMPRESSED_BYTES: u64 = 8 * 1024 * 1024 * 1024;
const MAX_ZIP_COMPRESSION_RATIO: u64 = 200;

/// Bounds applied while extracting an archive
#[derive(Debug, Clone, Copy)]
pub struct ZipExtractionLimits {
    pub max_entries: usize,
    pub max_entry_uncompressed_bytes: u64,
    pub max_total_uncompressed_bytes: u64,
    pub max_compression_ratio: u64,
}

impl Default for ZipExtractionLimits {
    fn default() -> Self {
        Self {
            max_entries: MAX_ZIP_ENTRIES,
            max_entry_uncompressed_bytes: MAX_ZIP_ENTRY_UNCOMPRESSED_BYTES,
            max_total_uncompressed_bytes: MAX_ZIP_TOTAL_UNCOMPRESSED_BYTES,
            max_compression_ratio: MAX_ZIP_COMPRESSION_RATIO,
        }
    }
}

/// Summary of an extraction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionStats {
    pub files: usize,
    pub skipped: usize,
    pub bytes: u64,
}

/// Extract `zip_path` into `dest_dir`.
///
/// Entries whose names escape `dest_dir` are skipped. Parse failures map to
/// `CorruptArchive`; limit violations too, since the archive cannot be used.
pub fn unzip_to_dir(
    zip_path: &Path,
    dest_dir: &Path,
    limits: ZipExtractionLimits,
) -> Result<ExtractionStats> {
    let corrupt = |msg: String| KidneyError::CorruptArchive(zip_path.to_path_buf(), msg);

    let file = File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| corrupt(e.to_string()))?;

    let entry_count = archive.len();
    if entry_count > limits.max_entries {
        return Err(corrupt(format!(
            "{entry_count} entries, limit is {}",
            limits.max_entries
        )));
    }

    std::fs::create_dir_all(dest_dir)?;
    let mut stats = ExtractionStats::default();
    for i in 0..entry_count {
        let mut entry = archive.by_index(i).map_err(|e| corrupt(e.to_string()))?;

        let uncompressed_size = entry.size();
        if uncompressed_size > limits.max_entry_uncompressed_bytes {
            return Err(corrupt(format!(
                "entry '{}' is too large ({} bytes)",
                entry.name(),
                uncompressed_size
            )));
        }
        if uncompressed_size > 0 {
            let max_uncompressed = entry
                .compressed_size()
                .saturating_mul(limits.max_compression_ratio);
            if uncompressed_size > max_uncompressed {
                return Err(corrupt(format!(
                    "entry '{}' exceeds compression ratio limit",
                    entry.name()
                )));
            }
        }
        stats.bytes = stats
            .bytes
            .checked_add(uncompressed_size)
            .ok_or_else(|| corrupt("archive size overflow".into()))?;
        if stats.bytes > limits.max_total_uncompressed_bytes {
            return Err(corrupt(format!(
                "extracted size {} exceeds limit {}",
                stats.bytes, limits.max_total_uncompressed_bytes
            )));
        }

        let outpath = match entry.enclosed_name() {
            Some(path) => dest_dir.join(path),
            None => {
                warn!("Skipping unsafe archive entry '{}'", entry.name());
                stats.skipped += 1;
                continue;
            }
        };
        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&outpath)?;
        std::io::copy(&mut entry, &mut outfile).map_err(|e| corrupt(e.to_string()))?;
        stats.files += 1;
    }

    debug!(
        "Extracted {} files ({} bytes) from {}",
        stats.files,
        stats.bytes,
        zip_path.display()
    );
    Ok(stats)
}
