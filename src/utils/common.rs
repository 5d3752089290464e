//! Small filesystem and encoding helpers shared by the stages.

use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use image::DynamicImage;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use super::error::{Result, ResultExt};

/// Create every directory in `paths`, logging each one when `verbose`.
pub fn create_directories<P: AsRef<Path>>(paths: &[P], verbose: bool) -> Result<()> {
    for path in paths {
        let path = path.as_ref();
        fs::create_dir_all(path)?;
        if verbose {
            info!("created directory at: {}", path.display());
        }
    }
    Ok(())
}

/// Write `value` as pretty JSON (4-space indent), creating parent directories.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    fs::write(path, buf)?;
    info!("json file saved at: {}", path.display());
    Ok(())
}

/// Read a JSON document from disk.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)?;
    let value = serde_json::from_str(&text)?;
    info!("json file loaded successfully from: {}", path.display());
    Ok(value)
}

/// Size of a file rounded to kilobytes, formatted as `~ N KB`.
pub fn file_size_kb(path: &Path) -> Result<String> {
    let bytes = fs::metadata(path)?.len();
    Ok(format!("~ {} KB", (bytes as f64 / 1024.0).round() as u64))
}

/// Decode a base64 string (standard alphabet, optional data-URL prefix) to bytes.
pub fn decode_base64(payload: &str) -> Result<Vec<u8>> {
    let trimmed = payload.trim();
    let data = match trimmed.split_once(";base64,") {
        Some((_, rest)) => rest,
        None => trimmed,
    };
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .context("invalid base64 payload")
}

/// Decode a base64 image payload entirely in memory.
pub fn decode_image_base64(payload: &str) -> Result<DynamicImage> {
    let bytes = decode_base64(payload)?;
    image::load_from_memory(&bytes).context("payload is not a decodable image")
}

/// Read an image file and return its bytes base64 encoded.
pub fn encode_image_base64(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Return `path` with `.json` as extension; used for model sidecars.
pub fn sidecar_path(path: &Path) -> PathBuf {
    path.with_extension("json")
}
