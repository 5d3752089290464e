//! Data ingestion stage
//!
//! Fetches the zipped kidney CT dataset and expands it into `unzip_dir`.
//! Failures are logged and propagated; nothing is retried.

pub mod archive;
pub mod http_client;

use tracing::{error, info};

pub use archive::{unzip_to_dir, ExtractionStats, ZipExtractionLimits};
pub use http_client::{direct_download_url, download_to_file};

use crate::config::DataIngestionConfig;
use crate::utils::common::{create_directories, file_size_kb};
use crate::utils::error::Result;

/// Download and extraction for one `DataIngestionConfig`
#[derive(Debug, Clone)]
pub struct DataIngestion {
    config: DataIngestionConfig,
    limits: ZipExtractionLimits,
}

impl DataIngestion {
    pub fn new(config: DataIngestionConfig) -> Self {
        Self {
            config,
            limits: ZipExtractionLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: ZipExtractionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn config(&self) -> &DataIngestionConfig {
        &self.config
    }

    /// True when the extracted dataset directory already exists
    pub fn is_extracted(&self) -> bool {
        self.config.dataset_dir.is_dir()
    }

    /// Download `source_url` into `local_data_file`.
    pub fn download_file(&self) -> Result<()> {
        let dest = &self.config.local_data_file;
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_directories(&[parent], false)?;
        }

        let url = direct_download_url(&self.config.source_url)?;
        info!(
            "Downloading data from {} into file {}",
            self.config.source_url,
            dest.display()
        );

        match download_to_file(&url, dest, http_client::MAX_DOWNLOAD_BYTES) {
            Ok(_) => {
                info!(
                    "Downloaded data from {} into file {} ({})",
                    self.config.source_url,
                    dest.display(),
                    file_size_kb(dest)?
                );
                Ok(())
            }
            Err(e) => {
                error!("Error occurred while downloading the file: {}", e);
                Err(e)
            }
        }
    }

    /// Extract `local_data_file` into `unzip_dir`.
    pub fn extract_zip_file(&self) -> Result<ExtractionStats> {
        let unzip_dir = &self.config.unzip_dir;
        create_directories(&[unzip_dir], false)?;
        info!(
            "Extracting {} to {}",
            self.config.local_data_file.display(),
            unzip_dir.display()
        );

        match unzip_to_dir(&self.config.local_data_file, unzip_dir, self.limits) {
            Ok(stats) => {
                info!(
                    "Extraction completed successfully into {} ({} files)",
                    unzip_dir.display(),
                    stats.files
                );
                Ok(stats)
            }
            Err(e) => {
                error!("Extraction failed: {}", e);
                Err(e)
            }
        }
    }

    /// Download then extract, unless resuming over an existing extraction.
    pub fn run(&self, resume: bool) -> Result<()> {
        if (resume || self.config.skip_if_present) && self.is_extracted() {
            info!(
                "Dataset already present at {}, skipping download",
                self.config.dataset_dir.display()
            );
            return Ok(());
        }
        self.download_file()?;
        self.extract_zip_file()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ImageFolder;
    use crate::utils::error::KidneyError;
    use std::path::Path;
    use tempfile::tempdir;

    fn ingestion_config(root: &Path, url: String) -> DataIngestionConfig {
        DataIngestionConfig {
            root_dir: root.to_path_buf(),
            source_url: url,
            local_data_file: root.join("data.zip"),
            unzip_dir: root.to_path_buf(),
            dataset_dir: root.join("kidney"),
            skip_if_present: false,
        }
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]));
        let mut buf = std::io::Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn downloads_and_extracts_class_folders() {
        let staging = tempdir().unwrap();
        let zip_path = staging.path().join("src.zip");
        let png = png_bytes();
        archive::tests::write_zip(
            &zip_path,
            &[
                ("kidney/Cyst/0.png", png.as_slice()),
                ("kidney/Normal/0.png", png.as_slice()),
                ("kidney/Stone/0.png", png.as_slice()),
                ("kidney/Tumor/0.png", png.as_slice()),
            ],
        );
        let body = std::fs::read(&zip_path).unwrap();
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/zip\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        let url = http_client::tests::serve_once(head, body);

        let dir = tempdir().unwrap();
        let ingestion = DataIngestion::new(ingestion_config(dir.path(), url));
        ingestion.run(false).unwrap();
        assert!(ingestion.is_extracted());

        let folder = ImageFolder::open(&ingestion.config().dataset_dir).unwrap();
        assert_eq!(folder.class_names(), ["Cyst", "Normal", "Stone", "Tumor"]);
    }

    #[test]
    fn resume_skips_existing_dataset() {
        let dir = tempdir().unwrap();
        // Unroutable URL: any download attempt would fail
        let config = ingestion_config(dir.path(), "http://127.0.0.1:9/data.zip".into());
        std::fs::create_dir_all(&config.dataset_dir).unwrap();

        let ingestion = DataIngestion::new(config);
        assert!(ingestion.run(true).is_ok());
        assert!(matches!(ingestion.run(false), Err(KidneyError::Download(_))));
    }

    #[test]
    fn extraction_honours_entry_limit() {
        let dir = tempdir().unwrap();
        let config = ingestion_config(dir.path(), String::new());
        let png = png_bytes();
        archive::tests::write_zip(
            &config.local_data_file,
            &[
                ("kidney/Cyst/0.png", png.as_slice()),
                ("kidney/Cyst/1.png", png.as_slice()),
            ],
        );

        let limited = DataIngestion::new(config.clone()).with_limits(ZipExtractionLimits {
            max_entries: 1,
            ..ZipExtractionLimits::default()
        });
        assert!(matches!(
            limited.extract_zip_file(),
            Err(KidneyError::CorruptArchive(_, _))
        ));
        assert_eq!(DataIngestion::new(config).extract_zip_file().unwrap().files, 2);
    }

    #[test]
    fn corrupt_download_is_reported() {
        let body = b"not a zip at all".to_vec();
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/zip\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        let url = http_client::tests::serve_once(head, body);
        let dir = tempdir().unwrap();
        let ingestion = DataIngestion::new(ingestion_config(dir.path(), url));
        assert!(matches!(
            ingestion.run(false),
            Err(KidneyError::CorruptArchive(_, _))
        ));
    }
}
