//! Local run store
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/<experiment>/<run_id>/
//!     meta.json
//!     params/<key>            one value per file
//!     metrics/<key>           "<timestamp> <value> <step>" lines
//!     artifacts/<path>/...    copied model files
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{now_millis, ExperimentTracker, RunStatus};
use crate::utils::common::{load_json, save_json};
use crate::utils::error::{KidneyError, Result};

/// Contents of `meta.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: String,
    pub experiment: String,
    pub status: RunStatus,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub artifact_uri: String,
}

#[derive(Debug)]
struct ActiveRun {
    dir: PathBuf,
    meta: RunMeta,
}

/// Tracker writing runs to a local directory
#[derive(Debug)]
pub struct FileStoreTracker {
    root: PathBuf,
    run: Option<ActiveRun>,
}

impl FileStoreTracker {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            run: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of the active run
    pub fn run_dir(&self) -> Option<&Path> {
        self.run.as_ref().map(|r| r.dir.as_path())
    }

    fn active(&mut self) -> Result<&mut ActiveRun> {
        self.run
            .as_mut()
            .ok_or_else(|| KidneyError::Tracking("no active run".into()))
    }
}

/// Keys become file names; keep them to one path component that is
/// neither empty nor `.`/`..`.
fn sanitize_key(key: &str) -> String {
    let name: String = key
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect();
    if name.chars().all(|c| c == '.') {
        "_".repeat(name.len().max(1))
    } else {
        name
    }
}

fn tracking_err(context: &str, err: impl std::fmt::Display) -> KidneyError {
    KidneyError::Tracking(format!("{}: {}", context, err))
}

impl ExperimentTracker for FileStoreTracker {
    fn backend(&self) -> &'static str {
        "file"
    }

    fn registers_models(&self) -> bool {
        false
    }

    fn start_run(&mut self, experiment: &str) -> Result<String> {
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let dir = self.root.join(sanitize_key(experiment)).join(&run_id);
        for sub in ["params", "metrics", "artifacts"] {
            fs::create_dir_all(dir.join(sub)).map_err(|e| tracking_err("creating run", e))?;
        }

        let meta = RunMeta {
            run_id: run_id.clone(),
            experiment: experiment.to_string(),
            status: RunStatus::Running,
            start_time: now_millis(),
            end_time: None,
            artifact_uri: dir.join("artifacts").to_string_lossy().to_string(),
        };
        save_json(&dir.join("meta.json"), &meta)
            .map_err(|e| tracking_err("writing run metadata", e))?;
        info!("Started run {} in {}", run_id, dir.display());
        self.run = Some(ActiveRun { dir, meta });
        Ok(run_id)
    }

    fn log_params(&mut self, params: &[(String, String)]) -> Result<()> {
        let run = self.active()?;
        for (key, value) in params {
            fs::write(run.dir.join("params").join(sanitize_key(key)), value)
                .map_err(|e| tracking_err("logging param", e))?;
        }
        Ok(())
    }

    fn log_metrics(&mut self, metrics: &[(String, f64)]) -> Result<()> {
        let run = self.active()?;
        let timestamp = now_millis();
        for (key, value) in metrics {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(run.dir.join("metrics").join(sanitize_key(key)))
                .map_err(|e| tracking_err("logging metric", e))?;
            writeln!(file, "{} {} 0", timestamp, value)
                .map_err(|e| tracking_err("logging metric", e))?;
        }
        Ok(())
    }

    fn log_model(
        &mut self,
        files: &[PathBuf],
        artifact_path: &str,
        registered_name: Option<&str>,
    ) -> Result<()> {
        if let Some(name) = registered_name {
            warn!(
                "File store has no model registry; '{}' is logged but not registered",
                name
            );
        }
        let run = self.active()?;
        let dest = run.dir.join("artifacts").join(sanitize_key(artifact_path));
        fs::create_dir_all(&dest).map_err(|e| tracking_err("logging model", e))?;
        for file in files {
            let name = file.file_name().ok_or_else(|| {
                KidneyError::Tracking(format!("not a file: {}", file.display()))
            })?;
            fs::copy(file, dest.join(name))
                .map_err(|e| tracking_err(&format!("copying {}", file.display()), e))?;
        }
        Ok(())
    }

    fn end_run(&mut self, status: RunStatus) -> Result<()> {
        let run = self
            .run
            .take()
            .ok_or_else(|| KidneyError::Tracking("no active run".into()))?;
        let mut meta = run.meta;
        meta.status = status;
        meta.end_time = Some(now_millis());
        save_json(&run.dir.join("meta.json"), &meta)
            .map_err(|e| tracking_err("closing run", e))
    }
}

/// Read back the metadata of a run directory
pub fn read_run_meta(run_dir: &Path) -> Result<RunMeta> {
    load_json(&run_dir.join("meta.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_run_lifecycle() {
        let dir = tempdir().unwrap();
        let model = dir.path().join("model.mpk");
        fs::write(&model, b"weights").unwrap();

        let mut tracker = FileStoreTracker::new(dir.path().join("mlruns"));
        let run_id = tracker.start_run("kidney").unwrap();
        let run_dir = tracker.run_dir().unwrap().to_path_buf();
        assert!(run_dir.ends_with(&run_id));

        tracker
            .log_params(&[("batch_size".into(), "16".into()), ("weights".into(), "imagenet".into())])
            .unwrap();
        tracker
            .log_metrics(&[("loss".into(), 0.25), ("accuracy".into(), 0.9)])
            .unwrap();
        tracker.log_model(&[model], "model", Some("VGG19Model")).unwrap();
        tracker.end_run(RunStatus::Finished).unwrap();

        assert_eq!(
            fs::read_to_string(run_dir.join("params/batch_size")).unwrap(),
            "16"
        );
        let loss = fs::read_to_string(run_dir.join("metrics/loss")).unwrap();
        assert!(loss.trim_end().ends_with("0.25 0"));
        assert!(run_dir.join("artifacts/model/model.mpk").exists());

        let meta = read_run_meta(&run_dir).unwrap();
        assert_eq!(meta.status, RunStatus::Finished);
        assert!(meta.end_time.is_some());
    }

    #[test]
    fn test_keys_stay_inside_the_run() {
        assert_eq!(sanitize_key("../escape"), ".._escape");
        assert_eq!(sanitize_key(".."), "__");
        assert_eq!(sanitize_key("."), "_");
        assert_eq!(sanitize_key(""), "_");
        assert_eq!(sanitize_key("val/loss"), "val_loss");

        let dir = tempdir().unwrap();
        let mut tracker = FileStoreTracker::new(dir.path().join("mlruns"));
        tracker.start_run("kidney").unwrap();
        let run_dir = tracker.run_dir().unwrap().to_path_buf();
        tracker.log_params(&[("..".into(), "x".into())]).unwrap();
        assert!(run_dir.join("params/__").exists());
    }

    #[test]
    fn test_unwritable_root_is_tracking_error() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("mlruns");
        fs::write(&blocker, b"not a directory").unwrap();
        let mut tracker = FileStoreTracker::new(&blocker);
        assert!(matches!(
            tracker.start_run("kidney"),
            Err(KidneyError::Tracking(_))
        ));
    }

    #[test]
    fn test_logging_without_run_fails() {
        let dir = tempdir().unwrap();
        let mut tracker = FileStoreTracker::new(dir.path());
        assert!(matches!(
            tracker.log_metrics(&[("loss".into(), 1.0)]),
            Err(KidneyError::Tracking(_))
        ));
        assert!(tracker.end_run(RunStatus::Failed).is_err());
    }
}
