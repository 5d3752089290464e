//! MLflow REST client
//!
//! Talks to `/api/2.0/mlflow/...` for experiments, runs and the model
//! registry, and to `/api/2.0/mlflow-artifacts/...` for artifact upload
//! (servers started with artifact proxying, the MLflow 2 default).
//! Credentials come from `MLFLOW_TRACKING_USERNAME` /
//! `MLFLOW_TRACKING_PASSWORD` (basic) or `MLFLOW_TRACKING_TOKEN` (bearer).

use std::fs::File;
use std::path::PathBuf;

use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{now_millis, ExperimentTracker, RunStatus};
use crate::ingestion::http_client;
use crate::utils::error::{KidneyError, Result};

const API: &str = "api/2.0/mlflow";
const ARTIFACTS_API: &str = "api/2.0/mlflow-artifacts/artifacts";
const ARTIFACT_SCHEME: &str = "mlflow-artifacts:/";

#[derive(Debug, Deserialize)]
struct Experiment {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct GetExperimentResponse {
    experiment: Experiment,
}

#[derive(Debug, Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Debug, Deserialize)]
struct RunInfo {
    run_id: String,
    artifact_uri: String,
}

#[derive(Debug, Deserialize)]
struct Run {
    info: RunInfo,
}

#[derive(Debug, Deserialize)]
struct CreateRunResponse {
    run: Run,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct Metric<'a> {
    key: &'a str,
    value: f64,
    timestamp: i64,
    step: i64,
}

#[derive(Debug, Serialize)]
struct Param<'a> {
    key: &'a str,
    value: &'a str,
}

#[derive(Debug, Clone)]
struct ActiveRun {
    run_id: String,
    artifact_uri: String,
}

/// Tracker for an MLflow tracking server
#[derive(Debug)]
pub struct MlflowRestTracker {
    base_url: String,
    auth: Option<String>,
    run: Option<ActiveRun>,
}

/// Request failure: HTTP status with the decoded MLflow error, or transport
enum CallError {
    Api { status: u16, error: ApiError },
    Transport(String),
}

impl CallError {
    fn into_tracking(self, what: &str) -> KidneyError {
        match self {
            CallError::Api { status, error } => KidneyError::Tracking(format!(
                "{} failed with {} {}: {}",
                what, status, error.error_code, error.message
            )),
            CallError::Transport(msg) => KidneyError::Tracking(format!("{} failed: {}", what, msg)),
        }
    }
}

fn auth_from_env() -> Option<String> {
    if let Ok(token) = std::env::var("MLFLOW_TRACKING_TOKEN") {
        if !token.is_empty() {
            return Some(format!("Bearer {}", token));
        }
    }
    let user = std::env::var("MLFLOW_TRACKING_USERNAME").ok()?;
    let password = std::env::var("MLFLOW_TRACKING_PASSWORD").unwrap_or_default();
    let encoded =
        base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, password));
    Some(format!("Basic {}", encoded))
}

impl MlflowRestTracker {
    /// Client for `base_url`, with credentials from the environment.
    pub fn new(base_url: &str) -> Result<Self> {
        url::Url::parse(base_url)
            .map_err(|e| KidneyError::Tracking(format!("invalid tracking URI '{}': {}", base_url, e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth: auth_from_env(),
            run: None,
        })
    }

    /// Override the Authorization header value.
    pub fn with_auth(mut self, auth: Option<String>) -> Self {
        self.auth = auth;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, API, path)
    }

    fn request(&self, method: &str, url: &str) -> ureq::Request {
        let request = http_client::agent().request(method, url);
        match &self.auth {
            Some(auth) => request.set("Authorization", auth),
            None => request,
        }
    }

    fn decode<T: DeserializeOwned>(
        result: std::result::Result<ureq::Response, ureq::Error>,
    ) -> std::result::Result<T, CallError> {
        match result {
            Ok(response) => response
                .into_json::<T>()
                .map_err(|e| CallError::Transport(format!("invalid response body: {}", e))),
            Err(ureq::Error::Status(status, response)) => {
                let error = response.into_json::<ApiError>().unwrap_or(ApiError {
                    error_code: String::new(),
                    message: String::new(),
                });
                Err(CallError::Api { status, error })
            }
            Err(e) => Err(CallError::Transport(e.to_string())),
        }
    }

    fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> std::result::Result<T, CallError> {
        let url = self.endpoint(path);
        debug!("POST {}", url);
        Self::decode(self.request("POST", &url).send_json(body))
    }

    fn active(&self) -> Result<&ActiveRun> {
        self.run
            .as_ref()
            .ok_or_else(|| KidneyError::Tracking("no active run".into()))
    }

    fn experiment_id(&self, name: &str) -> Result<String> {
        let url = self.endpoint("experiments/get-by-name");
        let lookup = self
            .request("GET", &url)
            .query("experiment_name", name)
            .call();
        match Self::decode::<GetExperimentResponse>(lookup) {
            Ok(found) => Ok(found.experiment.experiment_id),
            Err(CallError::Api { error, .. }) if error.error_code == "RESOURCE_DOES_NOT_EXIST" => {
                let created: CreateExperimentResponse = self
                    .post("experiments/create", json!({ "name": name }))
                    .map_err(|e| e.into_tracking("creating experiment"))?;
                info!("Created experiment '{}' ({})", name, created.experiment_id);
                Ok(created.experiment_id)
            }
            Err(e) => Err(e.into_tracking("looking up experiment")),
        }
    }

    fn upload_artifact(&self, run: &ActiveRun, file: &PathBuf, artifact_path: &str) -> Result<()> {
        let relative = run.artifact_uri.strip_prefix(ARTIFACT_SCHEME).ok_or_else(|| {
            KidneyError::Tracking(format!(
                "artifact store '{}' is not proxied by the tracking server",
                run.artifact_uri
            ))
        })?;
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| KidneyError::Tracking(format!("not a file: {}", file.display())))?;
        let url = format!(
            "{}/{}/{}/{}/{}",
            self.base_url,
            ARTIFACTS_API,
            relative.trim_matches('/'),
            artifact_path.trim_matches('/'),
            name
        );

        let body = File::open(file)
            .map_err(|e| KidneyError::Tracking(format!("opening {}: {}", file.display(), e)))?;
        debug!("PUT {}", url);
        self.request("PUT", &url)
            .set("Content-Type", "application/octet-stream")
            .send(body)
            .map_err(|e| KidneyError::Tracking(format!("uploading {} failed: {}", name, e)))?;
        Ok(())
    }

    fn register(&self, run: &ActiveRun, name: &str, artifact_path: &str) -> Result<()> {
        match self.post::<Value>("registered-models/create", json!({ "name": name })) {
            Ok(_) => info!("Registered model '{}'", name),
            Err(CallError::Api { error, .. }) if error.error_code == "RESOURCE_ALREADY_EXISTS" => {
                debug!("Registered model '{}' already exists", name)
            }
            Err(e) => return Err(e.into_tracking("registering model")),
        }

        let version: Value = self
            .post(
                "model-versions/create",
                json!({
                    "name": name,
                    "source": format!("{}/{}", run.artifact_uri.trim_end_matches('/'), artifact_path),
                    "run_id": run.run_id,
                }),
            )
            .map_err(|e| e.into_tracking("creating model version"))?;
        info!(
            "Created version {} of '{}'",
            version["model_version"]["version"].as_str().unwrap_or("?"),
            name
        );
        Ok(())
    }
}

impl ExperimentTracker for MlflowRestTracker {
    fn backend(&self) -> &'static str {
        "mlflow"
    }

    fn registers_models(&self) -> bool {
        true
    }

    fn start_run(&mut self, experiment: &str) -> Result<String> {
        let experiment_id = self.experiment_id(experiment)?;
        let created: CreateRunResponse = self
            .post(
                "runs/create",
                json!({ "experiment_id": experiment_id, "start_time": now_millis() }),
            )
            .map_err(|e| e.into_tracking("creating run"))?;

        let run = ActiveRun {
            run_id: created.run.info.run_id,
            artifact_uri: created.run.info.artifact_uri,
        };
        info!("Started MLflow run {}", run.run_id);
        let run_id = run.run_id.clone();
        self.run = Some(run);
        Ok(run_id)
    }

    fn log_params(&mut self, params: &[(String, String)]) -> Result<()> {
        let run_id = self.active()?.run_id.clone();
        let params: Vec<Param> = params
            .iter()
            .map(|(key, value)| Param { key, value })
            .collect();
        self.post::<Value>("runs/log-batch", json!({ "run_id": run_id, "params": params }))
            .map_err(|e| e.into_tracking("logging params"))?;
        Ok(())
    }

    fn log_metrics(&mut self, metrics: &[(String, f64)]) -> Result<()> {
        let run_id = self.active()?.run_id.clone();
        let timestamp = now_millis();
        let metrics: Vec<Metric> = metrics
            .iter()
            .map(|(key, value)| Metric {
                key,
                value: *value,
                timestamp,
                step: 0,
            })
            .collect();
        self.post::<Value>("runs/log-batch", json!({ "run_id": run_id, "metrics": metrics }))
            .map_err(|e| e.into_tracking("logging metrics"))?;
        Ok(())
    }

    fn log_model(
        &mut self,
        files: &[PathBuf],
        artifact_path: &str,
        registered_name: Option<&str>,
    ) -> Result<()> {
        let run = self.active()?.clone();
        for file in files {
            self.upload_artifact(&run, file, artifact_path)?;
        }
        if let Some(name) = registered_name {
            self.register(&run, name, artifact_path)?;
        }
        Ok(())
    }

    fn end_run(&mut self, status: RunStatus) -> Result<()> {
        let run = self
            .run
            .take()
            .ok_or_else(|| KidneyError::Tracking("no active run".into()))?;
        self.post::<Value>(
            "runs/update",
            json!({
                "run_id": run.run_id,
                "status": status.as_str(),
                "end_time": now_millis(),
            }),
        )
        .map_err(|e| e.into_tracking("closing run"))?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use tempfile::tempdir;

    /// Minimal MLflow stand-in: answers every request with canned JSON and
    /// records "METHOD path" lines.
    pub(crate) fn fake_mlflow(experiment_exists: bool) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                handle(stream, experiment_exists, &log);
            }
        });
        (format!("http://{}", addr), seen)
    }

    fn handle(stream: TcpStream, experiment_exists: bool, log: &Arc<Mutex<Vec<String>>>) {
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).is_err() {
            return;
        }
        let mut content_length = 0usize;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
        }
        let mut body = vec![0u8; content_length];
        let _ = reader.read_exact(&mut body);

        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or("").to_string();
        let target = parts.next().unwrap_or("").to_string();
        let path = target.split('?').next().unwrap_or("").to_string();
        log.lock().unwrap().push(format!("{} {}", method, path));

        let (status, payload) = match path.as_str() {
            "/api/2.0/mlflow/experiments/get-by-name" if experiment_exists => {
                ("200 OK", r#"{"experiment":{"experiment_id":"7"}}"#.to_string())
            }
            "/api/2.0/mlflow/experiments/get-by-name" => (
                "404 Not Found",
                r#"{"error_code":"RESOURCE_DOES_NOT_EXIST","message":"missing"}"#.to_string(),
            ),
            "/api/2.0/mlflow/experiments/create" => {
                ("200 OK", r#"{"experiment_id":"7"}"#.to_string())
            }
            "/api/2.0/mlflow/runs/create" => (
                "200 OK",
                r#"{"run":{"info":{"run_id":"abc","artifact_uri":"mlflow-artifacts:/7/abc/artifacts"}}}"#
                    .to_string(),
            ),
            "/api/2.0/mlflow/registered-models/create" => (
                "400 Bad Request",
                r#"{"error_code":"RESOURCE_ALREADY_EXISTS","message":"exists"}"#.to_string(),
            ),
            "/api/2.0/mlflow/model-versions/create" => (
                "200 OK",
                r#"{"model_version":{"version":"3"}}"#.to_string(),
            ),
            _ => ("200 OK", "{}".to_string()),
        };
        let mut stream = stream;
        let _ = write!(
            stream,
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            payload.len(),
            payload
        );
    }

    #[test]
    fn test_full_run_against_fake_server() {
        let (url, seen) = fake_mlflow(false);
        let dir = tempdir().unwrap();
        let model = dir.path().join("model.mpk");
        std::fs::write(&model, b"weights").unwrap();

        let mut tracker = MlflowRestTracker::new(&url).unwrap().with_auth(None);
        assert_eq!(tracker.start_run("kidney").unwrap(), "abc");
        tracker.log_params(&[("epochs".into(), "1".into())]).unwrap();
        tracker.log_metrics(&[("loss".into(), 0.5)]).unwrap();
        tracker.log_model(&[model], "model", Some("VGG19Model")).unwrap();
        tracker.end_run(RunStatus::Finished).unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                "GET /api/2.0/mlflow/experiments/get-by-name",
                "POST /api/2.0/mlflow/experiments/create",
                "POST /api/2.0/mlflow/runs/create",
                "POST /api/2.0/mlflow/runs/log-batch",
                "POST /api/2.0/mlflow/runs/log-batch",
                "PUT /api/2.0/mlflow-artifacts/artifacts/7/abc/artifacts/model/model.mpk",
                "POST /api/2.0/mlflow/registered-models/create",
                "POST /api/2.0/mlflow/model-versions/create",
                "POST /api/2.0/mlflow/runs/update",
            ]
        );
    }

    #[test]
    fn test_existing_experiment_is_reused() {
        let (url, seen) = fake_mlflow(true);
        let mut tracker = MlflowRestTracker::new(&url).unwrap().with_auth(None);
        tracker.start_run("kidney").unwrap();
        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert!(seen[1].ends_with("runs/create"));
    }

    #[test]
    fn test_unreachable_server_is_tracking_error() {
        let mut tracker = MlflowRestTracker::new("http://127.0.0.1:9").unwrap().with_auth(None);
        assert!(matches!(
            tracker.start_run("kidney"),
            Err(KidneyError::Tracking(_))
        ));
    }

    #[test]
    fn test_missing_artifact_is_tracking_error() {
        let (url, seen) = fake_mlflow(true);
        let dir = tempdir().unwrap();
        let mut tracker = MlflowRestTracker::new(&url).unwrap().with_auth(None);
        tracker.start_run("kidney").unwrap();

        let missing = dir.path().join("model.mpk");
        assert!(matches!(
            tracker.log_model(&[missing], "model", None),
            Err(KidneyError::Tracking(_))
        ));
        assert!(!seen.lock().unwrap().iter().any(|line| line.starts_with("PUT")));
    }
}
