//! Kidney CT Server
//!
//! HTTP front end for the kidney CT classifier: classifies base64 images
//! with the trained model and triggers retraining of the full pipeline.

mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use kidney_ct::config::{ConfigurationManager, CONFIG_FILE_PATH, PARAMS_FILE_PATH};
use kidney_ct::utils::logging::{init_logging, LogConfig};
use tracing::{info, warn};

use crate::state::{AppState, ServerConfig};

/// Kidney CT Server
#[derive(Parser, Debug)]
#[command(name = "kidney-ct-server")]
#[command(version)]
#[command(about = "HTTP inference and training trigger for the kidney CT classifier")]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Paths and URLs document
    #[arg(long, env = "KIDNEY_CT_CONFIG", default_value = CONFIG_FILE_PATH)]
    config: PathBuf,

    /// Hyperparameter document
    #[arg(long, env = "KIDNEY_CT_PARAMS", default_value = PARAMS_FILE_PATH)]
    params: PathBuf,

    /// Path to the kidney_ct pipeline binary
    #[arg(long, env = "KIDNEY_CT_BINARY")]
    binary: Option<PathBuf>,
}

/// `kidney_ct` next to this executable
fn default_binary() -> PathBuf {
    std::env::current_exe()
        .map(|exe| exe.with_file_name("kidney_ct"))
        .unwrap_or_else(|_| PathBuf::from("kidney_ct"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&LogConfig::production()).map_err(anyhow::Error::msg)?;

    let manager = ConfigurationManager::new(&cli.config, &cli.params)?;
    let config = ServerConfig {
        binary_path: cli.binary.unwrap_or_else(default_binary),
        config_path: cli.config,
        params_path: cli.params,
        model_path: manager.paths().training.trained_model_path.clone(),
    };

    info!("Kidney CT Server v{}", env!("CARGO_PKG_VERSION"));
    info!("  Binary path: {}", config.binary_path.display());
    info!("  Model path:  {}", config.model_path.display());

    if !config.binary_path.exists() {
        warn!(
            "Binary not found at {}. /train will fail until it is built",
            config.binary_path.display()
        );
    }

    let state = Arc::new(AppState::new(config));
    if let Err(e) = state.reload_model().await {
        warn!("No model loaded ({}); /predict answers 503 until /train succeeds", e);
    }

    let app = routes::router(state);

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
