//! Logging Module
//!
//! Structured logging built on the `tracing` crate. Records go to stdout and,
//! when a log directory is configured, to a running log file as well.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Instant;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, Registry};

/// Default directory for the running log file
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Default running log file name
pub const DEFAULT_LOG_FILE: &str = "running_logs.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors on stdout
    pub ansi_colors: bool,
    /// Directory for the running log file (`None` = stdout only)
    pub log_dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: true,
            include_thread_ids: false,
            ansi_colors: true,
            log_dir: Some(PathBuf::from(DEFAULT_LOG_DIR)),
        }
    }
}

impl LogConfig {
    /// Create a verbose logging config for debugging
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_thread_ids: true,
            ..Self::default()
        }
    }

    /// Create a quiet logging config (errors only, no file)
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
            log_dir: None,
        }
    }

    /// Create a production logging config
    pub fn production() -> Self {
        Self {
            ansi_colors: false,
            ..Self::default()
        }
    }

    /// Override the directory of the running log file
    pub fn with_log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.log_dir = dir;
        self
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Parse a level name, falling back to `Info`
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Initialize logging with the given configuration
///
/// Installs a global subscriber writing to stdout and, if `log_dir` is set,
/// appending to `<log_dir>/running_logs.log`. Calling it twice is an error
/// reported through the returned message.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let level = LevelFilter::from_level(config.level.to_tracing_level());

    let stdout_layer = fmt::layer()
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .compact()
        .with_writer(std::io::stdout);

    let file_layer = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create log directory {:?}: {}", dir, e))?;
            let appender = tracing_appender::rolling::never(dir, DEFAULT_LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = LOG_GUARD.set(guard);
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(writer),
            )
        }
        None => None,
    };

    let subscriber = Registry::default()
        .with(level)
        .with(stdout_layer)
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Per-epoch training progress logger
pub struct TrainingLogger {
    epoch: usize,
    total_epochs: usize,
    epoch_start: Instant,
    training_start: Instant,
}

impl TrainingLogger {
    /// Create a new training logger
    pub fn new(total_epochs: usize) -> Self {
        Self {
            epoch: 0,
            total_epochs,
            epoch_start: Instant::now(),
            training_start: Instant::now(),
        }
    }

    /// Log start of an epoch
    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();
        tracing::info!("Epoch {}/{} started", epoch + 1, self.total_epochs);
    }

    /// Log end of an epoch with its metrics
    pub fn end_epoch(&self, loss: f64, accuracy: f64, val_loss: f64, val_accuracy: f64, lr: f64) {
        tracing::info!(
            "Epoch {}/{} completed in {:.1}s | loss: {:.4} | acc: {:.2}% | val_loss: {:.4} | val_acc: {:.2}% | lr: {:.6}",
            self.epoch + 1,
            self.total_epochs,
            self.epoch_start.elapsed().as_secs_f64(),
            loss,
            accuracy * 100.0,
            val_loss,
            val_accuracy * 100.0,
            lr
        );
    }

    /// Log a learning-rate reduction
    pub fn log_lr_reduced(&self, old_lr: f64, new_lr: f64) {
        tracing::info!(
            "Validation loss plateaued, reducing learning rate {:.6} -> {:.6}",
            old_lr,
            new_lr
        );
    }

    /// Log early stopping
    pub fn log_early_stop(&self, best_epoch: usize, patience: usize) {
        tracing::warn!(
            "Early stopping after {} epochs without improvement, restoring weights from epoch {}",
            patience,
            best_epoch + 1
        );
    }

    /// Log training completion
    pub fn log_complete(&self, epochs_run: usize, best_val_loss: f64) {
        tracing::info!(
            "Training complete: {} epochs in {} | best val_loss: {:.4}",
            epochs_run,
            super::format_duration(self.training_start.elapsed().as_secs_f64()),
            best_val_loss
        );
    }
}
