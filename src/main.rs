//! Kidney CT classification CLI
//!
//! Runs the training pipeline (all stages or one at a time), classifies a
//! single image with the trained model, and prints configuration and
//! dataset information.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use kidney_ct::backend::{backend_name, default_device, DefaultBackend};
use kidney_ct::config::{ConfigurationManager, CONFIG_FILE_PATH, PARAMS_FILE_PATH};
use kidney_ct::dataset::{ImageFolder, Subset};
use kidney_ct::inference::Predictor;
use kidney_ct::model::artifact::record_path;
use kidney_ct::pipeline::{run_pipeline, run_stage, Stage};
use kidney_ct::utils::logging::{init_logging, LogConfig};

/// Kidney CT classification (Cyst / Normal / Stone / Tumor)
#[derive(Parser, Debug)]
#[command(name = "kidney_ct")]
#[command(version)]
#[command(about = "Kidney CT classification pipeline built on Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Paths and URLs document
    #[arg(long, global = true, env = "KIDNEY_CT_CONFIG", default_value = CONFIG_FILE_PATH)]
    config: PathBuf,

    /// Hyperparameter document
    #[arg(long, global = true, env = "KIDNEY_CT_PARAMS", default_value = PARAMS_FILE_PATH)]
    params: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every stage: ingestion, preparation, training, evaluation
    Run {
        /// Skip ingestion when the dataset is already extracted
        #[arg(long, default_value = "false")]
        resume: bool,
    },

    /// Run a single stage
    Stage {
        #[arg(value_enum)]
        stage: Stage,

        /// Skip ingestion when the dataset is already extracted
        #[arg(long, default_value = "false")]
        resume: bool,
    },

    /// Classify one image with the trained model
    Predict {
        /// Path to the image
        #[arg(short, long)]
        image: PathBuf,

        /// Trained model (defaults to training.trained_model_path)
        #[arg(short, long)]
        model: Option<PathBuf>,
    },

    /// Show configuration, backend and dataset information
    Info,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    init_logging(&log_config).map_err(anyhow::Error::msg)?;

    print_banner();

    let manager = ConfigurationManager::new(&cli.config, &cli.params).with_context(|| {
        format!(
            "loading {} and {}",
            cli.config.display(),
            cli.params.display()
        )
    })?;

    match cli.command {
        Commands::Run { resume } => {
            run_pipeline(&manager, resume)?;
            println!("{}", "Pipeline finished".green().bold());
        }
        Commands::Stage { stage, resume } => {
            run_stage(stage, &manager, resume)?;
        }
        Commands::Predict { image, model } => {
            let model =
                model.unwrap_or_else(|| manager.paths().training.trained_model_path.clone());
            cmd_predict(&image, &model)?;
        }
        Commands::Info => cmd_info(&manager)?,
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 +--------------------------------------------------+
 |   Kidney CT Classification                       |
 |   Cyst / Normal / Stone / Tumor with Burn + Rust |
 +--------------------------------------------------+
  "#
        .cyan()
    );
}

fn cmd_predict(image: &Path, model: &Path) -> Result<()> {
    info!("Classifying {} with {}", image.display(), model.display());
    let device = default_device();
    let predictor = Predictor::<DefaultBackend>::load(model, &device)?;
    let result = predictor.predict_path(image)?;

    println!("{}", "Prediction:".cyan().bold());
    print!("{}", result.display(predictor.labels()));
    println!("{}", serde_json::to_string(&result.to_response())?);
    Ok(())
}

fn cmd_info(manager: &ConfigurationManager) -> Result<()> {
    let params = manager.params();

    println!("{}", "Configuration:".cyan().bold());
    println!("  Backend:          {}", backend_name());
    println!("  Artifacts root:   {}", manager.paths().artifacts_root.display());
    println!(
        "  Image size:       {}x{}x{}",
        params.image_size[0], params.image_size[1], params.image_size[2]
    );
    println!("  Weights:          {}", params.weights);
    println!("  Epochs:           {}", params.epochs);
    println!("  Batch size:       {}", params.batch_size);
    println!("  Learning rate:    {}", params.learning_rate);
    println!("  Validation split: {}", params.validation_split);
    println!();

    let data_dir = manager.training_data_dir();
    println!("{}", "Dataset:".cyan().bold());
    match ImageFolder::open(&data_dir) {
        Ok(folder) => {
            let train = folder.subset_distribution(Subset::Training, params.validation_split);
            let validation =
                folder.subset_distribution(Subset::Validation, params.validation_split);
            println!("  {:<8} {:>8} {:>10}", "class", "train", "validation");
            for (i, name) in folder.class_names().iter().enumerate() {
                println!("  {:<8} {:>8} {:>10}", name, train[i], validation[i]);
            }
        }
        Err(_) => println!(
            "  {} not found; run `kidney_ct stage ingest`",
            data_dir.display()
        ),
    }
    println!();

    let trained = &manager.paths().training.trained_model_path;
    println!("{}", "Trained model:".cyan().bold());
    if record_path(trained).exists() {
        println!("  {}", record_path(trained).display());
    } else {
        println!("  none yet; run `kidney_ct run`");
    }
    Ok(())
}
