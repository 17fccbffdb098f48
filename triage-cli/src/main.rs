//! Triage CLI - command-line interface for risk scoring and training

#![deny(warnings)]

// Global invariants enforced:
// - Scoring always prints a complete prediction, degraded or not
// - Identical input and artifact state yield identical output

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use triage_core::config::{self, load_config_file};
use triage_core::{Prediction, RiskEngine, TrainingOptions};

#[derive(Parser)]
#[command(name = "triage")]
#[command(about = "Clinical risk probability and seriousness scoring")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a patient snapshot
    Score {
        /// Path to a patient snapshot JSON file
        patient: PathBuf,

        /// Artifact directory (overrides config)
        #[arg(long)]
        artifact_dir: Option<PathBuf>,

        /// Config file to use instead of discovery
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },
    /// Train a classifier from a readmission CSV extract
    Train {
        /// Path to the training CSV
        csv: PathBuf,

        /// Directory to write the artifact into
        #[arg(long, default_value = "artifacts")]
        output_dir: PathBuf,

        /// Minimum row count accepted
        #[arg(long, default_value_t = 25)]
        min_rows: usize,

        /// Minimum positive-label count accepted
        #[arg(long, default_value_t = 5)]
        min_positives: usize,

        /// Subsample the extract down to this many rows
        #[arg(long)]
        max_rows: Option<usize>,

        /// Seed for subsampling and diagnostics splits
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Inspect or validate configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Validate the discovered (or given) config file
    Validate {
        /// Config file to validate instead of discovery
        path: Option<PathBuf>,
    },
    /// Show the resolved configuration
    Show,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Score {
            patient,
            artifact_dir,
            config,
            format,
        } => {
            let resolved = resolve_config(artifact_dir, config)?;
            let snapshot = load_patient(&patient)?;
            let engine = RiskEngine::new(resolved.store);
            let prediction = match resolved.reference_date {
                Some(reference) => engine.predict_at(&snapshot, reference),
                None => engine.predict(&snapshot),
            };
            match format {
                OutputFormat::Text => print!("{}", render_text(&prediction)),
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&prediction)?)
                }
            }
        }
        Commands::Train {
            csv,
            output_dir,
            min_rows,
            min_positives,
            max_rows,
            seed,
        } => {
            let mut options = TrainingOptions::new(csv, output_dir);
            options.min_rows = min_rows;
            options.min_positives = min_positives;
            if max_rows.is_some() {
                options.max_rows = max_rows;
            }
            options.seed = seed;

            let spinner = training_spinner();
            let result = triage_core::train_and_save(&options);
            spinner.finish_and_clear();
            let result = result?;

            println!("Trained {}", result.model_version);
            println!("  rows:      {}", result.rows);
            println!("  positives: {}", result.positives);
            println!("  artifact:  {}", result.artifact_path.display());
            for (name, value) in &result.metrics {
                println!("  {name}: {value:.4}");
            }
        }
        Commands::Config { command } => match command {
            ConfigCommands::Validate { path } => {
                let path = match path {
                    Some(path) => Some(path),
                    None => config::discover_config(&std::env::current_dir()?),
                };
                match path {
                    Some(path) => {
                        load_config_file(&path)?;
                        println!("OK {}", path.display());
                    }
                    None => println!("No config file found; defaults apply"),
                }
            }
            ConfigCommands::Show => {
                let resolved = config::load_and_resolve(&std::env::current_dir()?)?;
                match &resolved.config_path {
                    Some(path) => println!("config:            {}", path.display()),
                    None => println!("config:            (defaults)"),
                }
                println!(
                    "artifact_dir:      {}",
                    resolved.store.artifact_dir.display()
                );
                println!(
                    "preferred_version: {}",
                    resolved.store.preferred_version.as_deref().unwrap_or("-")
                );
                match resolved.reference_date {
                    Some(date) => println!("reference_date:    {date}"),
                    None => println!("reference_date:    (today)"),
                }
            }
        },
    }

    Ok(())
}

/// An explicit --artifact-dir wins; otherwise config discovery applies.
fn resolve_config(
    artifact_dir: Option<PathBuf>,
    config_path: Option<PathBuf>,
) -> anyhow::Result<triage_core::ResolvedConfig> {
    let mut resolved = match config_path {
        Some(path) => load_config_file(&path)?.resolve(Some(path)),
        None => config::load_and_resolve(&std::env::current_dir()?)?,
    };
    if let Some(dir) = artifact_dir {
        resolved.store.artifact_dir = dir;
    }
    Ok(resolved)
}

fn load_patient(path: &Path) -> anyhow::Result<triage_core::PatientSnapshot> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read patient file: {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse patient file: {}", path.display()))
}

fn training_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_message("training");
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        spinner.set_style(style);
    }
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn render_text(prediction: &Prediction) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Risk:            {:.4} ({})\n",
        prediction.risk_probability, prediction.risk_band
    ));
    out.push_str(&format!(
        "Seriousness:     {:.2} ({})\n",
        prediction.seriousness_factor, prediction.seriousness_level
    ));
    out.push_str(&format!(
        "Model:           {} [{}]\n",
        prediction.model_version,
        prediction.scoring_mode.as_str()
    ));
    out.push_str(&format!(
        "Recommendation:  {}\n",
        prediction.assessment_recommendation
    ));
    if !prediction.top_factors.is_empty() {
        out.push_str("Top factors:\n");
        for factor in &prediction.top_factors {
            out.push_str(&format!(
                "  {:<28} {:>8.4} ({})\n",
                factor.feature,
                factor.contribution,
                factor.direction.as_str()
            ));
        }
    }
    out
}
