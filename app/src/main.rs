// ==============================================================================
// main.rs - Annotation Loader Entry Point
// ==============================================================================
// Description: Command line entry point for the annotation table stages
// Author: Matt Barham
// Created: 2025-10-31
// Modified: 2026-10-17
// Version: 2.0.0
// ==============================================================================

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use annotation_loader::config::{Env, PipelineConfig};
use annotation_loader::output::OutputFormat;
use annotation_loader::processor::{NewSamplesRequest, Pipeline, StageOutcome};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Pipeline configuration (JSON)
    #[arg(short, long, env = "PIPELINE_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the empty annotation table
    InitTable,

    /// Admit a project's samples from a callset and merge unseen variants
    UpdateWithNewSamples {
        #[arg(long)]
        callset: PathBuf,

        #[arg(long)]
        project_guid: String,

        #[arg(long)]
        pedigree: PathBuf,

        #[arg(long)]
        remap: Option<PathBuf>,

        /// Sample pairs that failed the relatedness check
        #[arg(long)]
        relatedness: Option<PathBuf>,

        /// Pre-computed annotations keyed by variant id
        #[arg(long)]
        annotations: Option<PathBuf>,
    },

    /// Re-join stale reference datasets
    UpdateReferenceDatasets,

    /// Print sex calls for every sample of a callset as JSON
    CallSex {
        #[arg(long)]
        callset: PathBuf,
    },

    /// Export the annotation table
    Export {
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Parquet)]
        format: OutputFormat,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "annotation_loader=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = PipelineConfig::from_path(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    let pipeline = Pipeline::new(config, Env::from_env())?;

    let outcome = match args.command {
        Command::InitTable => pipeline.init_table()?,
        Command::UpdateWithNewSamples {
            callset,
            project_guid,
            pedigree,
            remap,
            relatedness,
            annotations,
        } => pipeline.update_with_new_samples(&NewSamplesRequest {
            callset_path: callset,
            project_guid,
            pedigree_path: pedigree,
            remap_path: remap,
            relatedness_path: relatedness,
            annotations_path: annotations,
        })?,
        Command::UpdateReferenceDatasets => pipeline.update_reference_datasets()?,
        Command::CallSex { callset } => {
            let calls = pipeline.call_sex(&callset)?;
            println!("{}", serde_json::to_string_pretty(&calls)?);
            return Ok(());
        }
        Command::Export { output_dir, format } => {
            let path = pipeline.export(&output_dir, format)?;
            info!("Exported to {}", path.display());
            return Ok(());
        }
    };

    match outcome {
        StageOutcome::Incomplete(reason) => {
            warn!("Stage incomplete, nothing written: {}", reason);
        }
        other => info!("Stage finished: {:?}", other),
    }
    Ok(())
}
