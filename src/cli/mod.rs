//! Trial features CLI module
//!
//! Command-line interface for fitting the feature pipeline, transforming
//! single records and inspecting fitted artifacts.

use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::enrichment::ReferenceTables;
use crate::inference::FeatureService;
use crate::preprocessing::{Context, FeaturePipeline, FittedPipeline, PipelineConfig};
use crate::record::{frame_from_records, FeatureMatrix, Schema};
use crate::utils::{save_csv, DataLoader};

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn step_run(msg: &str) {
    eprint!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    eprintln!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    eprintln!();
    eprintln!("  {}", title.white().bold());
    eprintln!("  {}", dim(&"─".repeat(56)));
}

#[derive(Parser)]
#[command(name = "trial-features")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Feature pipeline for clinical-trial enrollment duration")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Reference table locations shared by `fit` and `transform`
#[derive(clap::Args, Debug, Clone)]
pub struct ReferenceArgs {
    /// Country metrics CSV keyed by `countryName`
    #[arg(long)]
    pub countries: PathBuf,

    /// Regional age CSV keyed by `Area`
    #[arg(long)]
    pub regional: Option<PathBuf>,

    /// Facility rank CSV with `Name` and `World Rank`
    #[arg(long)]
    pub facilities: Option<PathBuf>,
}

impl ReferenceArgs {
    fn load(&self, loader: &DataLoader) -> anyhow::Result<ReferenceTables> {
        Ok(loader.load_reference_tables(
            &self.countries,
            self.regional.as_deref(),
            self.facilities.as_deref(),
        )?)
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fit the pipeline on a batch of trial records
    Fit {
        /// Records file (JSON array or JSON lines)
        #[arg(short, long)]
        records: PathBuf,

        #[command(flatten)]
        references: ReferenceArgs,

        /// Pipeline configuration (JSON); defaults when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Fitted pipeline artifact to write
        #[arg(short, long)]
        output: PathBuf,

        /// Also write the training feature matrix as CSV
        #[arg(short, long)]
        matrix: Option<PathBuf>,
    },

    /// Transform one record with a fitted pipeline
    Transform {
        /// Fitted pipeline artifact
        #[arg(short, long)]
        artifact: PathBuf,

        /// Record file (single JSON object)
        #[arg(short, long)]
        record: PathBuf,

        #[command(flatten)]
        references: ReferenceArgs,
    },

    /// Print the output columns of a fitted pipeline
    Columns {
        /// Fitted pipeline artifact
        #[arg(short, long)]
        artifact: PathBuf,
    },
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_fit(
    records_path: &Path,
    references: &ReferenceArgs,
    config_path: Option<&Path>,
    output_path: &Path,
    matrix_path: Option<&Path>,
) -> anyhow::Result<()> {
    section("Fit");
    let loader = DataLoader::new();

    let config = match config_path {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    let schema = Schema::clinical_trials();

    step_run("Loading reference tables");
    let tables = references.load(&loader)?;
    step_done(&format!("{} countries", tables.countries.len()));

    step_run("Loading records");
    let records = loader.load_records(records_path)?;
    let (frame, report) = frame_from_records(&records, &schema)?;
    step_done(&format!(
        "{} accepted, {} excluded",
        report.accepted,
        report.excluded_total()
    ));

    step_run("Fitting");
    let start = Instant::now();
    let ctx = Context::new(tables, schema.clone());
    let pipeline = FeaturePipeline::standard(&config, &schema)?;
    let (fitted, output) = pipeline.fit(&frame, &ctx)?;
    step_done(&format!(
        "{} rows × {} cols in {:?}",
        output.height(),
        output.width(),
        start.elapsed()
    ));

    step_run(&format!("Saving → {}", output_path.display()));
    fitted.save(output_path)?;
    step_done("");

    if let Some(path) = matrix_path {
        step_run(&format!("Writing matrix → {}", path.display()));
        let matrix = FeatureMatrix::from_dataframe(&output, Some(fitted.target()))?;
        save_csv(&mut matrix.to_dataframe()?, path)?;
        step_done(&format!("{} rows", matrix.nrows()));
    }

    eprintln!();
    Ok(())
}

pub fn cmd_transform(
    artifact_path: &Path,
    record_path: &Path,
    references: &ReferenceArgs,
) -> anyhow::Result<()> {
    let loader = DataLoader::new();
    let fitted = FittedPipeline::load(artifact_path)?;
    let tables = references.load(&loader)?;
    let record = loader.load_record(record_path)?;

    let service = FeatureService::new(fitted, Context::new(tables, Schema::clinical_trials()));
    let features = service.features(&record)?;

    let map: serde_json::Map<String, serde_json::Value> = features
        .names
        .iter()
        .zip(&features.values)
        .map(|(name, value)| (name.clone(), serde_json::json!(value)))
        .collect();
    println!("{}", serde_json::to_string_pretty(&map)?);
    Ok(())
}

pub fn cmd_columns(artifact_path: &Path) -> anyhow::Result<()> {
    let fitted = FittedPipeline::load(artifact_path)?;
    for column in fitted.feature_columns() {
        println!("{column}");
    }
    Ok(())
}

/// Dispatch a parsed command line.
pub fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Fit {
            records,
            references,
            config,
            output,
            matrix,
        } => cmd_fit(
            &records,
            &references,
            config.as_deref(),
            &output,
            matrix.as_deref(),
        ),
        Commands::Transform {
            artifact,
            record,
            references,
        } => cmd_transform(&artifact, &record, &references),
        Commands::Columns { artifact } => cmd_columns(&artifact),
    }
}
