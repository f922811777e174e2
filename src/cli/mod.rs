//! Kolosal ONNX CLI Module
//!
//! Command-line interface for exporting classifiers and verifying artifacts.

use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{PipelineConfig, DEFAULT_ARTIFACT_PATH};
use crate::models::{ClassifierSpec, ProbabilisticClassifier};
use crate::pipeline::ExportPipeline;
use crate::verify::session::format_dims;
use crate::verify::{VerificationReport, Verifier};

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }
fn bad(s: &str) -> ColoredString    { s.truecolor(235, 100, 100) }

fn step_ok(msg: &str) {
    println!("  {} {}", ok("✓"), msg);
}

fn step_fail(msg: &str) {
    println!("  {} {}", bad("✗"), msg);
}

fn step_run(msg: &str) {
    println!("  {} {}...", accent("›"), msg);
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

fn kv(key: &str, val: &str) {
    println!("  {:<16} {}", muted(key), val.white());
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "kolosal-onnx")]
#[command(author = "KolosalAI")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Export classifiers to ONNX and verify the artifacts")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Export a classifier to ONNX and verify the artifact
    Export {
        /// Classifier parameters (JSON, tagged by "type")
        #[arg(short, long)]
        model: PathBuf,

        /// Feature names: a file (JSON array or one per line) or a comma-separated list
        #[arg(short, long)]
        features: String,

        /// Output artifact path
        #[arg(short, long, default_value = DEFAULT_ARTIFACT_PATH)]
        output: PathBuf,

        /// Pipeline configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Seed for the verification sample
        #[arg(long)]
        seed: Option<u64>,

        /// Compare artifact outputs with the model within this tolerance
        #[arg(long)]
        parity: Option<f64>,
    },

    /// Verify an existing ONNX artifact
    Verify {
        /// Artifact path
        #[arg(short, long, default_value = DEFAULT_ARTIFACT_PATH)]
        artifact: PathBuf,

        /// Expected number of input features
        #[arg(short, long)]
        num_features: Option<usize>,

        /// Seed for the verification sample
        #[arg(long)]
        seed: Option<u64>,

        /// Extra batch sizes to run
        #[arg(long, value_delimiter = ',')]
        batch_sizes: Vec<usize>,
    },
}

/// Read feature names from a file, or split a comma-separated list
pub fn parse_feature_names(arg: &str) -> anyhow::Result<Vec<String>> {
    let path = Path::new(arg);
    if path.is_file() {
        let content = std::fs::read_to_string(path)?;
        if content.trim_start().starts_with('[') {
            return Ok(serde_json::from_str(&content)?);
        }
        return Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect());
    }
    Ok(arg
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect())
}

fn print_report(report: &VerificationReport) {
    kv("Input", &format!("{} {}", report.input_name, format_dims(&report.declared_input_shape)));
    kv("Output", &format!("{} {}", report.output_name, format_dims(&report.declared_output_shape)));
    kv("Input shape", &format!("{:?}", report.input_shape));
    kv("Output shape", &format!("{:?}", report.output_shape));
    kv("Sample", &format!("{:?}", report.sample));
    kv("Batches", &format!("{:?}", report.batch_sizes_checked));
    kv("Opset", &report.opset_version.to_string());
    if !report.producer.is_empty() {
        kv("Producer", &report.producer);
    }
    if let Some(names) = &report.feature_names {
        kv("Features", &names.join(", "));
    }
    if let Some(diff) = report.max_abs_diff {
        kv("Max abs diff", &format!("{:.3e}", diff));
    }
}

// ─── Export ────────────────────────────────────────────────────────────────────

pub fn cmd_export(
    model_path: &Path,
    features: &str,
    output: &Path,
    config_path: Option<&Path>,
    seed: Option<u64>,
    parity: Option<f64>,
) -> anyhow::Result<()> {
    section("Export");

    let mut config = match config_path {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::new(),
    };
    config.artifact_path = output.to_path_buf();
    if let Some(seed) = seed {
        config.verify.seed = Some(seed);
    }
    if let Some(tolerance) = parity {
        config.parity_tolerance = Some(tolerance);
    }

    step_run(&format!("Loading {}", model_path.display()));
    let model = ClassifierSpec::from_json_file(model_path)?;
    let feature_names = parse_feature_names(features)?;
    step_ok(&format!(
        "{} with {} features, {} classes",
        model.name().cyan(),
        model.n_features(),
        model.n_classes()
    ));

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let start = Instant::now();
    let outcome = ExportPipeline::new(config).run(&model, &feature_names);
    if let Some(export) = &outcome.export {
        step_ok(&format!(
            "Model exported to {} ({} nodes, {} bytes)",
            export.path.display(),
            export.node_count,
            export.bytes_written
        ));
    }

    match outcome.into_result() {
        Ok(report) => {
            step_ok(&format!("Artifact verified in {:?}", start.elapsed()));
            println!();
            print_report(&report);
            println!();
            Ok(())
        }
        Err(err) => {
            step_fail(&err.to_string());
            Err(err.into())
        }
    }
}

// ─── Verify ────────────────────────────────────────────────────────────────────

pub fn cmd_verify(
    artifact: &Path,
    num_features: Option<usize>,
    seed: Option<u64>,
    batch_sizes: Vec<usize>,
) -> anyhow::Result<()> {
    section("Verify");

    let mut config = crate::config::VerifierConfig::new();
    config.seed = seed;
    if !batch_sizes.is_empty() {
        config.batch_sizes = batch_sizes;
    }

    step_run(&format!("Checking {}", artifact.display()));
    match Verifier::with_config(config).verify(artifact, num_features) {
        Ok(report) => {
            step_ok("ONNX model is valid");
            step_ok("Test inference successful");
            println!();
            print_report(&report);
            println!();
            Ok(())
        }
        Err(err) => {
            step_fail(&err.to_string());
            Err(err.into())
        }
    }
}
