//! Export and verification configuration

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::error::{ExportError, Result};

/// Default location of the exported artifact
pub const DEFAULT_ARTIFACT_PATH: &str = "models/predictor.onnx";

/// ONNX IR version matching [`TARGET_OPSET`]
pub const IR_VERSION: i64 = 7;

/// Default-domain opset every artifact is pinned to
pub const TARGET_OPSET: i64 = 12;

/// Metadata key holding the JSON-encoded feature names
pub const FEATURE_NAMES_KEY: &str = "feature_names";
/// Metadata key holding the source model family
pub const MODEL_TYPE_KEY: &str = "model_type";

/// Largest batch the verifier will feed an artifact
pub const MAX_VERIFY_BATCH: usize = 65_536;
/// Largest input tensor, in elements, the verifier will allocate
pub const MAX_VERIFY_ELEMENTS: usize = 1 << 26;

/// Converter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Producer name written to the artifact
    pub producer_name: String,
    /// Producer version written to the artifact
    pub producer_version: String,
    /// Graph name
    pub graph_name: String,
    /// Name of the single input slot
    pub input_name: String,
    /// Name of the single output slot
    pub output_name: String,
    /// Symbolic name of the unbound batch dimension
    pub batch_dim_name: String,
    /// Model version stamped into the artifact
    pub model_version: i64,
    /// Free-form description
    pub description: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            producer_name: "Kolosal AutoML".to_string(),
            producer_version: env!("CARGO_PKG_VERSION").to_string(),
            graph_name: "kolosal_classifier".to_string(),
            input_name: "input".to_string(),
            output_name: "probabilities".to_string(),
            batch_dim_name: "N".to_string(),
            model_version: 1,
            description: String::new(),
        }
    }
}

impl ExportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the graph name
    pub fn with_graph_name(mut self, name: impl Into<String>) -> Self {
        self.graph_name = name.into();
        self
    }

    /// Builder method to set the input and output slot names
    pub fn with_slot_names(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.input_name = input.into();
        self.output_name = output.into();
        self
    }

    /// Builder method to set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Check slot names are usable as ONNX value names
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("input_name", &self.input_name),
            ("output_name", &self.output_name),
            ("batch_dim_name", &self.batch_dim_name),
        ] {
            if value.trim().is_empty() {
                return Err(ExportError::ConfigError(format!("{} must not be empty", field)));
            }
        }
        if self.input_name == self.output_name {
            return Err(ExportError::ConfigError(format!(
                "input and output slots share the name '{}'",
                self.input_name
            )));
        }
        Ok(())
    }
}

/// Verifier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Seed for the sample generator, entropy-seeded when `None`
    pub seed: Option<u64>,
    /// Batch sizes run in addition to the reported single-row batch
    pub batch_sizes: Vec<usize>,
    /// Allowed distance of a probability row sum from 1.0 before warning
    pub probability_tolerance: f64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            seed: None,
            batch_sizes: vec![1],
            probability_tolerance: 1e-3,
        }
    }
}

impl VerifierConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to fix the sample seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Builder method to set the batch sizes to run
    pub fn with_batch_sizes(mut self, sizes: Vec<usize>) -> Self {
        self.batch_sizes = sizes;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_sizes.is_empty() {
            return Err(ExportError::ConfigError("batch_sizes must not be empty".to_string()));
        }
        if self.batch_sizes.contains(&0) {
            return Err(ExportError::ConfigError("batch sizes must be positive".to_string()));
        }
        if let Some(&n) = self.batch_sizes.iter().find(|&&n| n > MAX_VERIFY_BATCH) {
            return Err(ExportError::ConfigError(format!(
                "batch size {} exceeds the limit of {}",
                n, MAX_VERIFY_BATCH
            )));
        }
        if !(self.probability_tolerance >= 0.0) {
            return Err(ExportError::ConfigError(
                "probability_tolerance must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the export-then-verify pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Where the artifact is written
    pub artifact_path: PathBuf,
    /// Converter settings
    pub export: ExportConfig,
    /// Verifier settings
    pub verify: VerifierConfig,
    /// Compare artifact outputs with the in-memory model when set
    pub parity_tolerance: Option<f64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            artifact_path: PathBuf::from(DEFAULT_ARTIFACT_PATH),
            export: ExportConfig::default(),
            verify: VerifierConfig::default(),
            parity_tolerance: None,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method to set the artifact path
    pub fn with_artifact_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact_path = path.into();
        self
    }

    /// Builder method to set converter settings
    pub fn with_export(mut self, export: ExportConfig) -> Self {
        self.export = export;
        self
    }

    /// Builder method to set verifier settings
    pub fn with_verify(mut self, verify: VerifierConfig) -> Self {
        self.verify = verify;
        self
    }

    /// Builder method to enable the parity check
    pub fn with_parity_tolerance(mut self, tolerance: f64) -> Self {
        self.parity_tolerance = Some(tolerance);
        self
    }

    /// Load configuration from a JSON file; missing fields take defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.artifact_path.as_os_str().is_empty() {
            return Err(ExportError::ConfigError("artifact_path must not be empty".to_string()));
        }
        if let Some(tol) = self.parity_tolerance {
            if !(tol >= 0.0) {
                return Err(ExportError::ConfigError(
                    "parity_tolerance must be non-negative".to_string(),
                ));
            }
        }
        self.export.validate()?;
        self.verify.validate()
    }
}
