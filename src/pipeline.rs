//! Export-then-verify pipeline
//!
//! Runs the converter and, only when the artifact was written, the verifier.
//! Failures are caught at the stage boundary and reported as a tagged
//! outcome; the boolean [`convert`] and [`verify`] helpers sit on top.

use std::path::Path;
use tracing::{debug, error, info};

use crate::config::{PipelineConfig, VerifierConfig};
use crate::error::{ExportError, Result};
use crate::export::{Converter, ExportReport};
use crate::models::ProbabilisticClassifier;
use crate::verify::{VerificationReport, Verifier};

/// Where a pipeline run ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    NotExported,
    Exporting,
    ExportedAndVerified,
    ExportFailed,
    VerificationFailed,
}

impl PipelineState {
    /// Whether no further transition is possible
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineState::ExportedAndVerified
                | PipelineState::ExportFailed
                | PipelineState::VerificationFailed
        )
    }
}

/// Result of a pipeline run
#[derive(Debug)]
pub struct PipelineOutcome {
    pub state: PipelineState,
    pub export: Option<ExportReport>,
    pub verification: Option<VerificationReport>,
    pub error: Option<ExportError>,
}

impl PipelineOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == PipelineState::ExportedAndVerified
    }

    /// Convert into the verification report or the error that stopped the run
    pub fn into_result(self) -> Result<VerificationReport> {
        match (self.error, self.verification) {
            (Some(err), _) => Err(err),
            (None, Some(report)) => Ok(report),
            (None, None) => Err(ExportError::InferenceFailure(
                "pipeline finished without a verification report".to_string(),
            )),
        }
    }
}

/// Orchestrates export followed by verification
#[derive(Debug, Clone)]
pub struct ExportPipeline {
    config: PipelineConfig,
    state: PipelineState,
}

impl ExportPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            state: PipelineState::NotExported,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// State reached by the most recent run
    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        debug!(from = ?self.state, to = ?next, "Pipeline state change");
        self.state = next;
    }

    /// Export `model` to the configured path and verify the result
    pub fn run(
        &mut self,
        model: &dyn ProbabilisticClassifier,
        feature_names: &[String],
    ) -> PipelineOutcome {
        self.state = PipelineState::NotExported;
        self.transition(PipelineState::Exporting);

        let path = self.config.artifact_path.clone();
        let export = self
            .config
            .validate()
            .and_then(|_| {
                Converter::with_config(self.config.export.clone()).export(model, feature_names, &path)
            });
        let export = match export {
            Ok(report) => report,
            Err(err) => {
                error!(stage = ?err.stage(), "✗ Export failed: {}", err);
                self.transition(PipelineState::ExportFailed);
                return PipelineOutcome {
                    state: self.state,
                    export: None,
                    verification: None,
                    error: Some(err),
                };
            }
        };
        info!("✓ Model exported successfully to {}", export.path.display());

        let verifier = Verifier::with_config(self.config.verify.clone());
        let verification = match self.config.parity_tolerance {
            Some(tolerance) => verifier.verify_against(&path, model, tolerance),
            None => verifier.verify(&path, Some(feature_names.len())),
        };

        match verification {
            Ok(report) => {
                self.transition(PipelineState::ExportedAndVerified);
                PipelineOutcome {
                    state: self.state,
                    export: Some(export),
                    verification: Some(report),
                    error: None,
                }
            }
            Err(err) => {
                log_verification_failure(&err);
                self.transition(PipelineState::VerificationFailed);
                PipelineOutcome {
                    state: self.state,
                    export: Some(export),
                    verification: None,
                    error: Some(err),
                }
            }
        }
    }
}

fn log_verification_failure(err: &ExportError) {
    match err {
        ExportError::LoadFailure { .. } | ExportError::SchemaInvalid(_) => {
            error!(stage = ?err.stage(), "✗ Invalid ONNX model: {}", err)
        }
        _ => error!(stage = ?err.stage(), "✗ Verification failed: {}", err),
    }
}

/// Export and verify with default settings, reporting success as a boolean
pub fn convert(
    model: &dyn ProbabilisticClassifier,
    feature_names: &[String],
    output_path: impl AsRef<Path>,
) -> bool {
    let config = PipelineConfig::new().with_artifact_path(output_path.as_ref());
    ExportPipeline::new(config).run(model, feature_names).succeeded()
}

/// Verify an existing artifact, reporting success as a boolean
pub fn verify(artifact_path: impl AsRef<Path>, expected_num_features: Option<usize>) -> bool {
    match Verifier::with_config(VerifierConfig::default())
        .verify(artifact_path, expected_num_features)
    {
        Ok(_) => true,
        Err(err) => {
            log_verification_failure(&err);
            false
        }
    }
}
