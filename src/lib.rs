//! Kolosal ONNX - classifier export and verification
//!
//! Converts trained probabilistic classifiers into ONNX artifacts and checks
//! that the written artifact loads and runs.
//!
//! # Modules
//!
//! - [`models`] - classifiers exposing probabilities and their computation steps
//! - [`export`] - lowering to ONNX graphs, encoding and atomic writes
//! - [`verify`] - metadata checker, tract session and artifact verifier
//! - [`pipeline`] - export-then-verify orchestration and boolean helpers
//! - [`config`] - serde-backed configuration
//! - [`cli`] - command-line interface

// Core error handling
pub mod error;
pub mod config;

// Models and conversion
pub mod models;
pub mod export;
pub mod verify;
pub mod pipeline;

// Services
pub mod cli;

pub use error::{ExportError, Result};
pub use pipeline::{convert, verify};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{ExportError, Result, Stage};

    // Configuration
    pub use crate::config::{ExportConfig, PipelineConfig, VerifierConfig};

    // Models
    pub use crate::models::{
        Activation, ClassifierSpec, LogisticRegression, MLPClassifier, Operation,
        ProbabilisticClassifier, SoftmaxRegression,
    };

    // Export
    pub use crate::export::{Converter, ExportReport};

    // Verification
    pub use crate::verify::{Session, VerificationReport, Verifier};

    // Pipeline
    pub use crate::pipeline::{ExportPipeline, PipelineOutcome, PipelineState};
}
