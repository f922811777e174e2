//! Artifact verification
//!
//! - [`checker`] - IR, opset and metadata checks on a decoded model
//! - [`session`] - tract-onnx session over the artifact graph
//! - [`Verifier`] - load, check, run and report

pub mod checker;
pub mod session;
mod verifier;

pub use checker::{check_model, ArtifactMetadata};
pub use session::{Dim, Session, TensorInfo};
pub use verifier::{VerificationReport, Verifier};
