//! Trained classifiers that can be exported
//!
//! A classifier maps a `(batch, n_features)` array to per-class
//! probabilities and describes its internal computation as an ordered list
//! of [`Operation`]s, which the converter lowers to ONNX nodes.

mod linear;
mod mlp;

pub use linear::{LogisticRegression, SoftmaxRegression};
pub use mlp::{Activation, MLPClassifier};

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::{ExportError, Result};

/// One step of a classifier's forward pass
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// `x @ weights + bias`, weights shaped `(in, out)`
    Dense { weights: Array2<f64>, bias: Array1<f64> },
    Relu,
    Sigmoid,
    Tanh,
    /// GELU, tanh approximation
    Gelu,
    /// Row-wise softmax
    Softmax,
    /// Single probability column `p` to `[1 - p, p]`
    BinaryComplement,
    /// Operation known only to the model itself
    Custom(String),
}

impl Operation {
    /// Short operation name for diagnostics
    pub fn name(&self) -> &str {
        match self {
            Operation::Dense { .. } => "Dense",
            Operation::Relu => "Relu",
            Operation::Sigmoid => "Sigmoid",
            Operation::Tanh => "Tanh",
            Operation::Gelu => "Gelu",
            Operation::Softmax => "Softmax",
            Operation::BinaryComplement => "BinaryComplement",
            Operation::Custom(name) => name,
        }
    }
}

/// A trained model producing class probabilities from a fixed-width feature vector
pub trait ProbabilisticClassifier {
    /// Model family name
    fn name(&self) -> &str;

    /// Number of input columns accepted
    fn n_features(&self) -> usize;

    /// Number of probability columns produced
    fn n_classes(&self) -> usize;

    /// Predict class probabilities, shape `(batch, n_classes)`
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>>;

    /// Forward pass as an ordered list of operations
    fn operations(&self) -> Vec<Operation>;
}

/// Reject inputs whose width differs from the model's
pub(crate) fn check_width(x: &Array2<f64>, n_features: usize) -> Result<()> {
    if x.ncols() != n_features {
        return Err(ExportError::FeatureCountMismatch {
            expected: n_features,
            actual: x.ncols(),
        });
    }
    Ok(())
}

pub(crate) fn sigmoid(v: f64) -> f64 {
    1.0 / (1.0 + (-v).exp())
}

pub(crate) fn gelu(v: f64) -> f64 {
    let c = (2.0 / std::f64::consts::PI).sqrt();
    0.5 * v * (1.0 + (c * (v + 0.044715 * v.powi(3))).tanh())
}

/// Numerically stable row-wise softmax
pub(crate) fn softmax_rows(mut z: Array2<f64>) -> Array2<f64> {
    for mut row in z.axis_iter_mut(Axis(0)) {
        let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    z
}

/// Serialized classifier parameters, tagged by model family
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClassifierSpec {
    LogisticRegression(LogisticRegression),
    SoftmaxRegression(SoftmaxRegression),
    Mlp(MLPClassifier),
}

impl ClassifierSpec {
    /// Read classifier parameters from a JSON file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let spec: Self = serde_json::from_reader(BufReader::new(file))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Check parameter shapes are mutually consistent
    pub fn validate(&self) -> Result<()> {
        match self {
            ClassifierSpec::LogisticRegression(_) => Ok(()),
            ClassifierSpec::SoftmaxRegression(m) => m.validate(),
            ClassifierSpec::Mlp(m) => m.validate(),
        }
    }

    fn inner(&self) -> &dyn ProbabilisticClassifier {
        match self {
            ClassifierSpec::LogisticRegression(m) => m,
            ClassifierSpec::SoftmaxRegression(m) => m,
            ClassifierSpec::Mlp(m) => m,
        }
    }
}

impl ProbabilisticClassifier for ClassifierSpec {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn n_features(&self) -> usize {
        self.inner().n_features()
    }

    fn n_classes(&self) -> usize {
        self.inner().n_classes()
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.inner().predict_proba(x)
    }

    fn operations(&self) -> Vec<Operation> {
        self.inner().operations()
    }
}
