//! Multi-layer perceptron classifier

use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use super::{check_width, gelu, sigmoid, softmax_rows, Operation, ProbabilisticClassifier};
use crate::error::{ExportError, Result};

/// Hidden layer activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Activation {
    /// Rectified Linear Unit
    #[default]
    ReLU,
    /// Sigmoid
    Sigmoid,
    /// Hyperbolic tangent
    Tanh,
    /// Gaussian error linear unit
    Gelu,
    /// Linear (identity)
    Linear,
}

impl Activation {
    fn apply(self, v: f64) -> f64 {
        match self {
            Activation::ReLU => v.max(0.0),
            Activation::Sigmoid => sigmoid(v),
            Activation::Tanh => v.tanh(),
            Activation::Gelu => gelu(v),
            Activation::Linear => v,
        }
    }

    fn operation(self) -> Option<Operation> {
        match self {
            Activation::ReLU => Some(Operation::Relu),
            Activation::Sigmoid => Some(Operation::Sigmoid),
            Activation::Tanh => Some(Operation::Tanh),
            Activation::Gelu => Some(Operation::Gelu),
            Activation::Linear => None,
        }
    }
}

/// Feedforward classifier with a softmax output layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MLPClassifier {
    /// Layer weights, each shaped `(n_in, n_out)`
    pub weights: Vec<Array2<f64>>,
    /// Layer biases
    pub biases: Vec<Array1<f64>>,
    /// Activation applied after every hidden layer
    #[serde(default)]
    pub activation: Activation,
}

impl MLPClassifier {
    /// Build from fitted layer parameters
    pub fn from_parameters(
        weights: Vec<Array2<f64>>,
        biases: Vec<Array1<f64>>,
        activation: Activation,
    ) -> Result<Self> {
        let model = Self {
            weights,
            biases,
            activation,
        };
        model.validate()?;
        Ok(model)
    }

    /// Glorot-uniform initialised network with layer sizes `[n_in, hidden.., n_classes]`
    pub fn random(layer_sizes: &[usize], activation: Activation, seed: u64) -> Result<Self> {
        if layer_sizes.len() < 2 {
            return Err(ExportError::InvalidModel(
                "an MLP needs at least an input and an output layer".to_string(),
            ));
        }
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let mut weights = Vec::with_capacity(layer_sizes.len() - 1);
        let mut biases = Vec::with_capacity(layer_sizes.len() - 1);

        for pair in layer_sizes.windows(2) {
            let (n_in, n_out) = (pair[0], pair[1]);
            let scale = (2.0 / (n_in + n_out).max(1) as f64).sqrt();
            weights.push(Array2::from_shape_fn((n_in, n_out), |_| {
                rng.gen::<f64>() * 2.0 * scale - scale
            }));
            biases.push(Array1::from_shape_fn(n_out, |_| rng.gen::<f64>() * 0.2 - 0.1));
        }

        Self::from_parameters(weights, biases, activation)
    }

    pub fn validate(&self) -> Result<()> {
        if self.weights.is_empty() {
            return Err(ExportError::InvalidModel("MLP has no layers".to_string()));
        }
        if self.weights.len() != self.biases.len() {
            return Err(ExportError::InvalidModel(format!(
                "{} weight matrices but {} bias vectors",
                self.weights.len(),
                self.biases.len()
            )));
        }
        for (i, (w, b)) in self.weights.iter().zip(self.biases.iter()).enumerate() {
            if w.ncols() != b.len() {
                return Err(ExportError::InvalidModel(format!(
                    "layer {}: {} outputs but {} biases",
                    i,
                    w.ncols(),
                    b.len()
                )));
            }
            if i > 0 && self.weights[i - 1].ncols() != w.nrows() {
                return Err(ExportError::InvalidModel(format!(
                    "layer {}: expects {} inputs, previous layer produces {}",
                    i,
                    w.nrows(),
                    self.weights[i - 1].ncols()
                )));
            }
        }
        Ok(())
    }
}

impl ProbabilisticClassifier for MLPClassifier {
    fn name(&self) -> &str {
        "MLPClassifier"
    }

    fn n_features(&self) -> usize {
        self.weights.first().map(|w| w.nrows()).unwrap_or(0)
    }

    fn n_classes(&self) -> usize {
        self.weights.last().map(|w| w.ncols()).unwrap_or(0)
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.validate()?;
        check_width(x, self.n_features())?;

        let last = self.weights.len() - 1;
        let mut a = x.to_owned();
        for (i, (w, b)) in self.weights.iter().zip(self.biases.iter()).enumerate() {
            let z = a.dot(w) + b;
            a = if i < last {
                z.mapv(|v| self.activation.apply(v))
            } else {
                softmax_rows(z)
            };
        }
        Ok(a)
    }

    fn operations(&self) -> Vec<Operation> {
        let last = self.weights.len().saturating_sub(1);
        let mut ops = Vec::new();
        for (i, (w, b)) in self.weights.iter().zip(self.biases.iter()).enumerate() {
            ops.push(Operation::Dense {
                weights: w.clone(),
                bias: b.clone(),
            });
            if i < last {
                if let Some(op) = self.activation.operation() {
                    ops.push(op);
                }
            }
        }
        ops.push(Operation::Softmax);
        ops
    }
}
