//! Linear classifiers

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use super::{check_width, sigmoid, softmax_rows, Operation, ProbabilisticClassifier};
use crate::error::{ExportError, Result};

/// Logistic regression for binary classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    /// Fitted coefficients
    pub coefficients: Array1<f64>,
    /// Fitted intercept
    pub intercept: f64,
}

impl LogisticRegression {
    /// Create a logistic regression from fitted parameters
    pub fn new(coefficients: Array1<f64>, intercept: f64) -> Self {
        Self {
            coefficients,
            intercept,
        }
    }

    /// Probability of the positive class
    pub fn predict_positive(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        check_width(x, self.n_features())?;
        let linear = x.dot(&self.coefficients) + self.intercept;
        Ok(linear.mapv(sigmoid))
    }
}

impl ProbabilisticClassifier for LogisticRegression {
    fn name(&self) -> &str {
        "LogisticRegression"
    }

    fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    fn n_classes(&self) -> usize {
        2
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let p = self.predict_positive(x)?;
        let mut proba = Array2::zeros((p.len(), 2));
        proba.column_mut(0).assign(&p.mapv(|v| 1.0 - v));
        proba.column_mut(1).assign(&p);
        Ok(proba)
    }

    fn operations(&self) -> Vec<Operation> {
        let weights = self.coefficients.clone().insert_axis(Axis(1));
        vec![
            Operation::Dense {
                weights,
                bias: Array1::from_elem(1, self.intercept),
            },
            Operation::Sigmoid,
            Operation::BinaryComplement,
        ]
    }
}

/// Multinomial logistic regression
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SoftmaxRegression {
    /// Coefficients shaped `(n_features, n_classes)`
    pub coefficients: Array2<f64>,
    /// One intercept per class
    pub intercepts: Array1<f64>,
}

impl SoftmaxRegression {
    /// Create a softmax regression from fitted parameters
    pub fn new(coefficients: Array2<f64>, intercepts: Array1<f64>) -> Result<Self> {
        let model = Self {
            coefficients,
            intercepts,
        };
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<()> {
        if self.coefficients.ncols() < 2 {
            return Err(ExportError::InvalidModel(format!(
                "softmax regression needs at least 2 classes, got {}",
                self.coefficients.ncols()
            )));
        }
        if self.intercepts.len() != self.coefficients.ncols() {
            return Err(ExportError::InvalidModel(format!(
                "{} intercepts for {} classes",
                self.intercepts.len(),
                self.coefficients.ncols()
            )));
        }
        Ok(())
    }
}

impl ProbabilisticClassifier for SoftmaxRegression {
    fn name(&self) -> &str {
        "SoftmaxRegression"
    }

    fn n_features(&self) -> usize {
        self.coefficients.nrows()
    }

    fn n_classes(&self) -> usize {
        self.coefficients.ncols()
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        check_width(x, self.n_features())?;
        let logits = x.dot(&self.coefficients) + &self.intercepts;
        Ok(softmax_rows(logits))
    }

    fn operations(&self) -> Vec<Operation> {
        vec![
            Operation::Dense {
                weights: self.coefficients.clone(),
                bias: self.intercepts.clone(),
            },
            Operation::Softmax,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_logistic_proba_columns() {
        let model = LogisticRegression::new(array![1.0, -1.0], 0.0);
        let proba = model.predict_proba(&array![[0.0, 0.0], [2.0, 0.0]]).unwrap();

        assert_eq!(proba.dim(), (2, 2));
        assert!((proba[[0, 0]] - 0.5).abs() < 1e-12);
        assert!(proba[[1, 1]] > 0.85);
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_logistic_rejects_wrong_width() {
        let model = LogisticRegression::new(array![1.0, -1.0], 0.0);
        let result = model.predict_proba(&array![[1.0, 2.0, 3.0]]);
        assert!(matches!(
            result,
            Err(ExportError::FeatureCountMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn test_logistic_operations() {
        let model = LogisticRegression::new(array![1.0, 2.0, 3.0], 0.5);
        let ops = model.operations();
        assert_eq!(ops.len(), 3);
        match &ops[0] {
            Operation::Dense { weights, bias } => {
                assert_eq!(weights.dim(), (3, 1));
                assert_eq!(bias.len(), 1);
            }
            other => panic!("expected dense, got {:?}", other),
        }
        assert_eq!(ops[2], Operation::BinaryComplement);
    }

    #[test]
    fn test_softmax_regression() {
        let model = SoftmaxRegression::new(
            array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            array![0.0, 0.0, 0.0],
        )
        .unwrap();
        let proba = model.predict_proba(&array![[5.0, 0.0]]).unwrap();

        assert_eq!(proba.dim(), (1, 3));
        assert!(proba[[0, 0]] > proba[[0, 1]]);
        assert!((proba.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_softmax_regression_validation() {
        let result = SoftmaxRegression::new(array![[1.0], [2.0]], array![0.0]);
        assert!(matches!(result, Err(ExportError::InvalidModel(_))));

        let result = SoftmaxRegression::new(array![[1.0, 2.0]], array![0.0, 1.0, 2.0]);
        assert!(matches!(result, Err(ExportError::InvalidModel(_))));
    }
}
