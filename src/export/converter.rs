//! Classifier to ONNX conversion
//!
//! Lowers a [`ProbabilisticClassifier`]'s operations into an opset-12 graph
//! with a single `(N, F)` FLOAT input and a single `(N, C)` probability
//! output, then writes it atomically to disk.

use prost::Message;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::graph::{format_shape, AttributeValue, Dimension, GraphBuilder, NodeSpec};
use super::proto::{ModelProto, OperatorSetIdProto, StringStringEntryProto};
use crate::config::{ExportConfig, FEATURE_NAMES_KEY, IR_VERSION, MODEL_TYPE_KEY, TARGET_OPSET};
use crate::error::{ExportError, Result};
use crate::models::{Operation, ProbabilisticClassifier};

/// Summary of a successful export
#[derive(Debug, Clone)]
pub struct ExportReport {
    /// Where the artifact was written
    pub path: PathBuf,
    /// Declared input width
    pub num_features: usize,
    /// Declared output width
    pub num_classes: usize,
    /// Default-domain opset of the artifact
    pub opset_version: i64,
    /// Number of graph nodes
    pub node_count: usize,
    /// Size of the artifact
    pub bytes_written: usize,
}

/// Converts trained classifiers into ONNX artifacts
#[derive(Debug, Clone, Default)]
pub struct Converter {
    config: ExportConfig,
}

impl Converter {
    /// Create new converter with default config
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with custom config
    pub fn with_config(config: ExportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Convert a classifier into an in-memory ONNX model
    pub fn convert<M>(&self, model: &M, feature_names: &[String]) -> Result<ModelProto>
    where
        M: ProbabilisticClassifier + ?Sized,
    {
        if feature_names.is_empty() {
            return Err(ExportError::EmptyFeatureSet);
        }
        self.config.validate()?;
        if model.n_features() != feature_names.len() {
            return Err(ExportError::FeatureCountMismatch {
                expected: feature_names.len(),
                actual: model.n_features(),
            });
        }

        let graph = self.lower(model, feature_names.len())?;
        debug!(
            nodes = graph.node_count(),
            constants = graph.constant_count(),
            "Lowered {} to ONNX graph",
            model.name()
        );

        let metadata_props = vec![
            StringStringEntryProto {
                key: FEATURE_NAMES_KEY.to_string(),
                value: serde_json::to_string(feature_names)?,
            },
            StringStringEntryProto {
                key: MODEL_TYPE_KEY.to_string(),
                value: model.name().to_string(),
            },
        ];

        Ok(ModelProto {
            ir_version: IR_VERSION,
            producer_name: self.config.producer_name.clone(),
            producer_version: self.config.producer_version.clone(),
            domain: String::new(),
            model_version: self.config.model_version,
            doc_string: self.config.description.clone(),
            graph: Some(graph.build()),
            opset_import: vec![OperatorSetIdProto {
                domain: String::new(),
                version: TARGET_OPSET,
            }],
            metadata_props,
        })
    }

    /// Convert a classifier and write the artifact to `path`, replacing any existing file
    pub fn export<M>(
        &self,
        model: &M,
        feature_names: &[String],
        path: impl AsRef<Path>,
    ) -> Result<ExportReport>
    where
        M: ProbabilisticClassifier + ?Sized,
    {
        let path = path.as_ref();
        info!("Exporting model with {} features...", feature_names.len());

        let onnx_model = self.convert(model, feature_names)?;
        let node_count = onnx_model.graph.as_ref().map(|g| g.node.len()).unwrap_or(0);
        let bytes = onnx_model.encode_to_vec();
        write_atomic(path, &bytes)?;

        Ok(ExportReport {
            path: path.to_path_buf(),
            num_features: feature_names.len(),
            num_classes: model.n_classes(),
            opset_version: TARGET_OPSET,
            node_count,
            bytes_written: bytes.len(),
        })
    }

    fn lower<M>(&self, model: &M, n_features: usize) -> Result<GraphBuilder>
    where
        M: ProbabilisticClassifier + ?Sized,
    {
        let ops = model.operations();
        if ops.is_empty() {
            return Err(ExportError::InvalidModel(format!(
                "{} exposes no operations",
                model.name()
            )));
        }

        let batch = Dimension::Symbolic(self.config.batch_dim_name.clone());
        let input_shape = [batch.clone(), Dimension::Fixed(n_features)];
        debug!(shape = %format_shape(&input_shape), "Declaring input '{}'", self.config.input_name);

        let mut graph = GraphBuilder::new(self.config.graph_name.clone());
        graph.input(&self.config.input_name, &input_shape);
        let mut current = self.config.input_name.clone();
        let mut width = n_features;
        let last = ops.len() - 1;

        for (i, op) in ops.iter().enumerate() {
            let out = if i == last {
                self.config.output_name.clone()
            } else {
                format!("{}_{}_out", op.name().to_lowercase(), i)
            };

            match op {
                Operation::Dense { weights, bias } => {
                    let (n_in, n_out) = weights.dim();
                    if n_in != width {
                        return Err(ExportError::InvalidModel(format!(
                            "operation {} (Dense) expects {} inputs, previous step produces {}",
                            i, n_in, width
                        )));
                    }
                    if bias.len() != n_out {
                        return Err(ExportError::InvalidModel(format!(
                            "operation {} (Dense) has {} outputs but {} biases",
                            i,
                            n_out,
                            bias.len()
                        )));
                    }
                    let w = graph.constant(
                        format!("dense_{}_weight", i),
                        &[n_in, n_out],
                        weights.iter().map(|&v| v as f32).collect(),
                    );
                    let b = graph.constant(
                        format!("dense_{}_bias", i),
                        &[n_out],
                        bias.iter().map(|&v| v as f32).collect(),
                    );
                    graph.node(NodeSpec::new(
                        format!("dense_{}", i),
                        "Gemm",
                        &[&current, &w, &b],
                        &out,
                    ));
                    width = n_out;
                }
                Operation::Relu | Operation::Sigmoid | Operation::Tanh => {
                    graph.node(NodeSpec::new(
                        format!("{}_{}", op.name().to_lowercase(), i),
                        op.name(),
                        &[&current],
                        &out,
                    ));
                }
                Operation::Softmax => {
                    graph.node(
                        NodeSpec::new(format!("softmax_{}", i), "Softmax", &[&current], &out)
                            .attr("axis", AttributeValue::Int(1)),
                    );
                }
                Operation::BinaryComplement => {
                    if width != 1 {
                        return Err(ExportError::InvalidModel(format!(
                            "operation {} (BinaryComplement) needs a single probability column, got {}",
                            i, width
                        )));
                    }
                    // [1 - p, p]
                    let one = graph.constant(format!("complement_{}_one", i), &[1], vec![1.0]);
                    let negated = format!("complement_{}_negated", i);
                    graph
                        .node(NodeSpec::new(
                            format!("complement_{}_sub", i),
                            "Sub",
                            &[&one, &current],
                            &negated,
                        ))
                        .node(
                            NodeSpec::new(
                                format!("complement_{}_concat", i),
                                "Concat",
                                &[&negated, &current],
                                &out,
                            )
                            .attr("axis", AttributeValue::Int(1)),
                        );
                    width = 2;
                }
                Operation::Gelu => {
                    return Err(ExportError::ConversionUnsupported(format!(
                        "Gelu has no operator in opset {} (introduced in opset 20)",
                        TARGET_OPSET
                    )));
                }
                Operation::Custom(name) => {
                    return Err(ExportError::ConversionUnsupported(format!(
                        "operation '{}' has no ONNX lowering",
                        name
                    )));
                }
            }
            current = out;
        }

        if width != model.n_classes() {
            return Err(ExportError::InvalidModel(format!(
                "{} declares {} classes but its operations produce {} columns",
                model.name(),
                model.n_classes(),
                width
            )));
        }

        graph.output(&self.config.output_name, &[batch, Dimension::Fixed(width)]);
        Ok(graph)
    }
}

/// Write through a sibling temp file so a failed write never leaves a partial artifact
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let fail = |source: std::io::Error| ExportError::WriteFailure {
        path: path.to_path_buf(),
        source,
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(fail)?;
    tmp.write_all(bytes).map_err(fail)?;
    tmp.as_file().sync_all().map_err(fail)?;
    tmp.persist(path).map_err(|e| fail(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Activation, LogisticRegression, MLPClassifier};
    use ndarray::{array, Array1};

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{}", i)).collect()
    }

    struct CustomModel;

    impl ProbabilisticClassifier for CustomModel {
        fn name(&self) -> &str {
            "CustomModel"
        }
        fn n_features(&self) -> usize {
            2
        }
        fn n_classes(&self) -> usize {
            2
        }
        fn predict_proba(&self, x: &ndarray::Array2<f64>) -> Result<ndarray::Array2<f64>> {
            Ok(ndarray::Array2::from_elem((x.nrows(), 2), 0.5))
        }
        fn operations(&self) -> Vec<Operation> {
            vec![Operation::Custom("TreeEnsembleClassifier".to_string())]
        }
    }

    #[test]
    fn test_logistic_graph_layout() {
        let model = LogisticRegression::new(array![1.0, 2.0, 3.0], 0.5);
        let proto = Converter::new().convert(&model, &names(3)).unwrap();

        assert_eq!(proto.ir_version, IR_VERSION);
        assert_eq!(proto.opset_import[0].version, 12);
        let graph = proto.graph.unwrap();
        let ops: Vec<&str> = graph.node.iter().map(|n| n.op_type.as_str()).collect();
        assert_eq!(ops, vec!["Gemm", "Sigmoid", "Sub", "Concat"]);
        assert_eq!(graph.input[0].name, "input");
        assert_eq!(graph.output[0].name, "probabilities");
        assert_eq!(graph.node.last().unwrap().output[0], "probabilities");
        // weight, bias, constant one
        assert_eq!(graph.initializer.len(), 3);
    }

    #[test]
    fn test_feature_names_in_metadata() {
        let model = LogisticRegression::new(array![1.0, 2.0], 0.0);
        let features = vec!["home_avg_xg".to_string(), "away_avg_xg".to_string()];
        let proto = Converter::new().convert(&model, &features).unwrap();

        let entry = proto
            .metadata_props
            .iter()
            .find(|p| p.key == FEATURE_NAMES_KEY)
            .unwrap();
        let decoded: Vec<String> = serde_json::from_str(&entry.value).unwrap();
        assert_eq!(decoded, features);
    }

    #[test]
    fn test_empty_feature_set() {
        let model = LogisticRegression::new(Array1::zeros(0), 0.0);
        let result = Converter::new().convert(&model, &[]);
        assert!(matches!(result, Err(ExportError::EmptyFeatureSet)));
    }

    #[test]
    fn test_feature_count_mismatch() {
        let model = LogisticRegression::new(array![1.0, 2.0], 0.0);
        let result = Converter::new().convert(&model, &names(3));
        assert!(matches!(
            result,
            Err(ExportError::FeatureCountMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_custom_operation_unsupported() {
        let result = Converter::new().convert(&CustomModel, &names(2));
        assert!(matches!(result, Err(ExportError::ConversionUnsupported(_))));
    }

    #[test]
    fn test_gelu_unsupported_at_pinned_opset() {
        let model = MLPClassifier::random(&[3, 4, 2], Activation::Gelu, 3).unwrap();
        let result = Converter::new().convert(&model, &names(3));
        match result {
            Err(ExportError::ConversionUnsupported(msg)) => assert!(msg.contains("Gelu")),
            other => panic!("expected ConversionUnsupported, got {:?}", other),
        }
    }

    #[test]
    fn test_mlp_graph_layout() {
        let model = MLPClassifier::random(&[5, 6, 3], Activation::Tanh, 11).unwrap();
        let proto = Converter::new().convert(&model, &names(5)).unwrap();
        let graph = proto.graph.unwrap();
        let ops: Vec<&str> = graph.node.iter().map(|n| n.op_type.as_str()).collect();
        assert_eq!(ops, vec!["Gemm", "Tanh", "Gemm", "Softmax"]);
        assert_eq!(graph.initializer[0].dims, vec![5, 6]);
        assert_eq!(graph.initializer[0].float_data.len(), 30);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let model = MLPClassifier::random(&[4, 3, 2], Activation::ReLU, 5).unwrap();
        let converter = Converter::new();
        let a = converter.convert(&model, &names(4)).unwrap().encode_to_vec();
        let b = converter.convert(&model, &names(4)).unwrap().encode_to_vec();
        assert_eq!(a, b);
    }

    #[test]
    fn test_export_missing_directory_is_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("predictor.onnx");
        let model = LogisticRegression::new(array![1.0], 0.0);

        let result = Converter::new().export(&model, &names(1), &path);
        assert!(matches!(result, Err(ExportError::WriteFailure { .. })));
        assert!(!path.exists());
    }

    #[test]
    fn test_export_writes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("predictor.onnx");
        let model = LogisticRegression::new(array![1.0, -1.0], 0.0);

        let report = Converter::new().export(&model, &names(2), &path).unwrap();
        assert_eq!(report.num_features, 2);
        assert_eq!(report.num_classes, 2);
        assert_eq!(report.bytes_written as u64, std::fs::metadata(&path).unwrap().len());
        // only the artifact, no leftover temp files
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
