//! Artifact verification
//!
//! Loads a serialized model, checks its header and metadata, builds a tract
//! session and runs seeded random batches through it. Slot names and the
//! feature width are read from the artifact itself.

use ndarray::{Array2, Axis, Ix2, Zip};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tract_onnx::pb::ModelProto;
use tract_onnx::prelude::Framework;

use super::checker::check_model;
use super::session::{format_dims, Dim, Session, TensorInfo};
use crate::config::{VerifierConfig, MAX_VERIFY_BATCH, MAX_VERIFY_ELEMENTS};
use crate::error::{ExportError, Result};
use crate::models::ProbabilisticClassifier;

/// Outcome of a successful verification
#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub path: PathBuf,
    pub input_name: String,
    pub output_name: String,
    /// Input shape as the runtime sees it, e.g. `(N, 16)`
    pub declared_input_shape: Vec<Dim>,
    pub declared_output_shape: Vec<Dim>,
    /// Concrete shape of the reported batch
    pub input_shape: Vec<usize>,
    /// Concrete shape of the reported batch's output
    pub output_shape: Vec<usize>,
    /// First output row of the reported batch
    pub sample: Vec<f32>,
    /// Per-row sums of the reported batch's output
    pub row_sums: Vec<f32>,
    /// Column order recorded at export time, if any
    pub feature_names: Option<Vec<String>>,
    pub opset_version: i64,
    pub producer: String,
    /// Every batch size run, reported batch first
    pub batch_sizes_checked: Vec<usize>,
    /// Largest deviation from the in-memory model, when parity was checked
    pub max_abs_diff: Option<f64>,
}

impl VerificationReport {
    /// Feature width the artifact accepts
    pub fn num_features(&self) -> usize {
        self.input_shape.get(1).copied().unwrap_or(0)
    }

    pub fn num_classes(&self) -> usize {
        self.output_shape.get(1).copied().unwrap_or(0)
    }
}

/// Verifier for exported artifacts
#[derive(Debug, Clone, Default)]
pub struct Verifier {
    config: VerifierConfig,
}

impl Verifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: VerifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Read and decode an artifact without checking it
    pub fn load(path: impl AsRef<Path>) -> Result<ModelProto> {
        let path = path.as_ref();
        let load_failure = |reason: String| ExportError::LoadFailure {
            path: path.to_path_buf(),
            reason,
        };

        let bytes = std::fs::read(path).map_err(|e| load_failure(e.to_string()))?;
        if bytes.is_empty() {
            return Err(load_failure("file is empty".to_string()));
        }
        tract_onnx::onnx()
            .proto_model_for_read(&mut bytes.as_slice())
            .map_err(|e| load_failure(format!("{:#}", e)))
    }

    /// Verify an artifact, optionally cross-checking the caller's feature count
    pub fn verify(
        &self,
        path: impl AsRef<Path>,
        expected_num_features: Option<usize>,
    ) -> Result<VerificationReport> {
        self.run(path.as_ref(), expected_num_features, None)
    }

    /// Verify an artifact and compare its output with the in-memory model
    pub fn verify_against(
        &self,
        path: impl AsRef<Path>,
        model: &dyn ProbabilisticClassifier,
        tolerance: f64,
    ) -> Result<VerificationReport> {
        self.run(path.as_ref(), Some(model.n_features()), Some((model, tolerance)))
    }

    fn run(
        &self,
        path: &Path,
        expected_num_features: Option<usize>,
        parity: Option<(&dyn ProbabilisticClassifier, f64)>,
    ) -> Result<VerificationReport> {
        self.config.validate()?;
        info!("Verifying ONNX model...");

        let model = Self::load(path)?;
        let metadata = check_model(&model)?;
        info!("✓ ONNX model is valid");

        let session = Session::new(&model)?;
        let input = single_input(&session)?;
        let output = session
            .outputs()
            .first()
            .ok_or_else(|| ExportError::SessionFailure("model has no outputs".to_string()))?;
        let width = feature_width(input, expected_num_features)?;
        if let Some(names) = &metadata.feature_names {
            if names.len() != width {
                return Err(ExportError::SchemaInvalid(format!(
                    "feature_names lists {} features but the input takes {}",
                    names.len(),
                    width
                )));
            }
        }
        debug!(
            input = %input.name,
            output = %output.name,
            width,
            "Discovered slots"
        );

        let batch_sizes = self.batch_plan(input, width)?;
        let mut rng = match self.config.seed {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };

        let mut first: Option<(Array2<f32>, Array2<f32>)> = None;
        for &batch in &batch_sizes {
            let features = Array2::from_shape_fn((batch, width), |_| rng.gen::<f32>());
            let result = self.infer(&session, input, &features)?;
            debug!(batch, "Batch ran");
            if first.is_none() {
                first = Some((features, result));
            }
        }
        let (features, result) = first
            .ok_or_else(|| ExportError::ConfigError("no batch sizes to run".to_string()))?;
        let sample = result
            .rows()
            .into_iter()
            .next()
            .map(|row| row.to_vec())
            .ok_or_else(|| ExportError::InferenceFailure("output has no rows".to_string()))?;
        info!("✓ Test inference successful");

        let row_sums: Vec<f32> = result.sum_axis(Axis(1)).to_vec();
        let tolerance = self.config.probability_tolerance as f32;
        if let Some(sum) = row_sums.iter().find(|s| (**s - 1.0).abs() > tolerance) {
            warn!(
                "Output rows do not sum to 1 (found {:.6}); '{}' may not hold probabilities",
                sum, output.name
            );
        }

        let max_abs_diff = match parity {
            Some((reference, tolerance)) => {
                Some(check_parity(reference, &features, &result, tolerance)?)
            }
            None => None,
        };

        let report = VerificationReport {
            path: path.to_path_buf(),
            input_name: input.name.clone(),
            output_name: output.name.clone(),
            declared_input_shape: input.shape.clone(),
            declared_output_shape: output.shape.clone(),
            input_shape: features.shape().to_vec(),
            output_shape: result.shape().to_vec(),
            sample,
            row_sums,
            feature_names: metadata.feature_names,
            opset_version: metadata.opset_version,
            producer: metadata.producer,
            batch_sizes_checked: batch_sizes,
            max_abs_diff,
        };

        info!("  Input shape: {:?}", report.input_shape);
        info!("  Output shape: {:?}", report.output_shape);
        info!("  Sample probabilities: {:?}", report.sample);
        Ok(report)
    }

    /// Batch sizes to run; a single-row batch always comes first unless the
    /// artifact pins another size
    fn batch_plan(&self, input: &TensorInfo, width: usize) -> Result<Vec<usize>> {
        let sizes = match input.shape[0].fixed() {
            Some(0) => {
                return Err(ExportError::SessionFailure(format!(
                    "input '{}' declares an empty batch dimension",
                    input.name
                )))
            }
            Some(fixed) if fixed > MAX_VERIFY_BATCH => {
                return Err(ExportError::SessionFailure(format!(
                    "input '{}' declares a batch of {}, above the limit of {}",
                    input.name, fixed, MAX_VERIFY_BATCH
                )))
            }
            Some(fixed) => {
                debug!("Batch dimension is fixed at {}, running that size only", fixed);
                vec![fixed]
            }
            None => {
                let mut sizes = vec![1];
                for &n in &self.config.batch_sizes {
                    if !sizes.contains(&n) {
                        sizes.push(n);
                    }
                }
                sizes
            }
        };

        for &batch in &sizes {
            let within = batch
                .checked_mul(width)
                .map_or(false, |elements| elements <= MAX_VERIFY_ELEMENTS);
            if !within {
                return Err(ExportError::SessionFailure(format!(
                    "a batch of {} rows by {} features exceeds the limit of {} elements",
                    batch, width, MAX_VERIFY_ELEMENTS
                )));
            }
        }
        Ok(sizes)
    }

    fn infer(
        &self,
        session: &Session,
        input: &TensorInfo,
        features: &Array2<f32>,
    ) -> Result<Array2<f32>> {
        let batch = features.nrows();
        let outputs = session.run(&[(input.name.as_str(), features.clone().into_dyn())])?;
        let output = outputs
            .into_iter()
            .next()
            .ok_or_else(|| ExportError::InferenceFailure("session produced no outputs".to_string()))?;

        let output = output.into_dimensionality::<Ix2>().map_err(|_| {
            ExportError::InferenceFailure("output is not a 2-D tensor".to_string())
        })?;
        if output.nrows() != batch {
            return Err(ExportError::InferenceFailure(format!(
                "fed {} rows but the output has {}",
                batch,
                output.nrows()
            )));
        }
        if output.iter().any(|v| !v.is_finite()) {
            return Err(ExportError::InferenceFailure(
                "output contains non-finite values".to_string(),
            ));
        }
        Ok(output)
    }
}

fn single_input(session: &Session) -> Result<&TensorInfo> {
    let input = match session.inputs() {
        [input] => input,
        [] => return Err(ExportError::SessionFailure("model has no inputs".to_string())),
        many => {
            return Err(ExportError::SessionFailure(format!(
                "expected a single input, found {}",
                many.len()
            )))
        }
    };
    if input.shape.len() != 2 {
        return Err(ExportError::SessionFailure(format!(
            "input '{}' has shape {}, expected (batch, features)",
            input.name,
            format_dims(&input.shape)
        )));
    }
    Ok(input)
}

/// Feature width from the declared shape, cross-checked with the caller's
fn feature_width(input: &TensorInfo, expected: Option<usize>) -> Result<usize> {
    let width = match (input.shape[1].fixed(), expected) {
        (Some(declared), Some(expected)) if declared != expected => {
            return Err(ExportError::FeatureCountMismatch {
                expected,
                actual: declared,
            })
        }
        (Some(declared), _) => declared,
        (None, Some(expected)) => expected,
        (None, None) => {
            return Err(ExportError::SessionFailure(format!(
                "input '{}' has no fixed feature dimension and no feature count was given",
                input.name
            )))
        }
    };
    if width == 0 {
        return Err(ExportError::EmptyFeatureSet);
    }
    Ok(width)
}

fn check_parity(
    model: &dyn ProbabilisticClassifier,
    features: &Array2<f32>,
    result: &Array2<f32>,
    tolerance: f64,
) -> Result<f64> {
    let expected = model.predict_proba(&features.mapv(f64::from))?;
    if expected.dim() != result.dim() {
        return Err(ExportError::InferenceFailure(format!(
            "model produces {:?} but the artifact produces {:?}",
            expected.dim(),
            result.dim()
        )));
    }
    let max_abs_diff = Zip::from(&expected)
        .and(result)
        .fold(0.0f64, |acc, &e, &r| acc.max((e - f64::from(r)).abs()));
    debug!(max_abs_diff, tolerance, "Parity check");
    if max_abs_diff > tolerance {
        return Err(ExportError::ParityMismatch {
            max_abs_diff,
            tolerance,
        });
    }
    Ok(max_abs_diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FEATURE_NAMES_KEY;
    use crate::export::proto::{tensor_shape_proto::dimension, type_proto};
    use crate::export::Converter;
    use crate::models::{LogisticRegression, SoftmaxRegression};
    use ndarray::{array, Array1};
    use prost::Message;
    use tempfile::TempDir;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{}", i)).collect()
    }

    fn exported(dir: &TempDir, n: usize) -> (PathBuf, LogisticRegression) {
        let model = LogisticRegression::new(Array1::from_elem(n, 0.25), -0.5);
        let path = dir.path().join("model.onnx");
        Converter::new().export(&model, &names(n), &path).unwrap();
        (path, model)
    }

    /// Export a logistic model whose input and output pin the batch dimension
    fn exported_with_fixed_batch(dir: &TempDir, n: usize, batch: i64) -> PathBuf {
        let model = LogisticRegression::new(Array1::from_elem(n, 0.25), -0.5);
        let mut proto = Converter::new().convert(&model, &names(n)).unwrap();
        let graph = proto.graph.as_mut().unwrap();
        for info in graph.input.iter_mut().chain(graph.output.iter_mut()) {
            if let Some(type_proto::Value::TensorType(tensor)) =
                info.r#type.as_mut().and_then(|t| t.value.as_mut())
            {
                let shape = tensor.shape.as_mut().unwrap();
                shape.dim[0].value = Some(dimension::Value::DimValue(batch));
            }
        }
        let path = dir.path().join(format!("batch_{}.onnx", batch));
        std::fs::write(&path, proto.encode_to_vec()).unwrap();
        path
    }

    #[test]
    fn test_verify_discovers_slots_and_width() {
        let dir = TempDir::new().unwrap();
        let (path, _) = exported(&dir, 16);

        let report = Verifier::with_config(VerifierConfig::new().with_seed(3))
            .verify(&path, None)
            .unwrap();
        assert_eq!(report.input_name, "input");
        assert_eq!(report.output_name, "probabilities");
        assert_eq!(report.input_shape, vec![1, 16]);
        assert_eq!(report.output_shape, vec![1, 2]);
        assert_eq!(report.declared_input_shape[0], Dim::Symbolic("N".to_string()));
        assert_eq!(report.feature_names, Some(names(16)));
        assert_eq!(report.opset_version, 12);
        assert!((report.row_sums[0] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_caller_width_mismatch() {
        let dir = TempDir::new().unwrap();
        let (path, _) = exported(&dir, 4);

        let result = Verifier::new().verify(&path, Some(5));
        assert!(matches!(
            result,
            Err(ExportError::FeatureCountMismatch { expected: 5, actual: 4 })
        ));
        assert!(Verifier::new().verify(&path, Some(4)).is_ok());
    }

    #[test]
    fn test_configured_batch_sizes_all_run() {
        let dir = TempDir::new().unwrap();
        let (path, _) = exported(&dir, 3);

        let config = VerifierConfig::new().with_seed(1).with_batch_sizes(vec![1, 5, 32]);
        let report = Verifier::with_config(config).verify(&path, None).unwrap();
        assert_eq!(report.batch_sizes_checked, vec![1, 5, 32]);
        assert_eq!(report.input_shape, vec![1, 3]);
    }

    #[test]
    fn test_single_row_batch_is_reported_first() {
        let dir = TempDir::new().unwrap();
        let (path, _) = exported(&dir, 3);

        let config = VerifierConfig::new().with_seed(1).with_batch_sizes(vec![4, 1]);
        let report = Verifier::with_config(config).verify(&path, None).unwrap();
        assert_eq!(report.input_shape, vec![1, 3]);
        assert_eq!(report.output_shape, vec![1, 2]);
        assert_eq!(report.row_sums.len(), 1);
        assert_eq!(report.batch_sizes_checked, vec![1, 4]);
    }

    #[test]
    fn test_fixed_batch_runs_declared_size_only() {
        let dir = TempDir::new().unwrap();
        let path = exported_with_fixed_batch(&dir, 4, 3);

        let config = VerifierConfig::new().with_seed(2).with_batch_sizes(vec![1, 8]);
        let report = Verifier::with_config(config).verify(&path, Some(4)).unwrap();
        assert_eq!(report.declared_input_shape[0], Dim::Fixed(3));
        assert_eq!(report.input_shape, vec![3, 4]);
        assert_eq!(report.output_shape, vec![3, 2]);
        assert_eq!(report.batch_sizes_checked, vec![3]);
        assert_eq!(report.sample.len(), 2);
    }

    #[test]
    fn test_fixed_empty_batch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = exported_with_fixed_batch(&dir, 4, 0);

        let err = Verifier::new().verify(&path, Some(4)).unwrap_err();
        assert!(
            matches!(err, ExportError::SessionFailure(_) | ExportError::SchemaInvalid(_)),
            "unexpected error: {:?}",
            err
        );
        assert!(!crate::pipeline::verify(&path, Some(4)));
    }

    #[test]
    fn test_fixed_batch_above_limit_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = exported_with_fixed_batch(&dir, 2, MAX_VERIFY_BATCH as i64 + 1);

        let err = Verifier::new().verify(&path, Some(2)).unwrap_err();
        assert!(
            matches!(err, ExportError::SessionFailure(ref msg) if msg.contains("limit")),
            "unexpected error: {:?}",
            err
        );
    }

    #[test]
    fn test_batch_plan_guards_element_count() {
        let input = TensorInfo {
            name: "input".to_string(),
            shape: vec![Dim::Symbolic("N".to_string()), Dim::Fixed(usize::MAX)],
        };
        let result = Verifier::new().batch_plan(&input, usize::MAX);
        assert!(matches!(result, Err(ExportError::SessionFailure(_))));

        let input = TensorInfo {
            name: "input".to_string(),
            shape: vec![Dim::Symbolic("N".to_string()), Dim::Fixed(3)],
        };
        let verifier = Verifier::with_config(VerifierConfig::new().with_batch_sizes(vec![8, 1, 8]));
        assert_eq!(verifier.batch_plan(&input, 3).unwrap(), vec![1, 8]);
    }

    #[test]
    fn test_feature_names_must_match_width() {
        let dir = TempDir::new().unwrap();
        let model = LogisticRegression::new(array![0.5, -0.5], 0.0);
        let mut proto = Converter::new().convert(&model, &names(2)).unwrap();
        for prop in proto.metadata_props.iter_mut() {
            if prop.key == FEATURE_NAMES_KEY {
                prop.value = r#"["a", "b", "c"]"#.to_string();
            }
        }
        let path = dir.path().join("model.onnx");
        std::fs::write(&path, proto.encode_to_vec()).unwrap();

        let err = Verifier::new().verify(&path, None).unwrap_err();
        assert!(
            matches!(err, ExportError::SchemaInvalid(ref msg) if msg.contains("lists 3 features")),
            "unexpected error: {:?}",
            err
        );
    }

    #[test]
    fn test_missing_and_empty_files_fail_to_load() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent.onnx");
        assert!(matches!(
            Verifier::new().verify(&missing, None),
            Err(ExportError::LoadFailure { .. })
        ));

        let empty = dir.path().join("empty.onnx");
        std::fs::write(&empty, b"").unwrap();
        assert!(matches!(
            Verifier::new().verify(&empty, None),
            Err(ExportError::LoadFailure { .. })
        ));
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.onnx");
        std::fs::write(&path, [0xffu8; 64]).unwrap();
        let err = Verifier::new().verify(&path, None).unwrap_err();
        assert!(matches!(
            err,
            ExportError::LoadFailure { .. } | ExportError::SchemaInvalid(_)
        ));
    }

    #[test]
    fn test_parity_with_in_memory_model() {
        let dir = TempDir::new().unwrap();
        let model = SoftmaxRegression::new(
            array![[0.5, -0.2, 0.1], [0.3, 0.8, -0.6]],
            array![0.1, 0.0, -0.1],
        )
        .unwrap();
        let path = dir.path().join("softmax.onnx");
        Converter::new().export(&model, &names(2), &path).unwrap();

        let report = Verifier::with_config(VerifierConfig::new().with_seed(9))
            .verify_against(&path, &model, 1e-4)
            .unwrap();
        assert!(report.max_abs_diff.unwrap() < 1e-4);
    }

    #[test]
    fn test_parity_mismatch_detected() {
        let dir = TempDir::new().unwrap();
        let (path, _) = exported(&dir, 2);
        let other = LogisticRegression::new(array![5.0, -5.0], 2.0);

        let result = Verifier::with_config(VerifierConfig::new().with_seed(9))
            .verify_against(&path, &other, 1e-4);
        assert!(matches!(result, Err(ExportError::ParityMismatch { .. })));
    }

    #[test]
    fn test_feature_width_rules() {
        let fixed = TensorInfo {
            name: "input".to_string(),
            shape: vec![Dim::Symbolic("N".to_string()), Dim::Fixed(7)],
        };
        assert_eq!(feature_width(&fixed, None).unwrap(), 7);
        assert_eq!(feature_width(&fixed, Some(7)).unwrap(), 7);

        let symbolic = TensorInfo {
            name: "input".to_string(),
            shape: vec![Dim::Symbolic("N".to_string()), Dim::Symbolic("F".to_string())],
        };
        assert!(matches!(
            feature_width(&symbolic, None),
            Err(ExportError::SessionFailure(_))
        ));
        assert_eq!(feature_width(&symbolic, Some(4)).unwrap(), 4);
        assert!(matches!(
            feature_width(&symbolic, Some(0)),
            Err(ExportError::EmptyFeatureSet)
        ));
    }
}
