//! Artifact-level checks
//!
//! Validates what the runtime does not: IR and opset ranges, presence of a
//! graph, and the metadata the exporter records. Graph structure and operator
//! schemas are left to tract when the session is built.

use std::collections::HashSet;
use std::ops::RangeInclusive;

use tract_onnx::pb::ModelProto;

use crate::config::{FEATURE_NAMES_KEY, MODEL_TYPE_KEY};
use crate::error::{ExportError, Result};

/// IR versions the checker accepts
pub const SUPPORTED_IR_VERSIONS: RangeInclusive<i64> = 3..=10;

/// Default-domain opsets the checker accepts
pub const SUPPORTED_OPSETS: RangeInclusive<i64> = 7..=21;

/// Facts about an artifact read from its header and metadata
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArtifactMetadata {
    pub ir_version: i64,
    pub opset_version: i64,
    /// `producer_name producer_version`, trimmed
    pub producer: String,
    /// Column order recorded at export time
    pub feature_names: Option<Vec<String>>,
    pub model_type: Option<String>,
}

fn invalid(msg: impl Into<String>) -> ExportError {
    ExportError::SchemaInvalid(msg.into())
}

fn is_default_domain(domain: &str) -> bool {
    domain.is_empty() || domain == "ai.onnx"
}

/// Check a decoded model's header and metadata
pub fn check_model(model: &ModelProto) -> Result<ArtifactMetadata> {
    if !SUPPORTED_IR_VERSIONS.contains(&model.ir_version) {
        return Err(invalid(format!("unsupported IR version {}", model.ir_version)));
    }

    let opset = model
        .opset_import
        .iter()
        .find(|o| is_default_domain(&o.domain))
        .ok_or_else(|| invalid("no opset import for the default domain"))?;
    if !SUPPORTED_OPSETS.contains(&opset.version) {
        return Err(invalid(format!("unsupported opset version {}", opset.version)));
    }

    let graph = model.graph.as_ref().ok_or_else(|| invalid("model has no graph"))?;
    if graph.input.is_empty() {
        return Err(invalid("graph declares no inputs"));
    }
    if graph.output.is_empty() {
        return Err(invalid("graph declares no outputs"));
    }

    let mut keys = HashSet::new();
    for prop in &model.metadata_props {
        if !keys.insert(prop.key.as_str()) {
            return Err(invalid(format!("duplicate metadata key '{}'", prop.key)));
        }
    }
    let lookup = |key: &str| {
        model
            .metadata_props
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    };

    let feature_names = lookup(FEATURE_NAMES_KEY)
        .map(|raw| {
            serde_json::from_str::<Vec<String>>(raw).map_err(|e| {
                invalid(format!("feature_names metadata is not a JSON string list: {}", e))
            })
        })
        .transpose()?;

    Ok(ArtifactMetadata {
        ir_version: model.ir_version,
        opset_version: opset.version,
        producer: format!("{} {}", model.producer_name, model.producer_version)
            .trim()
            .to_string(),
        feature_names,
        model_type: lookup(MODEL_TYPE_KEY).map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::Converter;
    use crate::models::LogisticRegression;
    use ndarray::array;
    use prost::Message;
    use tract_onnx::pb::StringStringEntryProto;
    use tract_onnx::prelude::Framework;

    fn exported() -> ModelProto {
        let model = LogisticRegression::new(array![0.5, -0.5], 0.1);
        let names = vec!["a".to_string(), "b".to_string()];
        let bytes = Converter::new().convert(&model, &names).unwrap().encode_to_vec();
        tract_onnx::onnx()
            .proto_model_for_read(&mut bytes.as_slice())
            .unwrap()
    }

    fn assert_invalid(model: &ModelProto, fragment: &str) {
        match check_model(model) {
            Err(ExportError::SchemaInvalid(msg)) => {
                assert!(msg.contains(fragment), "message '{}' lacks '{}'", msg, fragment)
            }
            other => panic!("expected SchemaInvalid containing '{}', got {:?}", fragment, other),
        }
    }

    #[test]
    fn test_exported_model_metadata() {
        let meta = check_model(&exported()).unwrap();
        assert_eq!(meta.ir_version, 7);
        assert_eq!(meta.opset_version, 12);
        assert_eq!(meta.feature_names, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(meta.model_type.as_deref(), Some("LogisticRegression"));
        assert!(meta.producer.starts_with("Kolosal AutoML"));
    }

    #[test]
    fn test_missing_graph() {
        let mut model = exported();
        model.graph = None;
        assert_invalid(&model, "no graph");
    }

    #[test]
    fn test_opset_bounds() {
        let mut model = exported();
        model.opset_import.clear();
        assert_invalid(&model, "no opset import");

        let mut model = exported();
        model.opset_import[0].version = 99;
        assert_invalid(&model, "unsupported opset");
    }

    #[test]
    fn test_ir_version_bounds() {
        let mut model = exported();
        model.ir_version = 2;
        assert_invalid(&model, "unsupported IR version 2");
    }

    #[test]
    fn test_graph_without_outputs() {
        let mut model = exported();
        if let Some(graph) = model.graph.as_mut() {
            graph.output.clear();
        }
        assert_invalid(&model, "no outputs");
    }

    #[test]
    fn test_duplicate_metadata_key() {
        let mut model = exported();
        model.metadata_props.push(StringStringEntryProto {
            key: MODEL_TYPE_KEY.to_string(),
            value: "Other".to_string(),
        });
        assert_invalid(&model, "duplicate metadata key 'model_type'");
    }

    #[test]
    fn test_malformed_feature_names() {
        let mut model = exported();
        for prop in model.metadata_props.iter_mut() {
            if prop.key == FEATURE_NAMES_KEY {
                prop.value = "a,b".to_string();
            }
        }
        assert_invalid(&model, "not a JSON string list");

        model.metadata_props.retain(|p| p.key != FEATURE_NAMES_KEY);
        assert_eq!(check_model(&model).unwrap().feature_names, None);
    }
}
