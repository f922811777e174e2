//! ONNX graph assembly
//!
//! [`GraphBuilder`] collects FLOAT slots, constants and nodes while a model is
//! lowered, then emits a [`GraphProto`]. Every value is FLOAT; node
//! attributes are kept sorted so encoding is byte-stable.

use std::collections::BTreeMap;
use std::fmt;

use super::proto::{
    attribute_type, tensor_shape_proto, type_proto, AttributeProto, GraphProto, NodeProto,
    TensorProto, TensorShapeProto, TypeProto, ValueInfoProto, DATA_TYPE_FLOAT,
};

/// Extent of one axis of a declared slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dimension {
    Fixed(usize),
    /// Named symbolic extent, bound at run time
    Symbolic(String),
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Fixed(n) => write!(f, "{}", n),
            Dimension::Symbolic(s) => f.write_str(s),
        }
    }
}

/// Format a shape as `(N, 16)`
pub fn format_shape(dims: &[Dimension]) -> String {
    let parts: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
    format!("({})", parts.join(", "))
}

fn value_info(name: &str, shape: &[Dimension]) -> ValueInfoProto {
    let dim = shape
        .iter()
        .map(|d| tensor_shape_proto::Dimension {
            denotation: String::new(),
            value: Some(match d {
                Dimension::Fixed(n) => tensor_shape_proto::dimension::Value::DimValue(*n as i64),
                Dimension::Symbolic(s) => {
                    tensor_shape_proto::dimension::Value::DimParam(s.clone())
                }
            }),
        })
        .collect();
    ValueInfoProto {
        name: name.to_string(),
        r#type: Some(TypeProto {
            denotation: String::new(),
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type: DATA_TYPE_FLOAT,
                shape: Some(TensorShapeProto { dim }),
            })),
        }),
        doc_string: String::new(),
    }
}

/// Scalar attribute value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttributeValue {
    Int(i64),
    Float(f32),
}

/// One operator application
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub name: String,
    pub op_type: String,
    pub inputs: Vec<String>,
    pub output: String,
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl NodeSpec {
    pub fn new(name: impl Into<String>, op_type: &str, inputs: &[&str], output: &str) -> Self {
        Self {
            name: name.into(),
            op_type: op_type.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            output: output.to_string(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn attr(mut self, key: &str, value: AttributeValue) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    fn encode(&self) -> NodeProto {
        let attribute = self
            .attributes
            .iter()
            .map(|(name, value)| {
                let mut attr = AttributeProto {
                    name: name.clone(),
                    ..Default::default()
                };
                match *value {
                    AttributeValue::Int(i) => {
                        attr.i = i;
                        attr.r#type = attribute_type::INT;
                    }
                    AttributeValue::Float(f) => {
                        attr.f = f;
                        attr.r#type = attribute_type::FLOAT;
                    }
                }
                attr
            })
            .collect();
        NodeProto {
            input: self.inputs.clone(),
            output: vec![self.output.clone()],
            name: self.name.clone(),
            op_type: self.op_type.clone(),
            attribute,
            doc_string: String::new(),
            domain: String::new(),
        }
    }
}

/// Accumulates a graph in execution order
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    name: String,
    inputs: Vec<ValueInfoProto>,
    outputs: Vec<ValueInfoProto>,
    constants: Vec<TensorProto>,
    nodes: Vec<NodeSpec>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn input(&mut self, name: &str, shape: &[Dimension]) -> &mut Self {
        self.inputs.push(value_info(name, shape));
        self
    }

    pub fn output(&mut self, name: &str, shape: &[Dimension]) -> &mut Self {
        self.outputs.push(value_info(name, shape));
        self
    }

    /// Register a FLOAT constant (row-major `data`) and return its name
    pub fn constant(&mut self, name: impl Into<String>, dims: &[usize], data: Vec<f32>) -> String {
        let name = name.into();
        self.constants.push(TensorProto {
            dims: dims.iter().map(|&d| d as i64).collect(),
            data_type: DATA_TYPE_FLOAT,
            float_data: data,
            name: name.clone(),
            ..Default::default()
        });
        name
    }

    pub fn node(&mut self, node: NodeSpec) -> &mut Self {
        self.nodes.push(node);
        self
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn constant_count(&self) -> usize {
        self.constants.len()
    }

    pub fn build(&self) -> GraphProto {
        GraphProto {
            node: self.nodes.iter().map(NodeSpec::encode).collect(),
            name: self.name.clone(),
            initializer: self.constants.clone(),
            doc_string: String::new(),
            input: self.inputs.clone(),
            output: self.outputs.clone(),
            value_info: Vec::new(),
        }
    }
}
