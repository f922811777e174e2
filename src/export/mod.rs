//! Model export
//!
//! Converts trained classifiers into ONNX artifacts:
//! - [`proto`] - ONNX protobuf messages (prost)
//! - [`graph`] - graph builder
//! - [`Converter`] - lowering, encoding and atomic writes

mod converter;
pub mod graph;
pub mod proto;

pub use converter::{Converter, ExportReport};
pub use graph::{format_shape, AttributeValue, Dimension, GraphBuilder, NodeSpec};
pub use proto::ModelProto;
