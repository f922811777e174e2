//! tract-onnx session
//!
//! Builds an optimized tract plan from a decoded artifact. Slot names and
//! shapes are read from the typed model's facts, so symbolic dimensions keep
//! the names the artifact declares.

use ndarray::{ArrayD, IxDyn};
use std::fmt;
use tract_onnx::pb::ModelProto;
use tract_onnx::prelude::{
    tvec, DatumType, Framework, InferenceModelExt, OutletId, TDim, TVec, TValue, Tensor,
    TractResult, TypedModel, TypedSimplePlan,
};

use crate::error::{ExportError, Result};

/// A tensor dimension as the model sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dim {
    Fixed(usize),
    Symbolic(String),
}

impl Dim {
    pub fn fixed(&self) -> Option<usize> {
        match self {
            Dim::Fixed(n) => Some(*n),
            Dim::Symbolic(_) => None,
        }
    }

    /// Whether a concrete extent satisfies this dimension
    pub fn accepts(&self, n: usize) -> bool {
        self.fixed().map_or(true, |f| f == n)
    }

    fn from_tdim(dim: &TDim) -> Self {
        match dim.to_i64() {
            Ok(n) if n >= 0 => Dim::Fixed(n as usize),
            _ => Dim::Symbolic(dim.to_string()),
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(n) => write!(f, "{}", n),
            Dim::Symbolic(s) => write!(f, "{}", s),
        }
    }
}

/// Format a shape as `(N, 16)`
pub fn format_dims(dims: &[Dim]) -> String {
    let parts: Vec<String> = dims.iter().map(|d| d.to_string()).collect();
    format!("({})", parts.join(", "))
}

/// Name and shape of a graph input or output
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    pub name: String,
    pub shape: Vec<Dim>,
}

impl TensorInfo {
    fn from_outlet(model: &TypedModel, outlet: OutletId) -> Result<Self> {
        let name = model
            .outlet_label(outlet)
            .map(str::to_string)
            .unwrap_or_else(|| model.node(outlet.node).name.clone());
        let fact = model
            .outlet_fact(outlet)
            .map_err(|e| ExportError::SessionFailure(format!("'{}': {:#}", name, e)))?;
        if fact.datum_type != DatumType::F32 {
            return Err(ExportError::SessionFailure(format!(
                "'{}' holds {:?}, expected f32",
                name, fact.datum_type
            )));
        }
        Ok(Self {
            shape: fact.shape.iter().map(Dim::from_tdim).collect(),
            name,
        })
    }
}

/// An artifact loaded into tract and ready to run
#[derive(Debug)]
pub struct Session {
    inputs: Vec<TensorInfo>,
    outputs: Vec<TensorInfo>,
    plan: TypedSimplePlan<TypedModel>,
}

impl Session {
    /// Translate, type and optimize a decoded model
    pub fn new(proto: &ModelProto) -> Result<Self> {
        let model = tract_onnx::onnx()
            .model_for_proto_model(proto)
            .map_err(|e| ExportError::SchemaInvalid(format!("{:#}", e)))?;
        let typed = model
            .into_typed()
            .map_err(|e| ExportError::SessionFailure(format!("{:#}", e)))?;

        let slots = |outlets: TractResult<&[OutletId]>| {
            outlets
                .map_err(|e| ExportError::SessionFailure(format!("{:#}", e)))?
                .iter()
                .map(|&outlet| TensorInfo::from_outlet(&typed, outlet))
                .collect::<Result<Vec<_>>>()
        };
        let inputs = slots(typed.input_outlets())?;
        let outputs = slots(typed.output_outlets())?;
        if let Some(info) = inputs.iter().find(|i| i.shape.contains(&Dim::Fixed(0))) {
            return Err(ExportError::SessionFailure(format!(
                "input '{}' declares an empty dimension {}",
                info.name,
                format_dims(&info.shape)
            )));
        }

        let plan = typed
            .into_optimized()
            .and_then(|optimized| optimized.into_runnable())
            .map_err(|e| ExportError::SessionFailure(format!("{:#}", e)))?;

        Ok(Self {
            inputs,
            outputs,
            plan,
        })
    }

    pub fn inputs(&self) -> &[TensorInfo] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorInfo] {
        &self.outputs
    }

    /// Run the plan, returning outputs in declared order
    pub fn run(&self, feeds: &[(&str, ArrayD<f32>)]) -> Result<Vec<ArrayD<f32>>> {
        if let Some((name, _)) = feeds
            .iter()
            .find(|(name, _)| !self.inputs.iter().any(|i| i.name == *name))
        {
            return Err(ExportError::InferenceFailure(format!("unknown input '{}'", name)));
        }

        let mut values: TVec<TValue> = tvec!();
        for info in &self.inputs {
            let (_, array) = feeds
                .iter()
                .find(|(name, _)| *name == info.name)
                .ok_or_else(|| {
                    ExportError::InferenceFailure(format!("missing input '{}'", info.name))
                })?;
            check_shape(&info.name, &info.shape, array.shape())?;
            let data: Vec<f32> = array.iter().copied().collect();
            let tensor = Tensor::from_shape(array.shape(), &data)
                .map_err(|e| ExportError::InferenceFailure(format!("{:#}", e)))?;
            values.push(tensor.into());
        }

        let results = self
            .plan
            .run(values)
            .map_err(|e| ExportError::InferenceFailure(format!("{:#}", e)))?;

        self.outputs
            .iter()
            .zip(results.iter())
            .map(|(info, value)| {
                let data = value.as_slice::<f32>().map_err(|e| {
                    ExportError::InferenceFailure(format!("output '{}': {:#}", info.name, e))
                })?;
                let array = ArrayD::from_shape_vec(IxDyn(value.shape()), data.to_vec())?;
                check_shape(&info.name, &info.shape, array.shape())?;
                Ok(array)
            })
            .collect()
    }
}

fn check_shape(name: &str, declared: &[Dim], actual: &[usize]) -> Result<()> {
    let ok = declared.len() == actual.len()
        && declared.iter().zip(actual).all(|(d, &n)| d.accepts(n));
    if !ok {
        return Err(ExportError::InferenceFailure(format!(
            "'{}' has shape {:?}, declared {}",
            name,
            actual,
            format_dims(declared)
        )));
    }
    Ok(())
}
