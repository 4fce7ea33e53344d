// Inference export and run
//
// Export a deployment graph from the trained state, open an engine on it and
// run a single forward pass.

pub mod onnx;

use ndarray::{ArrayD, ArrayView2, Axis};
use std::path::Path;
use tracing::info;

use crate::artifacts::{ArtifactKind, GraphArtifact};
use crate::errors::{OrtrainError, Result};
use crate::runtime::{reference, ReferenceInferenceEngine, TrainableModule};

pub use onnx::OrtInferenceEngine;

/// Named output tensors of one inference run, in request order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InferenceOutputs {
    values: Vec<(String, ArrayD<f32>)>,
}

impl InferenceOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: ArrayD<f32>) {
        self.values.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_inner(self) -> Vec<(String, ArrayD<f32>)> {
        self.values
    }
}

/// Something that runs a deployment graph
pub trait InferenceEngine {
    /// Output names the loaded graph declares
    fn output_names(&self) -> &[String];

    /// One forward pass; unknown output names are rejected
    fn run(&mut self, input: &ArrayD<f32>, output_names: &[&str]) -> Result<InferenceOutputs>;
}

impl<E: InferenceEngine + ?Sized> InferenceEngine for Box<E> {
    fn output_names(&self) -> &[String] {
        (**self).output_names()
    }

    fn run(&mut self, input: &ArrayD<f32>, output_names: &[&str]) -> Result<InferenceOutputs> {
        (**self).run(input, output_names)
    }
}

/// Index of the largest value in each row (first one wins on ties)
pub fn argmax(rows: ArrayView2<'_, f32>) -> Vec<usize> {
    rows.axis_iter(Axis(0))
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |(best, best_val), (i, &v)| {
                    if v > best_val {
                        (i, v)
                    } else {
                        (best, best_val)
                    }
                })
                .0
        })
        .collect()
}

/// Argmax over the last axis of an output tensor of any rank
pub fn argmax_output(output: &ArrayD<f32>) -> Result<Vec<usize>> {
    let classes = output.shape().last().copied().unwrap_or(0);
    if classes == 0 {
        return Err(OrtrainError::runtime(format!(
            "cannot take argmax of output with shape {:?}",
            output.shape()
        )));
    }
    let rows = output.len() / classes;
    let view = output
        .view()
        .into_shape_with_order((rows, classes))
        .map_err(OrtrainError::runtime)?;
    Ok(argmax(view))
}

/// Outputs of one run plus the label index per input row
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub outputs: InferenceOutputs,
    /// Argmax of the first requested output
    pub labels: Vec<usize>,
}

/// Run one forward pass and derive label indices from the first output
pub fn predict<E: InferenceEngine + ?Sized>(
    engine: &mut E,
    input: &ArrayD<f32>,
    output_names: &[&str],
) -> Result<Prediction> {
    let first = output_names
        .first()
        .ok_or_else(|| OrtrainError::Config("at least one output name is required".to_string()))?;

    let outputs = engine.run(input, output_names)?;
    let labels = match outputs.get(first) {
        Some(value) => argmax_output(value)?,
        None => {
            return Err(OrtrainError::UnknownOutput {
                name: first.to_string(),
                available: outputs.names().map(str::to_string).collect(),
            })
        }
    };

    Ok(Prediction { outputs, labels })
}

/// Export the current state as an inference graph, open it and run `input`
pub fn export_and_run<M, E, F>(
    module: &M,
    checkpoint: &M::Checkpoint,
    path: &Path,
    output_names: &[&str],
    open_engine: F,
    input: &ArrayD<f32>,
) -> Result<Prediction>
where
    M: TrainableModule,
    E: InferenceEngine,
    F: FnOnce(&GraphArtifact) -> Result<E>,
{
    let artifact = module.export_inference_graph(checkpoint, path, output_names)?;
    info!(path = ?artifact.path(), outputs = ?output_names, "Exported inference graph");

    let mut engine = open_engine(&artifact)?;
    predict(&mut engine, input, output_names)
}

/// Open an engine for whatever graph format is at `path`
///
/// Reference descriptors run in-process; anything else goes to ONNX Runtime.
/// Output names always come from the loaded graph; `input_name` is checked
/// against the graph's declared inputs.
pub fn open_engine(path: &Path, input_name: &str) -> Result<Box<dyn InferenceEngine>> {
    let artifact = GraphArtifact::open(path, ArtifactKind::Inference)?;
    let bytes = artifact.read_bytes()?;

    if reference::is_reference_artifact(&bytes) {
        info!(path = ?path, "Opening reference inference engine");
        Ok(Box::new(ReferenceInferenceEngine::load(&artifact)?))
    } else {
        info!(path = ?path, "Opening ONNX Runtime inference engine");
        Ok(Box::new(OrtInferenceEngine::load(&artifact, input_name)?))
    }
}
