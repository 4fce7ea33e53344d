// ONNX Runtime inference engine for exported `.onnx` deployment graphs

use anyhow::Context;
use ndarray::{ArrayD, IxDyn};
use ort::{
    environment::Environment,
    memory::MemoryInfo,
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use super::{InferenceEngine, InferenceOutputs};
use crate::artifacts::GraphArtifact;
use crate::errors::{OrtrainError, Result};
use crate::runtime::validate_output_names;

/// Input and output names a loaded graph declares
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSignature {
    input: String,
    outputs: Vec<String>,
}

impl GraphSignature {
    /// Pick the graph input, treating `expected_input` as a check
    ///
    /// A single-input graph is used as is (with a warning on a name mismatch);
    /// a multi-input graph must declare `expected_input`.
    pub fn resolve(inputs: Vec<String>, outputs: Vec<String>, expected_input: &str) -> Result<Self> {
        if outputs.is_empty() {
            return Err(OrtrainError::Config("inference graph declares no outputs".to_string()));
        }

        let input = match inputs.as_slice() {
            [] => {
                return Err(OrtrainError::Config("inference graph declares no inputs".to_string()));
            }
            [only] => {
                if only != expected_input {
                    warn!(
                        graph_input = %only,
                        configured = %expected_input,
                        "Configured input name differs from the graph's; using the graph's"
                    );
                }
                only.clone()
            }
            many => many
                .iter()
                .find(|name| *name == expected_input)
                .cloned()
                .ok_or_else(|| {
                    OrtrainError::Config(format!(
                        "graph has inputs [{}] but none is named '{}'",
                        many.join(", "),
                        expected_input
                    ))
                })?,
        };

        Ok(Self { input, outputs })
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// Fail with UnknownOutput unless every requested name is declared
    pub fn check_outputs(&self, requested: &[&str]) -> Result<()> {
        validate_output_names(requested, &self.outputs)
    }
}

/// Runs a single-input ONNX graph on the CPU execution provider
pub struct OrtInferenceEngine {
    session: Session,
    signature: GraphSignature,
}

impl OrtInferenceEngine {
    /// Create a session for `artifact`; names come from the graph itself
    pub fn load(artifact: &GraphArtifact, expected_input: &str) -> Result<Self> {
        let session = create_session(artifact.path()).map_err(|e| artifact.corrupt(format!("{:#}", e)))?;

        let inputs = session.inputs().iter().map(|i| i.name().to_string()).collect();
        let outputs = session.outputs().iter().map(|o| o.name().to_string()).collect();
        let signature = GraphSignature::resolve(inputs, outputs, expected_input)?;

        info!(
            path = ?artifact.path(),
            input = %signature.input(),
            outputs = ?signature.outputs(),
            "ONNX session created"
        );

        Ok(Self { session, signature })
    }

    pub fn signature(&self) -> &GraphSignature {
        &self.signature
    }

    fn run_with_binding(&mut self, input: &ArrayD<f32>, output_names: &[&str]) -> anyhow::Result<InferenceOutputs> {
        debug!(shape = ?input.shape(), "Preparing ONNX input tensor");

        let value = Value::from_array(input.clone())
            .context("Failed to create ONNX Value from input array")?
            .into_dyn();

        let mut binding = self.session.create_binding()?;
        binding.bind_input(self.signature.input(), &value)?;

        // Output shapes are unknown up front, so let ORT allocate them
        let mem_info = MemoryInfo::default();
        for name in output_names {
            binding.bind_output_to_device(*name, &mem_info)?;
        }

        let outputs = self.session.run_binding(&binding)?;

        let mut result = InferenceOutputs::new();
        for name in output_names {
            let tensor = outputs
                .get(*name)
                .ok_or_else(|| anyhow::anyhow!("Missing output: {}", name))?;
            let (shape, data) = tensor
                .try_extract_tensor::<f32>()
                .with_context(|| format!("Failed to extract f32 tensor from output '{}'", name))?;

            let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
            let array = ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())
                .with_context(|| format!("Output '{}' has inconsistent shape {:?}", name, dims))?;
            result.push(*name, array);
        }

        Ok(result)
    }
}

impl InferenceEngine for OrtInferenceEngine {
    fn output_names(&self) -> &[String] {
        self.signature.outputs()
    }

    fn run(&mut self, input: &ArrayD<f32>, output_names: &[&str]) -> Result<InferenceOutputs> {
        self.signature.check_outputs(output_names)?;
        self.run_with_binding(input, output_names)
            .map_err(|e| OrtrainError::runtime(format!("{:#}", e)))
    }
}

/// ONNX Runtime allows one environment per process
fn environment() -> anyhow::Result<&'static Environment> {
    static ENVIRONMENT: OnceLock<std::result::Result<Environment, String>> = OnceLock::new();
    ENVIRONMENT
        .get_or_init(|| ort::init().with_name("ortrain").build().map_err(|e| e.to_string()))
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to initialize ONNX Runtime: {}", e))
}

/// Create ONNX Runtime session for an inference graph
fn create_session(model_path: &Path) -> anyhow::Result<Session> {
    let session = Session::builder(environment()?)?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(ort::Error::<()>::from)?
        .with_intra_threads(1)
        .map_err(ort::Error::<()>::from)?
        .commit_from_file(model_path)
        .context("Failed to create ONNX session")?;

    Ok(session)
}
