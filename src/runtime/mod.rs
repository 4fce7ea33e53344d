// Training runtime capability interface
//
// The orchestration shell never looks inside graphs, gradients or checkpoint
// blobs. Everything it needs from a training runtime is expressed by the
// traits below; `reference` provides an in-process implementation.

pub mod reference;

use ndarray::Array2;
use std::path::Path;

use crate::artifacts::GraphArtifact;
use crate::data::Batch;
use crate::errors::{OrtrainError, Result};

pub use reference::{
    generate_artifacts, ReferenceCheckpoint, ReferenceInferenceEngine, ReferenceModelSpec,
    ReferenceModule, ReferenceOptimizer, ReferenceRuntime,
};

/// Whether `run` also computes gradients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// Result of one forward (and, in train mode, backward) pass
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    /// Mean loss over the batch
    pub loss: f32,
    /// Model outputs, shape `[batch, classes]`
    pub outputs: Array2<f32>,
}

/// Parameter state owned by the caller and borrowed by module and optimizer
pub trait CheckpointState {
    /// Format version of the persisted blob
    fn version(&self) -> u32;

    /// Persist the current parameter values
    fn save(&self, path: &Path) -> Result<()>;
}

/// A loaded training (and optional eval) graph
pub trait TrainableModule {
    type Checkpoint: CheckpointState;

    fn train_mode(&mut self);
    fn eval_mode(&mut self);
    fn mode(&self) -> Mode;

    /// Declared per-sample input shape of the training graph
    fn input_shape(&self) -> &[usize];

    /// Output names the module can export
    fn output_names(&self) -> &[String];

    /// Forward pass; also accumulates gradients in train mode
    fn run(&mut self, checkpoint: &Self::Checkpoint, batch: &Batch) -> Result<StepOutput>;

    /// Clear accumulated gradients
    fn reset_gradients(&mut self) -> Result<()>;

    /// Write a deployment graph producing `output_names` from the current state
    fn export_inference_graph(
        &self,
        checkpoint: &Self::Checkpoint,
        path: &Path,
        output_names: &[&str],
    ) -> Result<GraphArtifact>;
}

/// A loaded optimizer graph bound to one module
pub trait Optimizer {
    type Module: TrainableModule;

    /// Apply the module's accumulated gradients to the checkpoint
    fn step(
        &mut self,
        checkpoint: &mut <Self::Module as TrainableModule>::Checkpoint,
        module: &Self::Module,
    ) -> Result<()>;

    fn learning_rate(&self) -> f32;
}

/// Entry points of a training runtime
pub trait TrainingRuntime {
    type Checkpoint: CheckpointState;
    type Module: TrainableModule<Checkpoint = Self::Checkpoint>;
    type Optimizer: Optimizer<Module = Self::Module>;

    /// Get short name for logging
    fn name(&self) -> &str;

    /// Fails with an artifact error on a missing or corrupt checkpoint
    fn load_checkpoint(&self, artifact: &GraphArtifact) -> Result<Self::Checkpoint>;

    fn load_module(
        &self,
        training: &GraphArtifact,
        checkpoint: &Self::Checkpoint,
        eval: Option<&GraphArtifact>,
    ) -> Result<Self::Module>;

    fn load_optimizer(&self, optimizer: &GraphArtifact, module: &Self::Module)
        -> Result<Self::Optimizer>;
}

/// Fail with UnknownOutput for the first requested name not in `declared`
pub fn validate_output_names<S: AsRef<str>>(requested: &[S], declared: &[String]) -> Result<()> {
    for name in requested {
        let name = name.as_ref();
        if !declared.iter().any(|d| d == name) {
            return Err(OrtrainError::UnknownOutput {
                name: name.to_string(),
                available: declared.to_vec(),
            });
        }
    }
    Ok(())
}
