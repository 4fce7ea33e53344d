// Training session: one owner for runtime handles and checkpoint state

use ndarray::ArrayD;
use std::path::Path;
use tracing::info;

use super::checkpoint::{CheckpointManager, CheckpointSnapshot, SnapshotMetrics};
use super::driver::{EpochReport, TrainingLoop};
use super::evaluation::{EvalReport, EvaluationLoop};
use crate::artifacts::{ArtifactSet, GraphArtifact};
use crate::data::BatchSource;
use crate::errors::Result;
use crate::inference::{self, InferenceEngine, Prediction};
use crate::runtime::{CheckpointState, TrainableModule, TrainingRuntime};

/// Loaded artifacts plus the loops that drive them
///
/// The checkpoint is loaded before anything else and stays owned by the
/// session; module and optimizer only ever borrow it.
pub struct TrainingSession<R: TrainingRuntime> {
    runtime: R,
    artifacts: ArtifactSet,
    checkpoint: R::Checkpoint,
    module: R::Module,
    optimizer: R::Optimizer,
    training: TrainingLoop,
    evaluation: EvaluationLoop,
}

impl<R: TrainingRuntime> TrainingSession<R> {
    /// Load checkpoint, module and optimizer, in that order
    pub fn open(runtime: R, artifacts: ArtifactSet) -> Result<Self> {
        let checkpoint = runtime.load_checkpoint(&artifacts.checkpoint)?;
        let module = runtime.load_module(&artifacts.training, &checkpoint, artifacts.eval.as_ref())?;
        let optimizer = runtime.load_optimizer(&artifacts.optimizer, &module)?;

        info!(
            runtime = runtime.name(),
            checkpoint_version = checkpoint.version(),
            input_shape = ?module.input_shape(),
            "Training session ready"
        );

        Ok(Self {
            runtime,
            artifacts,
            checkpoint,
            module,
            optimizer,
            training: TrainingLoop::new(),
            evaluation: EvaluationLoop::new(),
        })
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn artifacts(&self) -> &ArtifactSet {
        &self.artifacts
    }

    pub fn checkpoint(&self) -> &R::Checkpoint {
        &self.checkpoint
    }

    pub fn module(&self) -> &R::Module {
        &self.module
    }

    /// Completed training epochs
    pub fn epochs_completed(&self) -> usize {
        self.training.epochs_completed()
    }

    pub fn train_epoch<S: BatchSource + ?Sized>(&mut self, source: &mut S) -> Result<EpochReport> {
        self.train_epoch_with(source, |_, _| {})
    }

    /// Train one epoch, reporting each batch's loss to `on_batch`
    pub fn train_epoch_with<S, F>(&mut self, source: &mut S, on_batch: F) -> Result<EpochReport>
    where
        S: BatchSource + ?Sized,
        F: FnMut(usize, f32),
    {
        self.training.run_epoch_with(
            &mut self.module,
            &mut self.optimizer,
            &mut self.checkpoint,
            source,
            on_batch,
        )
    }

    pub fn evaluate<S: BatchSource + ?Sized>(&mut self, source: &mut S) -> Result<EvalReport> {
        self.evaluation.run(&mut self.module, &self.checkpoint, source)
    }

    /// Write a deployment graph of the current state
    pub fn export_inference(&self, path: &Path, output_names: &[&str]) -> Result<GraphArtifact> {
        let artifact = self
            .module
            .export_inference_graph(&self.checkpoint, path, output_names)?;
        info!(path = ?artifact.path(), outputs = ?output_names, "Exported inference graph");
        Ok(artifact)
    }

    /// Export to `path`, open it with `open_engine` and run `input` once
    pub fn export_and_run<E, F>(
        &self,
        path: &Path,
        output_names: &[&str],
        open_engine: F,
        input: &ArrayD<f32>,
    ) -> Result<Prediction>
    where
        E: InferenceEngine,
        F: FnOnce(&GraphArtifact) -> Result<E>,
    {
        inference::export_and_run(&self.module, &self.checkpoint, path, output_names, open_engine, input)
    }

    /// Persist the checkpoint state to `path`
    pub fn save_checkpoint(&self, path: &Path) -> Result<()> {
        self.checkpoint.save(path)?;
        info!(path = ?path, "Saved checkpoint");
        Ok(())
    }

    /// Persist the checkpoint state as a managed snapshot
    pub fn snapshot(&self, manager: &CheckpointManager, metrics: SnapshotMetrics) -> Result<CheckpointSnapshot> {
        manager.create_snapshot(&self.checkpoint, self.epochs_completed(), metrics)
    }
}
