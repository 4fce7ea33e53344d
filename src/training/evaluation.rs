// Evaluation loop driver: forward-only passes, loss and accuracy

use serde::Serialize;
use std::time::Instant;
use tracing::{debug, info};

use super::accumulator::{AccuracyMetric, LossAccumulator};
use crate::data::BatchSource;
use crate::errors::Result;
use crate::inference::argmax;
use crate::runtime::TrainableModule;

/// Summary of one evaluation pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvalReport {
    /// 1-based evaluation number
    pub epoch: usize,
    pub batches: usize,
    pub losses: Vec<f32>,
    pub mean_loss: Option<f64>,
    /// Fraction of correctly predicted labels
    pub accuracy: Option<f64>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Default)]
pub struct EvaluationLoop {
    epoch: usize,
    losses: LossAccumulator,
    accuracy: AccuracyMetric,
}

impl EvaluationLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate every batch of `source` with the module in eval mode
    ///
    /// Never steps the optimizer or touches gradients, so the checkpoint is
    /// only borrowed immutably.
    pub fn run<M, S>(
        &mut self,
        module: &mut M,
        checkpoint: &M::Checkpoint,
        source: &mut S,
    ) -> Result<EvalReport>
    where
        M: TrainableModule,
        S: BatchSource + ?Sized,
    {
        let start_time = Instant::now();
        let epoch = self.epoch + 1;

        self.losses.reset();
        self.accuracy.reset();
        source.reset();
        module.eval_mode();

        while let Some(batch) = source.next_batch()? {
            let output = module.run(checkpoint, &batch)?;

            let predicted = argmax(output.outputs.view());
            let actual: Vec<i64> = batch.labels.iter().copied().collect();
            self.accuracy.update(&predicted, &actual);
            self.losses.push(output.loss);

            debug!(epoch = epoch, batch = self.losses.len(), loss = output.loss, "Evaluation step");
        }

        self.epoch = epoch;
        let report = EvalReport {
            epoch,
            batches: self.losses.len(),
            mean_loss: self.losses.mean(),
            losses: self.losses.take(),
            accuracy: self.accuracy.finalize(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
        };

        info!(
            epoch = report.epoch,
            batches = report.batches,
            mean_loss = ?report.mean_loss,
            accuracy = ?report.accuracy,
            "Evaluation complete"
        );

        Ok(report)
    }
}
