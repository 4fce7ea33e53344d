// Training loop driver
//
// Per batch: forward+backward, optimizer step, gradient reset, record loss.
// The loop state is tracked explicitly so an out-of-order call is an error
// instead of a silently wrong update.

use serde::Serialize;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::accumulator::LossAccumulator;
use crate::data::BatchSource;
use crate::errors::{OrtrainError, Result};
use crate::runtime::{Optimizer, TrainableModule};

/// Where the training loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Loading,
    Forward,
    OptimizerStep,
    ResetGrad,
    EpochComplete,
}

impl LoopState {
    pub fn name(&self) -> &'static str {
        match self {
            LoopState::Idle => "Idle",
            LoopState::Loading => "Loading",
            LoopState::Forward => "Forward",
            LoopState::OptimizerStep => "OptimizerStep",
            LoopState::ResetGrad => "ResetGrad",
            LoopState::EpochComplete => "EpochComplete",
        }
    }

    /// Allowed transitions of the per-batch cycle
    pub fn can_transition_to(&self, next: LoopState) -> bool {
        use LoopState::*;
        matches!(
            (self, next),
            (Idle, Loading)
                | (Loading, Forward)
                | (Loading, EpochComplete)
                | (Forward, OptimizerStep)
                | (OptimizerStep, ResetGrad)
                | (ResetGrad, Forward)
                | (ResetGrad, EpochComplete)
                | (EpochComplete, Loading)
                | (EpochComplete, Idle)
        )
    }
}

/// Summary of one completed training epoch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochReport {
    /// 1-based epoch number
    pub epoch: usize,
    pub batches: usize,
    /// Per-batch losses in the order they were produced
    pub losses: Vec<f32>,
    /// Mean of `losses`; None for an empty epoch
    pub mean_loss: Option<f64>,
    pub elapsed_ms: u64,
}

/// Drives training epochs over a module, optimizer and checkpoint
#[derive(Debug)]
pub struct TrainingLoop {
    state: LoopState,
    epoch: usize,
    losses: LossAccumulator,
}

impl Default for TrainingLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingLoop {
    pub fn new() -> Self {
        Self {
            state: LoopState::Idle,
            epoch: 0,
            losses: LossAccumulator::new(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Number of completed epochs
    pub fn epochs_completed(&self) -> usize {
        self.epoch
    }

    fn transition(&mut self, next: LoopState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(OrtrainError::InvalidState {
                from: self.state.name(),
                to: next.name(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Run one epoch over `source`
    pub fn run_epoch<M, O, S>(
        &mut self,
        module: &mut M,
        optimizer: &mut O,
        checkpoint: &mut M::Checkpoint,
        source: &mut S,
    ) -> Result<EpochReport>
    where
        M: TrainableModule,
        O: Optimizer<Module = M>,
        S: BatchSource + ?Sized,
    {
        self.run_epoch_with(module, optimizer, checkpoint, source, |_, _| {})
    }

    /// Run one epoch, calling `on_batch(batch_number, loss)` after every step
    ///
    /// Any error aborts the epoch: the loop returns to Idle and the partial
    /// losses are discarded.
    pub fn run_epoch_with<M, O, S, F>(
        &mut self,
        module: &mut M,
        optimizer: &mut O,
        checkpoint: &mut M::Checkpoint,
        source: &mut S,
        mut on_batch: F,
    ) -> Result<EpochReport>
    where
        M: TrainableModule,
        O: Optimizer<Module = M>,
        S: BatchSource + ?Sized,
        F: FnMut(usize, f32),
    {
        let result = self.drive(module, optimizer, checkpoint, source, &mut on_batch);
        if let Err(e) = &result {
            warn!(epoch = self.epoch + 1, state = self.state.name(), error = %e, "Training epoch aborted");
            // A failed forward or step can leave gradients that the next step would apply
            if matches!(self.state, LoopState::Forward | LoopState::OptimizerStep) {
                if let Err(reset_err) = module.reset_gradients() {
                    error!(error = %reset_err, "Failed to reset gradients after aborted epoch");
                }
            }
            self.state = LoopState::Idle;
            self.losses.reset();
        }
        result
    }

    fn drive<M, O, S, F>(
        &mut self,
        module: &mut M,
        optimizer: &mut O,
        checkpoint: &mut M::Checkpoint,
        source: &mut S,
        on_batch: &mut F,
    ) -> Result<EpochReport>
    where
        M: TrainableModule,
        O: Optimizer<Module = M>,
        S: BatchSource + ?Sized,
        F: FnMut(usize, f32),
    {
        let start_time = Instant::now();
        let epoch = self.epoch + 1;

        self.transition(LoopState::Loading)?;
        self.losses.reset();
        source.reset();
        module.train_mode();

        while let Some(batch) = source.next_batch()? {
            self.transition(LoopState::Forward)?;
            let output = module.run(checkpoint, &batch)?;

            self.transition(LoopState::OptimizerStep)?;
            optimizer.step(checkpoint, module)?;

            self.transition(LoopState::ResetGrad)?;
            module.reset_gradients()?;

            self.losses.push(output.loss);
            on_batch(self.losses.len(), output.loss);
            debug!(epoch = epoch, batch = self.losses.len(), loss = output.loss, "Training step");
        }

        self.transition(LoopState::EpochComplete)?;
        self.epoch = epoch;

        let mean_loss = self.losses.mean();
        let losses = self.losses.take();
        let report = EpochReport {
            epoch,
            batches: losses.len(),
            losses,
            mean_loss,
            elapsed_ms: start_time.elapsed().as_millis() as u64,
        };

        info!(
            epoch = report.epoch,
            batches = report.batches,
            mean_loss = ?report.mean_loss,
            elapsed_ms = report.elapsed_ms,
            "Training epoch complete"
        );

        Ok(report)
    }
}
