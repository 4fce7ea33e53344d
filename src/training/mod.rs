// Training module - loop drivers, session and checkpoint snapshots

pub mod accumulator;
pub mod checkpoint;
pub mod driver;
pub mod evaluation;
pub mod session;

pub use accumulator::{AccuracyMetric, LossAccumulator};
pub use checkpoint::{CheckpointManager, CheckpointSnapshot, SnapshotMetrics};
pub use driver::{EpochReport, LoopState, TrainingLoop};
pub use evaluation::{EvalReport, EvaluationLoop};
pub use session::TrainingSession;
