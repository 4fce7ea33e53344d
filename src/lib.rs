// ortrain - On-device training orchestration
// Library exports

pub mod artifacts; // Graph artifact loader
pub mod config;
pub mod data; // Batch sources
pub mod errors;
pub mod inference; // Inference export and run (reference + ONNX Runtime engines)
pub mod runtime; // Training runtime capability traits + reference runtime
pub mod training; // Loop drivers, session and checkpoint snapshots

pub use errors::{OrtrainError, Result};
