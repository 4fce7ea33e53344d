// Configuration structs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::artifacts::ArtifactPaths;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default tracing filter when RUST_LOG is unset
    pub log_level: String,

    pub artifacts: ArtifactsConfig,

    pub training: TrainingConfig,

    pub checkpoints: CheckpointsConfig,

    pub inference: InferenceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            artifacts: ArtifactsConfig::default(),
            training: TrainingConfig::default(),
            checkpoints: CheckpointsConfig::default(),
            inference: InferenceConfig::default(),
        }
    }
}

impl Config {
    /// Inference graph location, resolved against the artifacts directory
    pub fn inference_graph_path(&self) -> PathBuf {
        if self.inference.graph.is_absolute() {
            self.inference.graph.clone()
        } else {
            self.artifacts.dir.join(&self.inference.graph)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    /// Directory holding the conventional artifact layout
    pub dir: PathBuf,

    /// Per-artifact overrides (relative paths resolve against `dir`)
    #[serde(flatten)]
    pub paths: ArtifactPaths,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("artifacts"),
            paths: ArtifactPaths::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Reshuffle the training data every epoch
    pub shuffle: bool,
    pub seed: u64,
    /// Training samples (JSONL)
    pub data: Option<PathBuf>,
    /// Held-out samples (JSONL); evaluation falls back to `data` when unset
    pub eval_data: Option<PathBuf>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 5,
            batch_size: 32,
            shuffle: true,
            seed: 42,
            data: None,
            eval_data: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointsConfig {
    /// Snapshot directory
    pub dir: PathBuf,
    /// Maximum number of snapshots to keep
    pub max_checkpoints: usize,
}

impl Default for CheckpointsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("checkpoints"),
            max_checkpoints: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Where the exported deployment graph is written
    pub graph: PathBuf,
    /// Graph input name (ONNX graphs only)
    pub input_name: String,
    pub output_names: Vec<String>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            graph: PathBuf::from("inference_model.onnx"),
            input_name: "input".to_string(),
            output_names: vec!["output".to_string()],
        }
    }
}
