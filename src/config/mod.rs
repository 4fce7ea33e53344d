// Configuration module
// Public interface for configuration loading

mod loader;
mod settings;

pub use loader::{load_config, parse_config, ARTIFACTS_DIR_ENV};
pub use settings::{ArtifactsConfig, CheckpointsConfig, Config, InferenceConfig, TrainingConfig};
