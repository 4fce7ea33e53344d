// Configuration loader
// Loads ortrain.toml (explicit path, working directory, then ~/.ortrain) with
// environment overrides; falls back to defaults when no file exists.

use std::fs;
use std::path::{Path, PathBuf};

use super::settings::Config;
use crate::errors::{OrtrainError, Result};

/// Overrides `artifacts.dir`
pub const ARTIFACTS_DIR_ENV: &str = "ORTRAIN_ARTIFACTS_DIR";

/// Load configuration from `path`, or from the first default location found
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            if !path.exists() {
                return Err(OrtrainError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            read_config(path)?
        }
        None => match default_config_paths().into_iter().find(|p| p.exists()) {
            Some(found) => read_config(&found)?,
            None => {
                tracing::debug!("No config file found, using defaults");
                Config::default()
            }
        },
    };

    if let Ok(dir) = std::env::var(ARTIFACTS_DIR_ENV) {
        if !dir.is_empty() {
            config.artifacts.dir = PathBuf::from(dir);
        }
    }

    validate(&config)?;
    Ok(config)
}

/// Parse a TOML document into a validated config
pub fn parse_config(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents)
        .map_err(|e| OrtrainError::Config(format!("Failed to parse config: {}", e)))?;
    validate(&config)?;
    Ok(config)
}

fn read_config(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)?;
    tracing::debug!(path = ?path, "Loading config file");
    toml::from_str(&contents)
        .map_err(|e| OrtrainError::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("ortrain.toml")];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".ortrain/config.toml"));
    }
    paths
}

fn validate(config: &Config) -> Result<()> {
    if config.training.epochs == 0 {
        return Err(OrtrainError::Config("training.epochs must be at least 1".to_string()));
    }
    if config.training.batch_size == 0 {
        return Err(OrtrainError::Config("training.batch_size must be at least 1".to_string()));
    }
    if config.inference.output_names.is_empty() {
        return Err(OrtrainError::Config(
            "inference.output_names must name at least one output".to_string(),
        ));
    }
    Ok(())
}
