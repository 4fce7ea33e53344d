// Error types and user-friendly error messages
//
// Library code returns `OrtrainError`. The helpers at the bottom turn the
// common artifact failures into actionable messages for the CLI.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::artifacts::ArtifactKind;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, OrtrainError>;

/// Every failure the orchestration shell can surface.
///
/// All of them are fatal to the current run; nothing is retried.
#[derive(Debug, Error)]
pub enum OrtrainError {
    /// Artifact path does not exist or is not a regular file
    #[error("{kind} artifact not found: {}", .path.display())]
    ArtifactNotFound { kind: ArtifactKind, path: PathBuf },

    /// Artifact exists but cannot be read or parsed
    #[error("{kind} artifact is corrupt: {} ({reason})", .path.display())]
    ArtifactCorrupt {
        kind: ArtifactKind,
        path: PathBuf,
        reason: String,
    },

    /// Batch features do not match the graph's declared input shape
    #[error("Batch shape {actual:?} does not match declared input shape {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Opaque failure inside the runtime collaborator
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Output name not declared by the graph
    #[error("Unknown output '{name}' (available: {})", .available.join(", "))]
    UnknownOutput { name: String, available: Vec<String> },

    /// Loop driver asked to move between states out of order
    #[error("Invalid loop transition: {from} -> {to}")]
    InvalidState {
        from: &'static str,
        to: &'static str,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl OrtrainError {
    /// Shorthand for wrapping a collaborator failure
    pub fn runtime(message: impl fmt::Display) -> Self {
        OrtrainError::Runtime(message.to_string())
    }

    /// True for missing or corrupt artifacts (checkpoint included)
    pub fn is_artifact_error(&self) -> bool {
        matches!(
            self,
            OrtrainError::ArtifactNotFound { .. } | OrtrainError::ArtifactCorrupt { .. }
        )
    }
}

/// Format a missing artifact error with helpful suggestions
pub fn artifact_not_found_error(kind: ArtifactKind, path: &str) -> String {
    format!(
        "{} artifact not found: {}\n\n\
        \x1b[1;33mPossible causes:\x1b[0m\n\
        • Artifacts were never generated\n\
        • Wrong artifacts directory\n\
        • File was renamed or deleted\n\n\
        \x1b[1;32mTry:\x1b[0m\n\
        1. Generate reference artifacts:\n\
           \x1b[36mortrain generate --out {}\x1b[0m\n\n\
        2. Check the artifacts directory:\n\
           \x1b[36mls -la $(dirname \"{}\")\x1b[0m",
        kind,
        path,
        std::path::Path::new(path)
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ".".to_string()),
        path
    )
}

/// Format a corrupt artifact error with helpful suggestions
pub fn artifact_corrupt_error(kind: ArtifactKind, path: &str, reason: &str) -> String {
    format!(
        "{} artifact could not be loaded: {}\n\n\
        \x1b[1;33mError:\x1b[0m {}\n\n\
        \x1b[1;33mPossible causes:\x1b[0m\n\
        • File is empty or truncated\n\
        • File was produced for a different runtime\n\
        • Checkpoint version is not supported\n\n\
        \x1b[1;32mTry:\x1b[0m\n\
        1. Restore the latest checkpoint snapshot:\n\
           \x1b[36mortrain checkpoints list\x1b[0m\n\n\
        2. Regenerate the artifacts",
        kind, path, reason
    )
}

/// Render any library error the way the CLI prints it
pub fn user_message(error: &OrtrainError) -> String {
    match error {
        OrtrainError::ArtifactNotFound { kind, path } => {
            artifact_not_found_error(*kind, &path.display().to_string())
        }
        OrtrainError::ArtifactCorrupt { kind, path, reason } => {
            artifact_corrupt_error(*kind, &path.display().to_string(), reason)
        }
        other => other.to_string(),
    }
}
