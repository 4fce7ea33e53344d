// Graph artifact loader
//
// Locates training/eval/optimizer graphs and the checkpoint blob on disk and
// hands them to the runtime unopened. Parsing is the runtime's job.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::errors::{OrtrainError, Result};

/// Which role an artifact plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Training,
    Eval,
    Optimizer,
    Checkpoint,
    Inference,
}

impl ArtifactKind {
    /// Get short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            ArtifactKind::Training => "Training",
            ArtifactKind::Eval => "Eval",
            ArtifactKind::Optimizer => "Optimizer",
            ArtifactKind::Checkpoint => "Checkpoint",
            ArtifactKind::Inference => "Inference",
        }
    }

    /// File name used by the conventional artifacts layout
    pub fn default_file_name(&self) -> &'static str {
        match self {
            ArtifactKind::Training => "training_model.onnx",
            ArtifactKind::Eval => "eval_model.onnx",
            ArtifactKind::Optimizer => "optimizer_model.onnx",
            ArtifactKind::Checkpoint => "checkpoint",
            ArtifactKind::Inference => "inference_model.onnx",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque handle to an on-disk artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphArtifact {
    kind: ArtifactKind,
    path: PathBuf,
    len: u64,
    digest: String,
}

impl GraphArtifact {
    /// Open an artifact, failing with NotFound or Corrupt
    pub fn open(path: impl AsRef<Path>, kind: ArtifactKind) -> Result<Self> {
        let path = path.as_ref();

        let metadata = match fs::metadata(path) {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => {
                return Err(OrtrainError::ArtifactNotFound {
                    kind,
                    path: path.to_path_buf(),
                })
            }
        };

        if metadata.len() == 0 {
            return Err(OrtrainError::ArtifactCorrupt {
                kind,
                path: path.to_path_buf(),
                reason: "file is empty".to_string(),
            });
        }

        let bytes = fs::read(path).map_err(|e| OrtrainError::ArtifactCorrupt {
            kind,
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let digest = format!("{:x}", Sha256::digest(&bytes));

        debug!(kind = %kind, path = ?path, len = bytes.len(), digest = %digest, "Opened artifact");

        Ok(Self {
            kind,
            path: path.to_path_buf(),
            len: bytes.len() as u64,
            digest,
        })
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size in bytes at open time
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Hex SHA-256 of the contents at open time
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Read the raw bytes for the runtime
    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        fs::read(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => OrtrainError::ArtifactNotFound {
                kind: self.kind,
                path: self.path.clone(),
            },
            _ => OrtrainError::ArtifactCorrupt {
                kind: self.kind,
                path: self.path.clone(),
                reason: e.to_string(),
            },
        })
    }

    /// Build a Corrupt error pointing at this artifact
    pub fn corrupt(&self, reason: impl fmt::Display) -> OrtrainError {
        OrtrainError::ArtifactCorrupt {
            kind: self.kind,
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

/// Explicit artifact locations (all optional, resolved against a directory)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    pub training: Option<PathBuf>,
    pub eval: Option<PathBuf>,
    pub optimizer: Option<PathBuf>,
    pub checkpoint: Option<PathBuf>,
}

impl ArtifactPaths {
    fn explicit(&self, kind: ArtifactKind) -> Option<&PathBuf> {
        match kind {
            ArtifactKind::Training => self.training.as_ref(),
            ArtifactKind::Eval => self.eval.as_ref(),
            ArtifactKind::Optimizer => self.optimizer.as_ref(),
            ArtifactKind::Checkpoint => self.checkpoint.as_ref(),
            ArtifactKind::Inference => None,
        }
    }

    /// Where `kind` lives for artifacts in `dir`
    ///
    /// Absolute explicit paths are used as is, relative ones join `dir`.
    pub fn resolve(&self, dir: &Path, kind: ArtifactKind) -> PathBuf {
        match self.explicit(kind) {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => dir.join(path),
            None => dir.join(kind.default_file_name()),
        }
    }
}

/// The graphs and checkpoint a training session starts from
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    pub training: GraphArtifact,
    pub eval: Option<GraphArtifact>,
    pub optimizer: GraphArtifact,
    pub checkpoint: GraphArtifact,
}

impl ArtifactSet {
    /// Load the conventional layout from a directory
    ///
    /// The eval graph is optional; the other three must exist.
    pub fn discover(dir: impl AsRef<Path>) -> Result<Self> {
        Self::from_paths(dir, &ArtifactPaths::default())
    }

    /// Load artifacts, preferring explicit paths over the conventional names
    pub fn from_paths(dir: impl AsRef<Path>, paths: &ArtifactPaths) -> Result<Self> {
        let dir = dir.as_ref();
        let open = |kind: ArtifactKind| GraphArtifact::open(paths.resolve(dir, kind), kind);

        let training = open(ArtifactKind::Training)?;
        let optimizer = open(ArtifactKind::Optimizer)?;
        let checkpoint = open(ArtifactKind::Checkpoint)?;

        // An explicitly configured eval graph must exist; the default one may not
        let eval_path = paths.resolve(dir, ArtifactKind::Eval);
        let eval = match GraphArtifact::open(&eval_path, ArtifactKind::Eval) {
            Ok(artifact) => Some(artifact),
            Err(OrtrainError::ArtifactNotFound { .. }) if paths.eval.is_none() => None,
            Err(e) => return Err(e),
        };

        info!(
            dir = ?dir,
            training = %training.digest(),
            has_eval = eval.is_some(),
            "Loaded artifact set"
        );

        Ok(Self {
            training,
            eval,
            optimizer,
            checkpoint,
        })
    }
}
