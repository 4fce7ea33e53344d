// Checkpoint snapshot management

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::artifacts::{ArtifactKind, GraphArtifact};
use crate::errors::{OrtrainError, Result};
use crate::runtime::CheckpointState;

/// Snapshot metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSnapshot {
    /// Snapshot ID (timestamp-based)
    pub id: String,
    /// Timestamp of creation
    pub timestamp: DateTime<Utc>,
    /// Training epochs completed when the snapshot was taken
    pub epoch: usize,
    /// Checkpoint format version reported by the runtime
    pub state_version: u32,
    /// SHA-256 of the saved checkpoint blob
    pub digest: String,
    /// Metrics at snapshot time
    pub metrics: SnapshotMetrics,
    /// Path to the saved checkpoint blob
    pub state_path: PathBuf,
}

/// Metrics recorded alongside a snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetrics {
    /// Mean training loss of the last epoch
    pub train_loss: Option<f64>,
    /// Mean evaluation loss
    pub eval_loss: Option<f64>,
    /// Evaluation accuracy in [0, 1]
    pub eval_accuracy: Option<f64>,
}

/// Manages checkpoint snapshots (persisted on demand, pruned to a maximum)
pub struct CheckpointManager {
    /// Snapshot directory
    checkpoint_dir: PathBuf,
    /// Maximum number of snapshots to keep
    max_checkpoints: usize,
}

impl CheckpointManager {
    /// Create new checkpoint manager
    pub fn new(checkpoint_dir: PathBuf, max_checkpoints: usize) -> Result<Self> {
        fs::create_dir_all(&checkpoint_dir)?;

        Ok(Self {
            checkpoint_dir,
            max_checkpoints: max_checkpoints.max(1),
        })
    }

    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    /// Persist `state` into a new snapshot directory
    pub fn create_snapshot<C: CheckpointState>(
        &self,
        state: &C,
        epoch: usize,
        metrics: SnapshotMetrics,
    ) -> Result<CheckpointSnapshot> {
        let timestamp = Utc::now();
        let (id, snapshot_dir) = self.unique_snapshot_dir(&timestamp, epoch);
        fs::create_dir_all(&snapshot_dir)?;

        let state_path = snapshot_dir.join(ArtifactKind::Checkpoint.default_file_name());
        state.save(&state_path)?;
        let saved = GraphArtifact::open(&state_path, ArtifactKind::Checkpoint)?;

        let snapshot = CheckpointSnapshot {
            id: id.clone(),
            timestamp,
            epoch,
            state_version: state.version(),
            digest: saved.digest().to_string(),
            metrics: metrics.clone(),
            state_path,
        };

        let metadata_path = snapshot_dir.join("snapshot.json");
        let metadata_json = serde_json::to_string_pretty(&snapshot)?;
        fs::write(&metadata_path, metadata_json)?;

        tracing::info!(
            snapshot_id = %id,
            epoch = epoch,
            train_loss = ?metrics.train_loss,
            "Created checkpoint snapshot"
        );

        self.cleanup_old_snapshots()?;

        Ok(snapshot)
    }

    /// Timestamp IDs can collide within a millisecond; suffix until free
    fn unique_snapshot_dir(&self, timestamp: &DateTime<Utc>, epoch: usize) -> (String, PathBuf) {
        let base = format!("{}_e{:03}", timestamp.format("%Y%m%d_%H%M%S_%3f"), epoch);
        let mut id = base.clone();
        let mut suffix = 1;
        while self.checkpoint_dir.join(&id).exists() {
            id = format!("{}_{}", base, suffix);
            suffix += 1;
        }
        let dir = self.checkpoint_dir.join(&id);
        (id, dir)
    }

    /// List all available snapshots (newest first)
    pub fn list_snapshots(&self) -> Result<Vec<CheckpointSnapshot>> {
        let mut snapshots = Vec::new();

        if !self.checkpoint_dir.exists() {
            return Ok(snapshots);
        }

        for entry in fs::read_dir(&self.checkpoint_dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.is_dir() {
                let metadata_path = path.join("snapshot.json");
                if metadata_path.exists() {
                    match self.load_snapshot_metadata(&metadata_path) {
                        Ok(snapshot) => snapshots.push(snapshot),
                        Err(e) => {
                            tracing::warn!(
                                path = ?metadata_path,
                                error = %e,
                                "Failed to load snapshot metadata"
                            );
                        }
                    }
                }
            }
        }

        snapshots.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));

        Ok(snapshots)
    }

    fn load_snapshot_metadata(&self, path: &Path) -> Result<CheckpointSnapshot> {
        let metadata_json = fs::read_to_string(path)?;
        let snapshot: CheckpointSnapshot = serde_json::from_str(&metadata_json)?;
        Ok(snapshot)
    }

    /// Get the most recent snapshot
    pub fn latest_snapshot(&self) -> Result<Option<CheckpointSnapshot>> {
        let snapshots = self.list_snapshots()?;
        Ok(snapshots.into_iter().next())
    }

    /// Open the checkpoint blob of a snapshot, ready for `load_checkpoint`
    ///
    /// Fails with a Corrupt error if the blob changed since it was saved.
    pub fn restore_snapshot(&self, snapshot_id: &str) -> Result<GraphArtifact> {
        let snapshot = self
            .list_snapshots()?
            .into_iter()
            .find(|s| s.id == snapshot_id)
            .ok_or_else(|| OrtrainError::ArtifactNotFound {
                kind: ArtifactKind::Checkpoint,
                path: self.checkpoint_dir.join(snapshot_id),
            })?;

        let artifact = GraphArtifact::open(&snapshot.state_path, ArtifactKind::Checkpoint)?;
        if artifact.digest() != snapshot.digest {
            return Err(artifact.corrupt("digest does not match snapshot metadata"));
        }

        tracing::info!(
            snapshot_id = %snapshot_id,
            timestamp = %snapshot.timestamp,
            "Restored checkpoint snapshot"
        );

        Ok(artifact)
    }

    /// Delete a snapshot
    pub fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        let snapshot_dir = self.checkpoint_dir.join(snapshot_id);

        if snapshot_dir.exists() {
            fs::remove_dir_all(&snapshot_dir)?;
            tracing::info!(snapshot_id = %snapshot_id, "Deleted checkpoint snapshot");
        }

        Ok(())
    }

    /// Keep only the newest `max_checkpoints` snapshots
    fn cleanup_old_snapshots(&self) -> Result<()> {
        let snapshots = self.list_snapshots()?;

        if snapshots.len() > self.max_checkpoints {
            let to_delete = &snapshots[self.max_checkpoints..];

            for snapshot in to_delete {
                self.delete_snapshot(&snapshot.id)?;
            }

            tracing::info!(
                deleted = to_delete.len(),
                kept = self.max_checkpoints,
                "Cleaned up old snapshots"
            );
        }

        Ok(())
    }
}
