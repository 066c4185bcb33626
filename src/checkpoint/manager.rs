use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use serde::Deserialize;

use crate::checkpoint::metadata::{Checkpoint, CheckpointMetadata, CheckpointMetrics, FORMAT_VERSION};
use crate::error::CheckpointError;

const WEIGHTS_FILE: &str = "weights.bin";
const OPTIMIZER_FILE: &str = "optimizer.bin";
const METADATA_FILE: &str = "metadata.json";
const LATEST_FILE: &str = "latest";

/// Configuration for the checkpoint manager.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CheckpointManagerConfig {
    pub checkpoint_dir: PathBuf,
    pub keep_last_n: usize,
    pub keep_best_n: usize,
}

impl Default for CheckpointManagerConfig {
    fn default() -> Self {
        CheckpointManagerConfig {
            checkpoint_dir: PathBuf::from("checkpoints"),
            keep_last_n: 5,
            keep_best_n: 3,
        }
    }
}

#[derive(Deserialize)]
struct VersionHeader {
    format_version: u32,
}

/// Saves, loads, lists, and prunes checkpoints.
///
/// Every checkpoint is written into a `.tmp` directory and renamed into place,
/// and the `latest` pointer file is swapped the same way, so an interrupted
/// save never damages the last committed checkpoint.
pub struct CheckpointManager {
    config: CheckpointManagerConfig,
}

impl CheckpointManager {
    pub fn new(config: CheckpointManagerConfig) -> Result<Self, CheckpointError> {
        fs::create_dir_all(&config.checkpoint_dir)?;
        Ok(CheckpointManager { config })
    }

    pub fn dir(&self) -> &Path {
        &self.config.checkpoint_dir
    }

    pub fn save(
        &self,
        checkpoint: &Checkpoint,
        metrics: CheckpointMetrics,
    ) -> Result<PathBuf, CheckpointError> {
        let dir_name = format!("checkpoint_{:07}", checkpoint.episode_count);
        let tmp_dir = self.config.checkpoint_dir.join(format!("{}.tmp", dir_name));
        let final_dir = self.config.checkpoint_dir.join(&dir_name);
        let sequence = self.next_sequence()?;

        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir)?;
        }
        fs::create_dir_all(&tmp_dir)?;

        fs::write(tmp_dir.join(WEIGHTS_FILE), &checkpoint.network_weights)?;
        fs::write(tmp_dir.join(OPTIMIZER_FILE), &checkpoint.optimizer_state)?;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let mut metadata = checkpoint.metadata(metrics, timestamp);
        metadata.sequence = sequence;
        let meta_json = serde_json::to_string_pretty(&metadata)?;
        fs::write(tmp_dir.join(METADATA_FILE), meta_json)?;

        if final_dir.exists() {
            fs::remove_dir_all(&final_dir)?;
        }
        fs::rename(&tmp_dir, &final_dir)?;

        self.update_latest(&dir_name)?;
        // The checkpoint is committed from here on; retention is best-effort.
        if let Err(e) = self.prune_old_checkpoints(&final_dir) {
            warn!(
                "Pruning after saving {} failed: {}",
                final_dir.display(),
                e
            );
        }

        info!("Saved checkpoint {}", final_dir.display());
        Ok(final_dir)
    }

    /// Read metadata.json, refusing unknown format versions.
    pub fn load_metadata(&self, dir: &Path) -> Result<CheckpointMetadata, CheckpointError> {
        let meta_path = dir.join(METADATA_FILE);
        let meta_json =
            fs::read_to_string(&meta_path).map_err(|e| CheckpointError::MetadataRead {
                path: meta_path.clone(),
                source: e,
            })?;

        let header: VersionHeader =
            serde_json::from_str(&meta_json).map_err(|e| CheckpointError::MetadataParse {
                path: meta_path.clone(),
                source: e,
            })?;
        if header.format_version != FORMAT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: header.format_version,
                expected: FORMAT_VERSION,
            });
        }

        serde_json::from_str(&meta_json).map_err(|e| CheckpointError::MetadataParse {
            path: meta_path,
            source: e,
        })
    }

    pub fn load(&self, dir: &Path) -> Result<Checkpoint, CheckpointError> {
        let metadata = self.load_metadata(dir)?;
        let weights = fs::read(dir.join(WEIGHTS_FILE))?;
        let optimizer = fs::read(dir.join(OPTIMIZER_FILE))?;
        debug!(
            "Loaded checkpoint {} (episode {})",
            dir.display(),
            metadata.episode_count
        );
        Ok(Checkpoint::from_parts(metadata, weights, optimizer))
    }

    pub fn latest_dir(&self) -> Result<PathBuf, CheckpointError> {
        let pointer = self.config.checkpoint_dir.join(LATEST_FILE);
        if !pointer.exists() {
            return Err(CheckpointError::NoLatestCheckpoint(
                self.config.checkpoint_dir.clone(),
            ));
        }
        let name = fs::read_to_string(&pointer)?;
        Ok(self.config.checkpoint_dir.join(name.trim()))
    }

    pub fn load_latest(&self) -> Result<Checkpoint, CheckpointError> {
        self.load(&self.latest_dir()?)
    }

    /// All committed checkpoints sorted by episode (ascending). Directories
    /// whose metadata cannot be read are skipped with a warning.
    pub fn list_checkpoints(&self) -> Result<Vec<(PathBuf, CheckpointMetadata)>, CheckpointError> {
        let mut results = Vec::new();
        for entry in fs::read_dir(&self.config.checkpoint_dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if !name_str.starts_with("checkpoint_") || name_str.ends_with(".tmp") {
                continue;
            }
            if !path.join(METADATA_FILE).exists() {
                continue;
            }
            match self.load_metadata(&path) {
                Ok(metadata) => results.push((path, metadata)),
                Err(e) => warn!("Skipping unreadable checkpoint {}: {}", path.display(), e),
            }
        }
        results.sort_by_key(|(_, m)| m.episode_count);
        Ok(results)
    }

    fn next_sequence(&self) -> Result<u64, CheckpointError> {
        let checkpoints = self.list_checkpoints()?;
        Ok(checkpoints
            .iter()
            .map(|(_, m)| m.sequence + 1)
            .max()
            .unwrap_or(0))
    }

    /// Keep the union of the N most recently saved and the best N by
    /// evaluation score. `just_saved` and the `latest` target are never removed.
    fn prune_old_checkpoints(&self, just_saved: &Path) -> Result<(), CheckpointError> {
        let checkpoints = self.list_checkpoints()?;
        if checkpoints.len() <= self.config.keep_last_n {
            return Ok(());
        }
        let latest = self.latest_dir().ok();

        let mut by_save_order: Vec<usize> = (0..checkpoints.len()).collect();
        by_save_order.sort_by_key(|&i| {
            let m = &checkpoints[i].1;
            (m.sequence, m.timestamp, m.episode_count)
        });
        let mut keep: HashSet<usize> = by_save_order
            .iter()
            .rev()
            .take(self.config.keep_last_n)
            .copied()
            .collect();

        let mut by_score: Vec<(usize, f32)> = checkpoints
            .iter()
            .enumerate()
            .map(|(i, (_, m))| (i, m.metrics.eval_score))
            .collect();
        by_score.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        for (i, _) in by_score.iter().take(self.config.keep_best_n) {
            keep.insert(*i);
        }

        for (i, (path, _)) in checkpoints.iter().enumerate() {
            let protected = path == just_saved || latest.as_deref() == Some(path.as_path());
            if keep.contains(&i) || protected {
                continue;
            }
            debug!("Pruning checkpoint {}", path.display());
            if let Err(e) = fs::remove_dir_all(path) {
                warn!("Could not prune {}: {}", path.display(), e);
            }
        }
        Ok(())
    }

    /// Replace the `latest` pointer via write-then-rename.
    fn update_latest(&self, dir_name: &str) -> Result<(), CheckpointError> {
        let pointer = self.config.checkpoint_dir.join(LATEST_FILE);
        let tmp = self.config.checkpoint_dir.join(format!("{}.tmp", LATEST_FILE));
        fs::write(&tmp, dir_name)?;
        fs::rename(&tmp, &pointer)?;
        Ok(())
    }
}
