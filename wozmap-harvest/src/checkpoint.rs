//! Durable harvest cursor
//!
//! The checkpoint is the sole source of truth for progress. It is a small JSON file
//! written next to the output dataset via write-to-temp, fsync, rename, so a crash at
//! any point leaves either the previous or the new checkpoint on disk, never a torn one.

use crate::error::{HarvestError, HarvestResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Default checkpoint file name (placed next to the output dataset)
pub const CHECKPOINT_FILE_NAME: &str = "harvest-checkpoint.json";

/// Progress cursor over the address list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Checkpoint {
    /// Number of leading addresses that have been fully attempted
    pub last_processed_index: u64,
    pub total_succeeded: u64,
    pub total_failed: u64,
    /// Unix epoch for a checkpoint that was never saved
    pub last_updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Cursor advanced past `processed` more addresses
    ///
    /// Counters saturate at `u64::MAX` instead of wrapping.
    pub fn advanced(&self, processed: u64, succeeded: u64, failed: u64) -> Self {
        Self {
            last_processed_index: self.last_processed_index.saturating_add(processed),
            total_succeeded: self.total_succeeded.saturating_add(succeeded),
            total_failed: self.total_failed.saturating_add(failed),
            last_updated_at: Utc::now(),
        }
    }
}

/// Loads and atomically saves the [`Checkpoint`] file
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    last_saved_index: Option<u64>,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_saved_index: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted checkpoint
    ///
    /// A missing file is the zero checkpoint. A file that exists but cannot be parsed
    /// is an error.
    pub fn load(&mut self) -> HarvestResult<Checkpoint> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(
                    path = %self.path.display(),
                    "No checkpoint file, starting from zero"
                );
                return Ok(Checkpoint::default());
            }
            Err(e) => {
                return Err(HarvestError::CheckpointRead {
                    path: self.path.clone(),
                    reason: e.to_string(),
                })
            }
        };

        let checkpoint: Checkpoint =
            serde_json::from_str(&content).map_err(|e| HarvestError::CheckpointRead {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        let attempted = checkpoint
            .total_succeeded
            .checked_add(checkpoint.total_failed);
        if attempted.map_or(true, |attempted| attempted > checkpoint.last_processed_index) {
            return Err(HarvestError::CheckpointRead {
                path: self.path.clone(),
                reason: format!(
                    "counters ({} succeeded, {} failed) exceed processed index {}",
                    checkpoint.total_succeeded,
                    checkpoint.total_failed,
                    checkpoint.last_processed_index
                ),
            });
        }

        self.last_saved_index = Some(checkpoint.last_processed_index);
        Ok(checkpoint)
    }

    /// Persist `checkpoint` atomically
    ///
    /// Refuses to move the cursor backwards relative to the last checkpoint this store
    /// loaded or saved.
    pub fn save(&mut self, checkpoint: &Checkpoint) -> HarvestResult<()> {
        if let Some(saved) = self.last_saved_index {
            if checkpoint.last_processed_index < saved {
                return Err(HarvestError::CheckpointRegression {
                    saved,
                    attempted: checkpoint.last_processed_index,
                });
            }
        }

        let json = serde_json::to_vec_pretty(checkpoint).map_err(|e| {
            HarvestError::Internal(format!("Checkpoint serialization failed: {}", e))
        })?;

        let tmp_path = tmp_path_for(&self.path);
        let write_result = (|| -> std::io::Result<()> {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let mut file = File::create(&tmp_path)?;
            file.write_all(&json)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &self.path)
        })();

        if let Err(source) = write_result {
            let _ = fs::remove_file(&tmp_path);
            return Err(HarvestError::CheckpointWrite {
                path: self.path.clone(),
                source,
            });
        }

        self.last_saved_index = Some(checkpoint.last_processed_index);
        tracing::debug!(
            path = %self.path.display(),
            index = checkpoint.last_processed_index,
            succeeded = checkpoint.total_succeeded,
            failed = checkpoint.total_failed,
            "Checkpoint saved"
        );
        Ok(())
    }
}

/// Sibling temp path (`<path>.tmp`) used for atomic replacement
pub(crate) fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
