//! Resume point for interrupted batches.
//!
//! The checkpoint is a small JSON file rewritten atomically after every
//! paper, so a crash leaves either the old or the new index on disk.

use crate::error::PipelineError;
use crate::output::write_atomic;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub subject: String,
    /// Corpus index of the last paper that finished (processed, skipped or failed).
    pub last_completed_index: Option<usize>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            last_completed_index: None,
            updated_at: Utc::now(),
        }
    }

    /// Index to continue from.
    pub fn resume_index(&self) -> usize {
        self.last_completed_index.map_or(0, |i| i + 1)
    }

    pub fn mark_completed(&mut self, index: usize) {
        self.last_completed_index = Some(index);
        self.updated_at = Utc::now();
    }

    /// Load a checkpoint; a missing file is `Ok(None)`.
    pub async fn load(path: &Path) -> Result<Option<Self>, PipelineError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(PipelineError::CheckpointFailed {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let checkpoint =
            serde_json::from_slice(&bytes).map_err(|e| PipelineError::CorruptCheckpoint {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        Ok(Some(checkpoint))
    }

    pub async fn save(&self, path: &Path) -> Result<(), PipelineError> {
        let bytes = serde_json::to_vec_pretty(self).map_err(|e| PipelineError::CorruptCheckpoint {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        write_atomic(path, &bytes)
            .await
            .map_err(|source| PipelineError::CheckpointFailed {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(
            "Checkpoint saved: last completed index {:?}",
            self.last_completed_index
        );
        Ok(())
    }
}
