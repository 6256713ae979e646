//! Liveness file
//!
//! Overwritten after every cycle with `{"timestamp": ..., "status": ...}` so an
//! external supervisor can tell the checker is still making progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::utils::error::StorageError;

/// Outcome reported in the heartbeat file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub timestamp: DateTime<Utc>,
    pub status: HeartbeatStatus,
}

#[derive(Debug, Clone)]
pub struct Heartbeat {
    path: PathBuf,
}

impl Heartbeat {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write(&self, status: HeartbeatStatus) -> Result<(), StorageError> {
        let record = HeartbeatRecord {
            timestamp: Utc::now(),
            status,
        };
        let payload = serde_json::to_string_pretty(&record)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }
        tokio::fs::write(&self.path, payload)
            .await
            .map_err(|e| StorageError::io(&self.path, e))
    }

    pub fn read(&self) -> Result<HeartbeatRecord, StorageError> {
        let content =
            std::fs::read_to_string(&self.path).map_err(|e| StorageError::io(&self.path, e))?;
        Ok(serde_json::from_str(&content)?)
    }
}
