//! Diagnostic page snapshots
//!
//! Each capture writes `<UTC yyyymmdd-HHMMSS>_<label>.html` with the page
//! source and a `.png` screenshot next to it. A second capture with the same
//! label inside the same second gets a `_02`, `_03`, ... suffix so nothing is
//! overwritten. [`ArtifactStore::prune`] keeps the newest `retention` snapshots.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::driver::BrowserDriver;
use crate::utils::error::StorageError;
use crate::utils::sanitize_filename;

/// Files written by one capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub html: PathBuf,
    pub png: Option<PathBuf>,
}

/// Directory of diagnostic snapshots with bounded retention
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    retention: usize,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            dir: dir.into(),
            retention: retention.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `20261019-081500_navigation_failure`
    pub fn file_stem(label: &str, at: DateTime<Utc>) -> String {
        format!("{}_{}", at.format("%Y%m%d-%H%M%S"), sanitize_filename(label))
    }

    /// Save page source and screenshot under `label`
    ///
    /// The HTML file is required; a failed screenshot is logged and skipped.
    pub async fn capture(
        &self,
        driver: &dyn BrowserDriver,
        label: &str,
    ) -> Result<ArtifactPaths, StorageError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StorageError::io(&self.dir, e))?;

        let stem = self.unused_stem(&Self::file_stem(label, Utc::now())).await;
        let html = self.dir.join(format!("{stem}.html"));
        let source = driver.page_source().await?;
        tokio::fs::write(&html, source)
            .await
            .map_err(|e| StorageError::io(&html, e))?;

        let png_path = self.dir.join(format!("{stem}.png"));
        let png = match driver.screenshot_png().await {
            Ok(bytes) => match tokio::fs::write(&png_path, bytes).await {
                Ok(()) => Some(png_path),
                Err(e) => {
                    debug!(path = %png_path.display(), error = %e, "Failed to write screenshot");
                    None
                }
            },
            Err(e) => {
                debug!(label = label, error = %e, "Failed to capture screenshot");
                None
            }
        };

        debug!(html = %html.display(), "Captured diagnostic artifact");
        Ok(ArtifactPaths { html, png })
    }

    /// `stem`, or `stem_NN` when a snapshot with that name already exists
    async fn unused_stem(&self, stem: &str) -> String {
        let taken = |candidate: String| {
            let path = self.dir.join(format!("{candidate}.html"));
            async move { tokio::fs::try_exists(&path).await.unwrap_or(false) }
        };
        if !taken(stem.to_string()).await {
            return stem.to_string();
        }
        let mut n = 2u32;
        loop {
            let candidate = format!("{stem}_{n:02}");
            if !taken(candidate.clone()).await {
                return candidate;
            }
            n += 1;
        }
    }

    /// Capture, logging instead of failing
    pub async fn capture_best_effort(
        &self,
        driver: &dyn BrowserDriver,
        label: &str,
    ) -> Option<ArtifactPaths> {
        match self.capture(driver, label).await {
            Ok(paths) => Some(paths),
            Err(e) => {
                debug!(label = label, error = %e, "Failed to persist artifact");
                None
            }
        }
    }

    /// Delete all but the newest `retention` snapshots; returns how many were removed
    pub fn prune(&self) -> Result<usize, StorageError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StorageError::io(&self.dir, e)),
        };

        let mut snapshots: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "html"))
            .collect();
        if snapshots.len() <= self.retention {
            return Ok(0);
        }

        // Names start with the UTC timestamp, so lexical order is chronological
        snapshots.sort();
        let excess = snapshots.len() - self.retention;
        let mut removed = 0;
        for html in snapshots.into_iter().take(excess) {
            if let Err(e) = std::fs::remove_file(&html) {
                debug!(path = %html.display(), error = %e, "Failed to remove artifact");
                continue;
            }
            removed += 1;
            let png = html.with_extension("png");
            if png.exists() {
                let _ = std::fs::remove_file(&png);
            }
        }

        debug!(removed = removed, kept = self.retention, "Pruned old artifacts");
        Ok(removed)
    }
}
