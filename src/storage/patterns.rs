//! Availability pattern log
//!
//! Append-only JSON-lines file of check events tagged with local hour and
//! weekday, capped at `max_events` lines. Useful for spotting when the site
//! tends to release slots or report busy.

use chrono::{DateTime, Datelike, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::utils::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Available,
    NoSlots,
    Busy,
    Inconclusive,
    Captcha,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternEvent {
    pub timestamp: DateTime<Utc>,
    pub hour: u32,
    pub weekday: String,
    pub kind: PatternKind,
}

impl PatternEvent {
    pub fn at(local: DateTime<Local>, kind: PatternKind) -> Self {
        Self {
            timestamp: local.with_timezone(&Utc),
            hour: local.hour(),
            weekday: local.weekday().to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PatternLog {
    path: PathBuf,
    max_events: usize,
}

impl PatternLog {
    pub fn new(path: impl Into<PathBuf>, max_events: usize) -> Self {
        Self {
            path: path.into(),
            max_events: max_events.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event, trimming the oldest lines past the cap
    pub fn record(&self, event: &PatternEvent) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        let line = serde_json::to_string(event)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StorageError::io(&self.path, e))?;
        writeln!(file, "{line}").map_err(|e| StorageError::io(&self.path, e))?;
        drop(file);

        self.trim()
    }

    fn trim(&self) -> Result<(), StorageError> {
        let content =
            std::fs::read_to_string(&self.path).map_err(|e| StorageError::io(&self.path, e))?;
        let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        if lines.len() <= self.max_events {
            return Ok(());
        }
        let kept = lines[lines.len() - self.max_events..].join("\n") + "\n";
        std::fs::write(&self.path, kept).map_err(|e| StorageError::io(&self.path, e))
    }

    /// All events; malformed lines are skipped
    pub fn load(&self) -> Result<Vec<PatternEvent>, StorageError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };
        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }

    /// Count of `kind` events per local hour
    pub fn hourly_counts(&self, kind: PatternKind) -> Result<BTreeMap<u32, usize>, StorageError> {
        let mut counts = BTreeMap::new();
        for event in self.load()?.into_iter().filter(|e| e.kind == kind) {
            *counts.entry(event.hour).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
