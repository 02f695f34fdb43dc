//! Session marker storage (`.claude/.last_session`).

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::debug;

use crate::core::marker::{MarkerStatus, SessionMarker};
use crate::io::atomic::write_json_atomic;

/// Reader/writer for the singleton session marker.
///
/// `mark_active` and `mark_clean` are the only writers; both overwrite the
/// record with a fresh UTC timestamp.
#[derive(Debug, Clone)]
pub struct MarkerStore {
    path: PathBuf,
}

impl MarkerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the marker. `Ok(None)` when no marker exists; a corrupt file is an error.
    pub fn load(&self) -> Result<Option<SessionMarker>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("read session marker {}", self.path.display()));
            }
        };
        let marker: SessionMarker = serde_json::from_str(&contents)
            .with_context(|| format!("parse session marker {}", self.path.display()))?;
        debug!(status = marker.status.as_str(), "session marker loaded");
        Ok(Some(marker))
    }

    /// Marker status for staleness checks, where an unreadable marker simply
    /// does not count as clean.
    pub fn status_lenient(&self) -> Option<MarkerStatus> {
        match self.load() {
            Ok(marker) => marker.map(|m| m.status),
            Err(err) => {
                debug!(err = %format!("{err:#}"), "ignoring unreadable session marker");
                None
            }
        }
    }

    pub fn mark_active(&self) -> Result<()> {
        self.write(MarkerStatus::Active)
    }

    pub fn mark_clean(&self) -> Result<()> {
        self.write(MarkerStatus::Clean)
    }

    fn write(&self, status: MarkerStatus) -> Result<()> {
        debug!(path = %self.path.display(), status = status.as_str(), "writing session marker");
        write_json_atomic(&self.path, &SessionMarker::new(status, Utc::now()))
            .with_context(|| format!("mark session {}", status.as_str()))
    }
}
