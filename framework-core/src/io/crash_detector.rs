//! Crash detection: the persisted session marker checked against live
//! workspace state.

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::crash::{CrashVerdict, WorkspaceChanges, classify, needs_workspace};
use crate::io::git::Git;
use crate::io::marker::MarkerStore;

/// Source of the uncommitted change-set.
pub trait WorkspaceInspector {
    fn changes(&self) -> Result<WorkspaceChanges>;
}

impl<T: WorkspaceInspector + ?Sized> WorkspaceInspector for &T {
    fn changes(&self) -> Result<WorkspaceChanges> {
        (**self).changes()
    }
}

impl WorkspaceInspector for Git {
    fn changes(&self) -> Result<WorkspaceChanges> {
        self.workspace_changes()
    }
}

#[derive(Debug, Clone)]
pub struct CrashDetector<I> {
    markers: MarkerStore,
    inspector: I,
}

impl<I: WorkspaceInspector> CrashDetector<I> {
    pub fn new(markers: MarkerStore, inspector: I) -> Self {
        Self { markers, inspector }
    }

    /// Classify the previous session.
    ///
    /// The workspace is only inspected for an `active` marker. An automatic
    /// recovery rewrites the marker as `clean`; a detected crash leaves it alone.
    #[instrument(skip_all)]
    pub fn check(&self) -> Result<CrashVerdict> {
        let marker = self
            .markers
            .load()
            .context("crash check: read session marker")?
            .map(|m| m.status);
        let changes = if needs_workspace(marker) {
            Some(
                self.inspector
                    .changes()
                    .context("crash check: inspect workspace changes")?,
            )
        } else {
            None
        };

        let verdict = classify(marker, changes);
        match verdict {
            CrashVerdict::None => {}
            CrashVerdict::RecoveredAuto(recovery) => {
                info!(?recovery, "previous session ended uncleanly with nothing pending");
                self.markers
                    .mark_clean()
                    .context("crash check: auto-recover session marker")?;
            }
            CrashVerdict::NeedsInput { uncommitted_files } => {
                warn!(uncommitted_files, "previous session crashed with uncommitted changes");
            }
        }
        Ok(verdict)
    }
}
