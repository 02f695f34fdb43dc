//! Crash classification over (marker status × workspace change-set).

use crate::core::marker::MarkerStatus;

/// Uncommitted state of the workspace as seen by version control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceChanges {
    /// Not inside a version-controlled tree; nothing tracked can be lost.
    Untracked,
    /// No staged and no unstaged differences against the last commit.
    Clean,
    /// Pending differences; `changed_paths` counts the affected paths.
    Dirty { changed_paths: usize },
}

/// Why a crashed-looking session was cleared automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoRecovery {
    NotARepository,
    NoChanges,
}

/// Decision of the crash detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashVerdict {
    /// No prior record, or the prior session confirmed a clean exit.
    None,
    /// Prior session was active but left nothing to lose; marker must become clean.
    RecoveredAuto(AutoRecovery),
    /// Prior session was active and left uncommitted changes.
    NeedsInput { uncommitted_files: usize },
}

impl CrashVerdict {
    pub fn token(&self) -> String {
        match self {
            Self::None => "CRASH:none".to_string(),
            Self::RecoveredAuto(_) => "CRASH:recovered_auto".to_string(),
            Self::NeedsInput { uncommitted_files } => {
                format!("CRASH:needs_input:{uncommitted_files}")
            }
        }
    }
}

/// True when the workspace must be inspected to classify this marker.
pub fn needs_workspace(marker: Option<MarkerStatus>) -> bool {
    marker == Some(MarkerStatus::Active)
}

/// Classify the previous session.
///
/// `changes` is only consulted for an `active` marker; callers may pass `None`
/// otherwise (see [`needs_workspace`]). An `active` marker without change-set
/// information is reported as needing input rather than cleared on a guess.
pub fn classify(marker: Option<MarkerStatus>, changes: Option<WorkspaceChanges>) -> CrashVerdict {
    match marker {
        None | Some(MarkerStatus::Clean) => CrashVerdict::None,
        Some(MarkerStatus::Active) => match changes {
            Some(WorkspaceChanges::Untracked) => {
                CrashVerdict::RecoveredAuto(AutoRecovery::NotARepository)
            }
            Some(WorkspaceChanges::Clean) => CrashVerdict::RecoveredAuto(AutoRecovery::NoChanges),
            Some(WorkspaceChanges::Dirty { changed_paths }) => CrashVerdict::NeedsInput {
                uncommitted_files: changed_paths,
            },
            None => CrashVerdict::NeedsInput {
                uncommitted_files: 0,
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_and_clean_markers_never_crash() {
        let dirty = Some(WorkspaceChanges::Dirty { changed_paths: 4 });
        assert_eq!(classify(None, dirty), CrashVerdict::None);
        assert_eq!(classify(Some(MarkerStatus::Clean), dirty), CrashVerdict::None);
        assert!(!needs_workspace(Some(MarkerStatus::Clean)));
    }

    #[test]
    fn active_marker_with_nothing_pending_recovers() {
        assert_eq!(
            classify(Some(MarkerStatus::Active), Some(WorkspaceChanges::Clean)),
            CrashVerdict::RecoveredAuto(AutoRecovery::NoChanges)
        );
        assert_eq!(
            classify(Some(MarkerStatus::Active), Some(WorkspaceChanges::Untracked)),
            CrashVerdict::RecoveredAuto(AutoRecovery::NotARepository)
        );
    }

    #[test]
    fn active_marker_with_changes_needs_input() {
        let verdict = classify(
            Some(MarkerStatus::Active),
            Some(WorkspaceChanges::Dirty { changed_paths: 3 }),
        );
        assert_eq!(verdict, CrashVerdict::NeedsInput { uncommitted_files: 3 });
        assert_eq!(verdict.token(), "CRASH:needs_input:3");
    }
}
