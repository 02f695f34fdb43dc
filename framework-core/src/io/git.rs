//! Read-only git queries for crash detection and the completion summary.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, bail};
use tracing::{debug, instrument};

use crate::core::crash::WorkspaceChanges;
use crate::io::process::{CommandOutput, Limits, run_bounded};

pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(30);
const GIT_OUTPUT_BYTES: usize = 4_000_000;
const STDERR_TAIL_CHARS: usize = 400;

/// Which paths `git status` should list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusScope {
    /// Tracked paths with staged or unstaged changes.
    Tracked,
    /// Tracked changes plus untracked paths (untracked directories collapsed).
    All,
}

/// Bounded `git` invocations rooted at one working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    timeout: Duration,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            timeout: DEFAULT_GIT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// False outside a work tree (including when the directory is not a repository at all).
    pub fn is_inside_work_tree(&self) -> Result<bool> {
        let out = self.invoke(&["rev-parse", "--is-inside-work-tree"])?;
        Ok(out.status.success() && out.stdout.lossy().trim() == "true")
    }

    pub fn has_head(&self) -> Result<bool> {
        let out = self.invoke(&["rev-parse", "--verify", "--quiet", "HEAD"])?;
        Ok(out.status.success())
    }

    /// Work tree differs from the index.
    pub fn has_unstaged_changes(&self) -> Result<bool> {
        self.differs(&["diff", "--quiet"])
    }

    /// Index differs from HEAD.
    pub fn has_staged_changes(&self) -> Result<bool> {
        self.differs(&["diff", "--cached", "--quiet"])
    }

    /// Number of paths `git status --porcelain` lists for `scope`.
    pub fn changed_path_count(&self, scope: StatusScope) -> Result<usize> {
        let args: &[&str] = match scope {
            StatusScope::Tracked => &["status", "--porcelain=v1", "--untracked-files=no"],
            StatusScope::All => &["status", "--porcelain=v1"],
        };
        let listing = self.stdout_of(args)?;
        Ok(listing.lines().filter(|line| !line.trim().is_empty()).count())
    }

    /// Number of lines in `git diff HEAD`.
    pub fn diff_head_line_count(&self) -> Result<usize> {
        Ok(self.stdout_of(&["diff", "HEAD"])?.lines().count())
    }

    /// Classify uncommitted state for crash detection.
    ///
    /// Only staged and unstaged differences of tracked files are pending work.
    /// Untracked files, including this tool's own state under `.claude/`, are
    /// not counted.
    #[instrument(skip_all, fields(workdir = %self.workdir.display()))]
    pub fn workspace_changes(&self) -> Result<WorkspaceChanges> {
        if !self.is_inside_work_tree()? {
            debug!("not inside a git work tree");
            return Ok(WorkspaceChanges::Untracked);
        }
        let unstaged = self.has_unstaged_changes()?;
        let staged = self.has_staged_changes()?;
        if !unstaged && !staged {
            return Ok(WorkspaceChanges::Clean);
        }
        let changed_paths = self.changed_path_count(StatusScope::Tracked)?;
        debug!(unstaged, staged, changed_paths, "uncommitted changes present");
        Ok(WorkspaceChanges::Dirty { changed_paths })
    }

    /// `--quiet` diff convention: exit 0 means identical, 1 means different.
    fn differs(&self, args: &[&str]) -> Result<bool> {
        let out = self.invoke(args)?;
        match out.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => bail!(
                "git {} exited with {}: {}",
                args.join(" "),
                out.exit_label(),
                out.stderr.tail(STDERR_TAIL_CHARS)
            ),
        }
    }

    fn stdout_of(&self, args: &[&str]) -> Result<String> {
        let out = self.invoke(args)?;
        if !out.status.success() {
            bail!(
                "git {} exited with {}: {}",
                args.join(" "),
                out.exit_label(),
                out.stderr.tail(STDERR_TAIL_CHARS)
            );
        }
        Ok(out.stdout.lossy())
    }

    fn invoke(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.workdir);
        let limits = Limits {
            timeout: self.timeout,
            output_bytes: GIT_OUTPUT_BYTES,
        };
        let out = run_bounded(cmd, limits)
            .map_err(|err| err.context(format!("git {}", args.join(" "))))?;
        if out.timed_out {
            bail!(
                "git {} timed out after {}s",
                args.join(" "),
                self.timeout.as_secs()
            );
        }
        Ok(out)
    }
}
