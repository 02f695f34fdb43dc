//! Read-only git summaries run in the completion batch.

use crate::core::types::TaskResult;
use crate::io::git::{Git, StatusScope};
use crate::tasks::{Task, timed};

pub const GIT_STATUS: &str = "git_status";
pub const GIT_DIFF: &str = "git_diff";

/// `STATUS:<n> files`, counting every path `git status` lists.
#[derive(Debug, Clone)]
pub struct GitStatusTask {
    git: Git,
}

impl GitStatusTask {
    pub fn new(git: Git) -> Self {
        Self { git }
    }
}

impl Task for GitStatusTask {
    fn name(&self) -> &str {
        GIT_STATUS
    }

    fn run(&self) -> TaskResult {
        timed(GIT_STATUS, || {
            if !self.git.is_inside_work_tree()? {
                return Ok("STATUS:not_a_repository".to_string());
            }
            let count = self.git.changed_path_count(StatusScope::All)?;
            Ok(format!("STATUS:{count} files"))
        })
    }
}

/// `DIFF:<n> lines` of `git diff HEAD`.
#[derive(Debug, Clone)]
pub struct GitDiffTask {
    git: Git,
}

impl GitDiffTask {
    pub fn new(git: Git) -> Self {
        Self { git }
    }
}

impl Task for GitDiffTask {
    fn name(&self) -> &str {
        GIT_DIFF
    }

    fn run(&self) -> TaskResult {
        timed(GIT_DIFF, || {
            if !self.git.is_inside_work_tree()? {
                return Ok("DIFF:not_a_repository".to_string());
            }
            // A repository without commits has no HEAD to diff against.
            if !self.git.has_head()? {
                return Ok("DIFF:no_commits".to_string());
            }
            let lines = self.git.diff_head_line_count()?;
            Ok(format!("DIFF:{lines} lines"))
        })
    }
}
